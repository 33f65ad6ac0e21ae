//! Ollama chat API client.
//!
//! Talks to a local (or remote) Ollama server via `POST /api/chat` with
//! streaming disabled. Transient failures are retried with exponential
//! backoff; the strategies above never retry.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{GenerationError, GenerationOptions, Generator};
use crate::config::LlmConfig;

/// Backoff schedule for retried generation calls.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum backoff cap.
    pub max_delay: Duration,
    /// Multiplier per consecutive failure (typically 2.0).
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Delay to wait after `consecutive_failures` failed attempts (0-based).
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let delay_secs =
            self.base_delay.as_secs_f64() * self.multiplier.powi(consecutive_failures as i32);
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Generation provider backed by an Ollama server.
pub struct OllamaClient {
    client: reqwest::Client,
    host: String,
    model: String,
    timeout: Duration,
    max_retries: u32,
    backoff: BackoffConfig,
}

impl OllamaClient {
    /// Create a client from the LLM section of the configuration.
    pub fn new(config: &LlmConfig) -> Result<Self, GenerationError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout,
            max_retries: config.max_retries.max(1),
            backoff: BackoffConfig::default(),
        })
    }

    /// Override the retry backoff schedule.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Check that the server is reachable and serves the configured model.
    ///
    /// An untagged model name also matches its `:latest` tag. A tag listing
    /// that cannot be decoded only logs a warning.
    pub async fn check_model(&self) -> Result<(), GenerationError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.host))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| {
                GenerationError::Transport(format!(
                    "Cannot connect to Ollama at {}. Is it running? ({})",
                    self.host, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Http {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        let tags: TagsResponse = match response.json().await {
            Ok(tags) => tags,
            Err(e) => {
                tracing::warn!("Could not validate model availability: {}", e);
                return Ok(());
            }
        };
        let names: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
        let latest = format!("{}:latest", self.model);
        if names.iter().any(|n| *n == self.model || *n == latest) {
            tracing::debug!("Model {} is available", self.model);
            Ok(())
        } else {
            Err(GenerationError::ModelNotFound {
                model: self.model.clone(),
                available: names.join(", "),
            })
        }
    }

    /// Build the `/api/chat` request body.
    fn build_payload(&self, prompt: &str, options: GenerationOptions) -> Value {
        let mut sampling = json!({ "temperature": options.temperature });
        if let Some(max_tokens) = options.max_tokens {
            sampling["num_predict"] = json!(max_tokens);
        }

        json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": false,
            "options": sampling,
        })
    }

    async fn attempt(&self, payload: &Value) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(self.timeout.as_secs())
                } else {
                    GenerationError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Http {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Decode(e.to_string()))?;

        let content = parsed.message.map(|m| m.content).unwrap_or_default();
        if content.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(content.trim().to_string())
    }
}

fn validate_request(prompt: &str, options: &GenerationOptions) -> Result<(), GenerationError> {
    if prompt.trim().is_empty() {
        return Err(GenerationError::InvalidRequest(
            "prompt cannot be empty".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&options.temperature) {
        return Err(GenerationError::InvalidRequest(format!(
            "temperature must be between 0.0 and 1.0, got {}",
            options.temperature
        )));
    }
    if options.max_tokens == Some(0) {
        return Err(GenerationError::InvalidRequest(
            "max_tokens must be positive".to_string(),
        ));
    }
    Ok(())
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}... [truncated]", head)
    }
}

#[async_trait]
impl Generator for OllamaClient {
    async fn generate(
        &self,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<String, GenerationError> {
        validate_request(prompt, &options)?;

        tracing::debug!(
            "Generating with {} ({} prompt chars, temperature {})",
            self.model,
            prompt.len(),
            options.temperature
        );
        let payload = self.build_payload(prompt, options);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(&payload).await {
                Ok(text) => {
                    tracing::debug!("Generated {} chars", text.len());
                    return Ok(text);
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff.delay_for(attempt - 1);
                    tracing::warn!(
                        "Generation attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt,
                        self.max_retries,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        "Generation failed after {} attempt(s): {}",
                        attempt,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    fn client() -> OllamaClient {
        let config = LlmConfig {
            host: "http://localhost:11434/".to_string(),
            model: "llama3.1:8b".to_string(),
            timeout_secs: 5,
            max_retries: 3,
        };
        OllamaClient::new(&config).expect("client")
    }

    #[test]
    fn payload_includes_num_predict_only_when_bounded() {
        let c = client();
        let bounded = c.build_payload("hi", GenerationOptions::new(0.1, 200));
        assert_eq!(bounded["model"], "llama3.1:8b");
        assert_eq!(bounded["stream"], false);
        assert_eq!(bounded["messages"][0]["content"], "hi");
        assert_eq!(bounded["options"]["num_predict"], 200);

        let open = c.build_payload("hi", GenerationOptions::default());
        assert!(open["options"].get("num_predict").is_none());
    }

    #[test]
    fn host_trailing_slash_is_trimmed() {
        assert_eq!(client().host, "http://localhost:11434");
    }

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.delay_for(0), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(1), Duration::from_secs(4));
        assert_eq!(backoff.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn rejects_invalid_requests() {
        assert!(validate_request("   ", &GenerationOptions::default()).is_err());
        assert!(validate_request("ok", &GenerationOptions::new(1.5, 10)).is_err());
        assert!(validate_request("ok", &GenerationOptions::new(0.5, 0)).is_err());
        assert!(validate_request("ok", &GenerationOptions::new(0.5, 10)).is_ok());
    }

    #[test]
    fn transient_classification() {
        assert!(GenerationError::Timeout(5).is_transient());
        assert!(GenerationError::Http { status: 503, body: String::new() }.is_transient());
        assert!(GenerationError::Http { status: 429, body: String::new() }.is_transient());
        assert!(!GenerationError::Http { status: 400, body: String::new() }.is_transient());
        assert!(!GenerationError::InvalidRequest("x".into()).is_transient());
        assert!(!GenerationError::EmptyResponse.is_transient());
    }

    #[tokio::test]
    async fn invalid_request_fails_before_any_network_call() {
        let err = client()
            .generate("", GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidRequest(_)));
    }

    /// Serve canned `(status, body)` replies in order, repeating the last one.
    /// Returns the base URL and a counter of requests served.
    async fn serve(replies: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = replies[n.min(replies.len() - 1)];
                read_request(&mut socket).await;
                let reply = format!(
                    "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (url, hits)
    }

    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + body_len {
                    return;
                }
            }
        }
    }

    fn client_for(host: &str, model: &str) -> OllamaClient {
        let config = LlmConfig {
            host: host.to_string(),
            model: model.to_string(),
            timeout_secs: 5,
            max_retries: 3,
        };
        OllamaClient::new(&config)
            .expect("client")
            .with_backoff(BackoffConfig {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
            })
    }

    const REPLY: &str = r#"{"model":"llama3.1:8b","message":{"role":"assistant","content":"  hi \n"},"done":true}"#;
    const TAGS: &str = r#"{"models":[{"name":"llama3.1:8b"},{"name":"mistral:latest"}]}"#;

    #[tokio::test]
    async fn server_errors_are_retried() {
        let (url, hits) = serve(vec![(500, "overloaded"), (200, REPLY)]).await;
        let text = client_for(&url, "llama3.1:8b")
            .generate("hello", GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "hi");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rate_limits_exhaust_the_retry_budget() {
        let (url, hits) = serve(vec![(429, "slow down")]).await;
        let err = client_for(&url, "llama3.1:8b")
            .generate("hello", GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Http { status: 429, .. }), "{}", err);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (url, hits) = serve(vec![(404, r#"{"error":"model not found"}"#)]).await;
        let err = client_for(&url, "missing")
            .generate("hello", GenerationOptions::default())
            .await
            .unwrap_err();
        match err {
            GenerationError::Http { status, body } => {
                assert_eq!(status, 404);
                assert!(body.contains("model not found"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_content_is_an_empty_response() {
        let (url, hits) = serve(vec![(200, r#"{"done":true}"#)]).await;
        let err = client_for(&url, "llama3.1:8b")
            .generate("hello", GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::EmptyResponse), "{}", err);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn undecodable_body_is_a_decode_error() {
        let (url, hits) = serve(vec![(200, "not json")]).await;
        let err = client_for(&url, "llama3.1:8b")
            .generate("hello", GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Decode(_)), "{}", err);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn check_model_accepts_listed_models() {
        let (url, _) = serve(vec![(200, TAGS)]).await;
        assert!(client_for(&url, "llama3.1:8b").check_model().await.is_ok());
        assert!(client_for(&url, "mistral").check_model().await.is_ok());
    }

    #[tokio::test]
    async fn check_model_names_available_models() {
        let (url, _) = serve(vec![(200, TAGS)]).await;
        let err = client_for(&url, "phi3").check_model().await.unwrap_err();
        assert!(matches!(err, GenerationError::ModelNotFound { .. }));
        assert_eq!(
            err.to_string(),
            "Model 'phi3' not found. Available models: llama3.1:8b, mistral:latest"
        );
    }

    #[tokio::test]
    async fn check_model_reports_unreachable_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = client_for(&url, "llama3.1:8b").check_model().await.unwrap_err();
        assert!(matches!(err, GenerationError::Transport(_)));
        assert!(err.to_string().contains("Cannot connect to Ollama"));
    }
}
