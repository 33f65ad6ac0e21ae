//! Web access capabilities: search and fetch URLs.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Arguments, Capability, CapabilityOutcome, ParameterKind, ParameterSpec};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; AgentRuntime/0.3)";
const MAX_SEARCH_RESULTS: i64 = 20;
const MAX_FETCH_CHARS: usize = 20_000;

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Search the web via DuckDuckGo's HTML endpoint (no API key needed).
pub struct WebSearch {
    client: reqwest::Client,
}

impl WebSearch {
    pub fn new() -> Self {
        Self {
            client: http_client(Duration::from_secs(20)),
        }
    }
}

impl Default for WebSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns titles, snippets and URLs of relevant pages. Use this to find current information, answer factual questions, or research topics."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::required("query", ParameterKind::String, "The search query"),
            ParameterSpec::optional(
                "max_results",
                ParameterKind::Integer,
                "Maximum number of results to return (1-20)",
                Some(json!(5)),
            ),
        ]
    }

    async fn execute(&self, args: Arguments) -> anyhow::Result<CapabilityOutcome> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Query cannot be empty"))?;
        let max_results = match args.get("max_results") {
            None => 5,
            Some(value) => value
                .as_i64()
                .ok_or_else(|| anyhow::anyhow!("max_results must be an integer, got {}", value))?,
        };
        if !(1..=MAX_SEARCH_RESULTS).contains(&max_results) {
            return Err(anyhow::anyhow!(
                "max_results must be between 1 and {}",
                MAX_SEARCH_RESULTS
            ));
        }

        let url = format!(
            "https://html.duckduckgo.com/html/?q={}",
            urlencoding::encode(query)
        );
        let html = self.client.get(&url).send().await?.text().await?;
        let results = extract_ddg_results(&html, max_results as usize);

        tracing::info!("web_search '{}' returned {} results", query, results.len());
        Ok(CapabilityOutcome::success(Value::Array(results))
            .with_metadata("query", json!(query))
            .with_metadata("max_results", json!(max_results)))
    }
}

/// Extract result records from DuckDuckGo HTML.
fn extract_ddg_results(html: &str, limit: usize) -> Vec<Value> {
    let mut results = Vec::new();

    for chunk in html.split("class=\"result__body\"").skip(1) {
        if results.len() >= limit {
            break;
        }

        let title = inner_text_after(chunk, "class=\"result__a\"").unwrap_or_default();
        if title.is_empty() {
            continue;
        }
        let snippet = inner_text_after(chunk, "class=\"result__snippet\"").unwrap_or_default();
        let url = inner_text_after(chunk, "class=\"result__url\"").unwrap_or_default();

        results.push(json!({
            "position": results.len() + 1,
            "title": html_decode(&title),
            "snippet": html_decode(&snippet),
            "url": url,
        }));
    }

    results
}

/// Text between the `>` closing the tag that carries `marker` and the next `<`.
fn inner_text_after(chunk: &str, marker: &str) -> Option<String> {
    chunk
        .split(marker)
        .nth(1)
        .and_then(|s| s.split('>').nth(1))
        .and_then(|s| s.split('<').next())
        .map(|s| s.trim().to_string())
}

/// Basic HTML entity decoding.
fn html_decode(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
}

/// Fetch the text content of a URL.
pub struct FetchUrl {
    client: reqwest::Client,
}

impl FetchUrl {
    pub fn new() -> Self {
        Self {
            client: http_client(Duration::from_secs(30)),
        }
    }
}

impl Default for FetchUrl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for FetchUrl {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch the content of a URL and return its readable text. Useful for reading documentation or a page found by web_search."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::required(
            "url",
            ParameterKind::String,
            "The http(s) URL to fetch",
        )]
    }

    async fn execute(&self, args: Arguments) -> anyhow::Result<CapabilityOutcome> {
        let raw = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("Missing 'url' argument"))?;
        let url = url::Url::parse(raw)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow::anyhow!("Unsupported URL scheme: {}", url.scheme()));
        }

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Ok(CapabilityOutcome::failure(format!("HTTP error: {}", status))
                .with_metadata("url", json!(url.as_str())));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_default();
        let body = response.text().await?;

        let text = if content_type.contains("text/html") {
            extract_text_from_html(&body)
        } else {
            body
        };
        let truncated = text.chars().count() > MAX_FETCH_CHARS;
        let text: String = text.chars().take(MAX_FETCH_CHARS).collect();

        Ok(CapabilityOutcome::success(Value::String(text))
            .with_metadata("url", json!(url.as_str()))
            .with_metadata("truncated", json!(truncated)))
    }
}

/// Extract readable text from HTML (script and style bodies removed).
fn extract_text_from_html(html: &str) -> String {
    let mut text = html.to_string();
    for (open, close) in [("<script", "</script>"), ("<style", "</style>")] {
        while let Some(start) = text.find(open) {
            match text[start..].find(close) {
                Some(end) => text.replace_range(start..start + end + close.len(), ""),
                None => break,
            }
        }
    }

    let mut result = String::new();
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(c),
            _ => {}
        }
    }

    html_decode(&result)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DDG_SAMPLE: &str = r#"
<div class="result__body"><a class="result__a" href="x">Rust &amp; You</a>
<a class="result__snippet">Learn Rust fast</a><a class="result__url"> rust-lang.org </a></div>
<div class="result__body"><a class="result__a" href="y"></a></div>
<div class="result__body"><a class="result__a" href="z">Second</a>
<a class="result__snippet">More</a><a class="result__url">example.com</a></div>
"#;

    #[test]
    fn extracts_records_and_skips_untitled() {
        let results = extract_ddg_results(DDG_SAMPLE, 5);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["title"], "Rust & You");
        assert_eq!(results[0]["snippet"], "Learn Rust fast");
        assert_eq!(results[0]["url"], "rust-lang.org");
        assert_eq!(results[1]["position"], 2);
    }

    #[test]
    fn respects_result_limit() {
        assert_eq!(extract_ddg_results(DDG_SAMPLE, 1).len(), 1);
    }

    #[test]
    fn html_text_extraction_drops_scripts() {
        let html = "<html><script>var x = 1;</script><style>p{}</style><p>Hello&nbsp;<b>world</b></p></html>";
        assert_eq!(extract_text_from_html(html), "Hello world");
    }

    #[tokio::test]
    async fn fetch_rejects_non_http_schemes() {
        let mut args = Arguments::new();
        args.insert("url".into(), json!("file:///etc/passwd"));
        let err = FetchUrl::new().execute(args).await.unwrap_err();
        assert!(err.to_string().contains("Unsupported URL scheme"));
    }

    #[tokio::test]
    async fn search_rejects_out_of_range_limits() {
        let mut args = Arguments::new();
        args.insert("query".into(), json!("rust"));
        args.insert("max_results".into(), json!(50));
        assert!(WebSearch::new().execute(args).await.is_err());
    }

    #[tokio::test]
    async fn search_rejects_negative_limits() {
        let mut args = Arguments::new();
        args.insert("query".into(), json!("rust"));
        args.insert("max_results".into(), json!(-3));
        let err = WebSearch::new().execute(args).await.unwrap_err();
        assert!(err.to_string().contains("between 1 and 20"));
    }
}
