//! Deterministic, rule-based generator.
//!
//! Used by tests and offline demos: each rule maps a prompt substring to a
//! canned response. The first matching rule wins; prompts matching no rule
//! get the fallback text. Every prompt is recorded so callers can assert on
//! call counts and prompt contents.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{GenerationError, GenerationOptions, Generator};

struct Rule {
    needle: String,
    responses: Vec<String>,
    hits: usize,
}

impl Rule {
    /// Responses are served in order; the last one repeats once exhausted.
    fn next_response(&mut self) -> String {
        let idx = self.hits.min(self.responses.len().saturating_sub(1));
        self.hits += 1;
        self.responses.get(idx).cloned().unwrap_or_default()
    }
}

/// A [`Generator`] that answers from a fixed script.
pub struct ScriptedGenerator {
    rules: Mutex<Vec<Rule>>,
    fallback: String,
    fail_with: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            fallback: "OK".to_string(),
            fail_with: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A generator whose every call fails with a transport error.
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::new()
        }
    }

    /// Answer `response` to any prompt containing `needle`.
    pub fn when(self, needle: &str, response: &str) -> Self {
        self.when_seq(needle, &[response])
    }

    /// Answer successive prompts containing `needle` with `responses` in order.
    pub fn when_seq(self, needle: &str, responses: &[&str]) -> Self {
        self.rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Rule {
                needle: needle.to_string(),
                responses: responses.iter().map(|r| r.to_string()).collect(),
                hits: 0,
            });
        self
    }

    /// Text returned when no rule matches.
    pub fn otherwise(mut self, response: &str) -> Self {
        self.fallback = response.to_string();
        self
    }

    /// All prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of generation calls received so far.
    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of prompts containing `needle`.
    pub fn calls_containing(&self, needle: &str) -> usize {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|p| p.contains(needle))
            .count()
    }
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _options: GenerationOptions,
    ) -> Result<String, GenerationError> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());

        if let Some(message) = &self.fail_with {
            return Err(GenerationError::Transport(message.clone()));
        }

        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        let response = rules
            .iter_mut()
            .find(|rule| prompt.contains(&rule.needle))
            .map(Rule::next_response)
            .unwrap_or_else(|| self.fallback.clone());
        Ok(response)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
