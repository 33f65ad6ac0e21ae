//! Text generation layer.
//!
//! Strategies only ever see the [`Generator`] trait: a prompt goes in, some
//! text comes out. Nothing about the returned text is trusted; structure is
//! recovered later by [`crate::intent`].
//!
//! Retries, backoff and per-call timeouts belong to the concrete provider
//! ([`OllamaClient`]), never to the strategies.

mod ollama;
pub mod scripted;

pub use ollama::{BackoffConfig, OllamaClient};
pub use scripted::ScriptedGenerator;

use async_trait::async_trait;
use thiserror::Error;

/// A fault raised by the generation provider.
///
/// This is the one error class the reasoning engine does not absorb: without
/// generation no reasoning is possible, so it propagates out of `run`.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Cannot reach generation provider: {0}")]
    Transport(String),

    #[error("Generation request timed out after {0}s")]
    Timeout(u64),

    #[error("Generation provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Generation provider returned an empty response")]
    EmptyResponse,

    #[error("Model '{model}' not found. Available models: {available}")]
    ModelNotFound { model: String, available: String },

    #[error("Invalid generation request: {0}")]
    InvalidRequest(String),

    #[error("Could not decode provider response: {0}")]
    Decode(String),
}

impl GenerationError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::EmptyResponse
            | Self::ModelNotFound { .. }
            | Self::InvalidRequest(_)
            | Self::Decode(_) => false,
        }
    }
}

/// Sampling parameters for a single generation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    /// Sampling temperature in `[0.0, 1.0]`.
    pub temperature: f32,
    /// Upper bound on generated tokens (`None` = provider default).
    pub max_tokens: Option<u32>,
}

impl GenerationOptions {
    pub const fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens: Some(max_tokens),
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

/// A free-text generation capability.
///
/// Implementations must return *some* text or a [`GenerationError`]; they
/// are never expected to honor any requested output structure.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a completion for `prompt`.
    async fn generate(
        &self,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<String, GenerationError>;

    /// Identifier of the underlying model, for logging.
    fn model_name(&self) -> &str;
}
