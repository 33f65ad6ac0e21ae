//! Configuration management for the agent runtime.
//!
//! Configuration can be set via environment variables:
//! - `OLLAMA_HOST` - Optional. Ollama server URL. Defaults to `http://localhost:11434`.
//! - `OLLAMA_MODEL` - Optional. Model to generate with. Defaults to `llama3.1:8b`.
//! - `LLM_TIMEOUT_SECS` - Optional. Per-request timeout. Defaults to `120`.
//! - `LLM_MAX_RETRIES` - Optional. Attempts per generation call. Defaults to `3`.
//! - `AGENT_STRATEGY` - Optional. `react`, `cot` or `tot`. Defaults to `react`.
//! - `MAX_STEPS` - Optional. Iterative strategy step ceiling. Defaults to `5`.
//! - `NUM_THOUGHTS` - Optional. Upfront-chain reasoning steps. Defaults to `3`.
//! - `NUM_BRANCHES` - Optional. Branching-search branch factor. Defaults to `3`.
//! - `MAX_DEPTH` - Optional. Branching-search tree depth. Defaults to `2`.
//! - `EVALUATION_CRITERIA` - Optional. Comma-separated path scoring rubric.
//! - `BRANCH_PARALLELISM` - Optional. Concurrent generation calls while
//!   building/evaluating the tree. Defaults to `1` (sequential).
//! - `ENABLE_WEB_SEARCH` - Optional. Register `web_search`/`fetch_url`. Defaults to `true`.
//! - `ENABLE_TASKS` - Optional. Register `create_task`/`list_tasks`. Defaults to `true`.

use std::str::FromStr;

use thiserror::Error;

use crate::agent::StrategyKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Generation provider configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Ollama server URL
    pub host: String,

    /// Model identifier as known to Ollama
    pub model: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Attempts per generation call (including the first)
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            timeout_secs: 120,
            max_retries: 3,
        }
    }
}

/// Bounds and knobs shared by the reasoning strategies.
///
/// Every bound here is a resource-consumption knob: branching search in
/// particular costs `B + B^2 + ... + B^D` build calls plus `B^D` evaluation
/// calls per run.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategySettings {
    /// Iterative strategy: hard ceiling on think/act/observe iterations (N)
    pub max_steps: usize,

    /// Upfront-chain strategy: reasoning steps requested in one call (K)
    pub num_thoughts: usize,

    /// Branching search: candidates generated per node (B)
    pub num_branches: usize,

    /// Branching search: tree depth (D)
    pub max_depth: usize,

    /// Branching search: rubric used when scoring leaf paths
    pub evaluation_criteria: Vec<String>,

    /// Branching search: concurrent generation calls per phase
    pub parallelism: usize,

    /// How many list items an observation shows
    pub observation_items: usize,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            max_steps: 5,
            num_thoughts: 3,
            num_branches: 3,
            max_depth: 2,
            evaluation_criteria: default_criteria(),
            parallelism: 1,
            observation_items: 5,
        }
    }
}

impl StrategySettings {
    /// Reject bounds that would make a strategy degenerate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("MAX_STEPS", self.max_steps),
            ("NUM_THOUGHTS", self.num_thoughts),
            ("NUM_BRANCHES", self.num_branches),
            ("MAX_DEPTH", self.max_depth),
            ("BRANCH_PARALLELISM", self.parallelism),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue(
                    name.to_string(),
                    "must be at least 1".to_string(),
                ));
            }
        }
        if self.evaluation_criteria.is_empty() {
            return Err(ConfigError::InvalidValue(
                "EVALUATION_CRITERIA".to_string(),
                "must name at least one criterion".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which built-in capabilities get registered at startup.
#[derive(Debug, Clone)]
pub struct CapabilityConfig {
    pub enable_web_search: bool,
    pub enable_tasks: bool,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            enable_web_search: true,
            enable_tasks: true,
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Generation provider settings
    pub llm: LlmConfig,

    /// Default strategy when the caller does not pick one
    pub strategy: StrategyKind,

    /// Strategy bounds
    pub settings: StrategySettings,

    /// Built-in capability toggles
    pub capabilities: CapabilityConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set but cannot be
    /// parsed, or if the resulting strategy bounds are degenerate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = LlmConfig::default();
        let llm = LlmConfig {
            host: std::env::var("OLLAMA_HOST").unwrap_or(defaults.host),
            model: std::env::var("OLLAMA_MODEL").unwrap_or(defaults.model),
            timeout_secs: env_parse("LLM_TIMEOUT_SECS")?.unwrap_or(defaults.timeout_secs),
            max_retries: env_parse("LLM_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
        };

        let strategy = std::env::var("AGENT_STRATEGY")
            .ok()
            .map(|v| {
                v.parse::<StrategyKind>()
                    .map_err(|e| ConfigError::InvalidValue("AGENT_STRATEGY".to_string(), e))
            })
            .transpose()?
            .unwrap_or_default();

        let base = StrategySettings::default();
        let settings = StrategySettings {
            max_steps: env_parse("MAX_STEPS")?.unwrap_or(base.max_steps),
            num_thoughts: env_parse("NUM_THOUGHTS")?.unwrap_or(base.num_thoughts),
            num_branches: env_parse("NUM_BRANCHES")?.unwrap_or(base.num_branches),
            max_depth: env_parse("MAX_DEPTH")?.unwrap_or(base.max_depth),
            evaluation_criteria: std::env::var("EVALUATION_CRITERIA")
                .map(|v| parse_criteria(&v))
                .unwrap_or(base.evaluation_criteria),
            parallelism: env_parse("BRANCH_PARALLELISM")?.unwrap_or(base.parallelism),
            observation_items: base.observation_items,
        };
        settings.validate()?;

        let capabilities = CapabilityConfig {
            enable_web_search: env_bool("ENABLE_WEB_SEARCH")?.unwrap_or(true),
            enable_tasks: env_bool("ENABLE_TASKS")?.unwrap_or(true),
        };

        Ok(Self {
            llm,
            strategy,
            settings,
            capabilities,
        })
    }

    /// Create a config with default values (useful for testing).
    pub fn new(strategy: StrategyKind) -> Self {
        Self {
            llm: LlmConfig::default(),
            strategy,
            settings: StrategySettings::default(),
            capabilities: CapabilityConfig::default(),
        }
    }
}

/// Default rubric for scoring branching-search paths.
pub fn default_criteria() -> Vec<String> {
    ["Feasibility", "Effectiveness", "Efficiency", "Risk"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Split a comma-separated criteria list, dropping blanks.
pub fn parse_criteria(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(|c| c.to_string())
        .collect()
}

fn env_parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(name)
        .ok()
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e)))
        })
        .transpose()
}

fn env_bool(name: &str) -> Result<Option<bool>, ConfigError> {
    std::env::var(name)
        .ok()
        .map(|v| parse_bool(&v).map_err(|e| ConfigError::InvalidValue(name.to_string(), e)))
        .transpose()
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
        other => Err(format!("expected boolean-like value, got: {}", other)),
    }
}
