//! # Agent Runtime
//!
//! A multi-strategy reasoning engine over a local text generator.
//!
//! This library provides:
//! - Three reasoning strategies: iterative think/act/observe, an upfront
//!   step-by-step chain, and a scored search over branching continuations
//! - A registry of capabilities (web search, tasks, clock) strategies can
//!   invoke mid-reasoning
//! - A parser that recovers structured decisions from free-form model text
//! - Integration with Ollama for generation
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use agent_runtime::{agent::Agent, config::Config, llm::OllamaClient, tools::CapabilityRegistry};
//!
//! let config = Config::from_env()?;
//! let generator = Arc::new(OllamaClient::new(&config.llm)?);
//! let registry = Arc::new(CapabilityRegistry::with_builtin(&config.capabilities).await);
//! let agent = Agent::new(config.strategy, generator, registry, config.settings);
//! let answer = agent.run("What are good Python tutorials?").await?;
//! ```

pub mod agent;
pub mod config;
pub mod intent;
pub mod llm;
pub mod memory;
pub mod tools;

pub use config::Config;
