//! Agent module - the reasoning strategies and the facade that runs them.
//!
//! Every strategy follows the same outline:
//! 1. Reason about the query with one or more generation calls
//! 2. Optionally pick a capability from the registry and invoke it
//! 3. Synthesize a final answer from the reasoning and any observation
//!
//! Strategies differ in how step 1 is shaped: an iterative think/act loop,
//! a single upfront chain, or a scored search over branching continuations.
//! Only generation faults escape a run; everything else is absorbed.

mod branching;
mod chain;
mod iterative;
mod log;
mod prompt;
mod synthesis;

pub use branching::{BranchingSearchStrategy, EvaluatedPath, NodeId, ReasoningNode, ReasoningTree};
pub use chain::{split_steps, UpfrontChainStrategy};
pub use iterative::{IterativeStrategy, ReasoningStep};
pub use log::{LogEntryType, RunLog, RunLogEntry, RunOutcome};
pub use synthesis::format_observation;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StrategySettings;
use crate::llm::{GenerationError, Generator};
use crate::tools::CapabilityRegistry;

/// Which reasoning strategy to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// Think, act, observe, repeat (ReAct)
    #[default]
    Iterative,
    /// All reasoning steps in one call (chain of thought)
    UpfrontChain,
    /// Scored search over a tree of continuations (tree of thoughts)
    BranchingSearch,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Iterative => "react",
            Self::UpfrontChain => "cot",
            Self::BranchingSearch => "tot",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "react" | "iterative" => Ok(Self::Iterative),
            "cot" | "chain" | "upfront-chain" => Ok(Self::UpfrontChain),
            "tot" | "tree" | "branching" => Ok(Self::BranchingSearch),
            other => Err(format!(
                "Unknown strategy '{}' (expected react, cot or tot)",
                other
            )),
        }
    }
}

/// A reasoning strategy.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Answer `query`, keeping the audit log of the run.
    async fn run_logged(&self, query: &str) -> Result<RunOutcome, GenerationError>;

    /// Answer `query`.
    async fn run(&self, query: &str) -> Result<String, GenerationError> {
        Ok(self.run_logged(query).await?.answer)
    }
}

/// The caller-facing entry point: one configured strategy.
pub struct Agent {
    strategy: Box<dyn Strategy>,
}

impl Agent {
    /// Create an agent running the `kind` strategy.
    pub fn new(
        kind: StrategyKind,
        generator: Arc<dyn Generator>,
        registry: Arc<CapabilityRegistry>,
        settings: StrategySettings,
    ) -> Self {
        tracing::debug!("Using {} strategy with model {}", kind, generator.model_name());
        let strategy: Box<dyn Strategy> = match kind {
            StrategyKind::Iterative => Box::new(IterativeStrategy::new(
                generator,
                registry,
                settings.max_steps,
                settings.observation_items,
            )),
            StrategyKind::UpfrontChain => Box::new(UpfrontChainStrategy::new(
                generator,
                registry,
                settings.num_thoughts,
                settings.observation_items,
            )),
            StrategyKind::BranchingSearch => Box::new(BranchingSearchStrategy::new(
                generator,
                registry,
                settings.num_branches,
                settings.max_depth,
                settings.evaluation_criteria,
                settings.parallelism,
                settings.observation_items,
            )),
        };
        Self { strategy }
    }

    pub fn kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Run a query and return the final answer.
    pub async fn run(&self, query: &str) -> Result<String, GenerationError> {
        self.strategy.run(query).await
    }

    /// Run a query and return the answer together with the execution log.
    pub async fn run_logged(&self, query: &str) -> Result<RunOutcome, GenerationError> {
        self.strategy.run_logged(query).await
    }

    /// Static upper bound on generation calls for one run.
    pub fn max_generation_calls(kind: StrategyKind, settings: &StrategySettings) -> usize {
        match kind {
            StrategyKind::Iterative => IterativeStrategy::max_generation_calls(settings.max_steps),
            StrategyKind::UpfrontChain => UpfrontChainStrategy::max_generation_calls(),
            StrategyKind::BranchingSearch => BranchingSearchStrategy::max_generation_calls(
                settings.num_branches,
                settings.max_depth,
            ),
        }
    }
}
