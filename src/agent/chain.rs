//! Upfront-chain strategy: reason once, optionally act once, answer.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use crate::llm::{GenerationError, Generator};
use crate::tools::CapabilityRegistry;

use super::log::{LogEntryType, RunLog, RunOutcome};
use super::synthesis::{act, catalog_if_any, decide, synthesize};
use super::{prompt, Strategy, StrategyKind};

/// `Step 2:`, `**Step 2:**`, `### Step 2.` and similar line prefixes.
fn step_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[\s#*_>]*step\s+\d+\s*[:.)-]?[\s*_]*")
            .expect("step marker pattern is valid")
    })
}

/// Split a chain response into at most `max_steps` steps.
///
/// Text before the first marker belongs to step 1, since the prompt already
/// opened it.
pub fn split_steps(response: &str, max_steps: usize) -> Vec<String> {
    let mut steps = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in response.lines().map(str::trim) {
        if let Some(marker) = step_marker().find(line) {
            if !current.is_empty() {
                steps.push(current.join(" "));
                current.clear();
            }
            let rest = line[marker.end()..].trim();
            if !rest.is_empty() {
                current.push(rest);
            }
        } else if !line.is_empty() {
            current.push(line);
        }
    }
    if !current.is_empty() {
        steps.push(current.join(" "));
    }

    steps.truncate(max_steps);
    steps
}

/// Generates the whole reasoning chain in one call.
pub struct UpfrontChainStrategy {
    generator: Arc<dyn Generator>,
    registry: Arc<CapabilityRegistry>,
    num_thoughts: usize,
    observation_items: usize,
}

impl UpfrontChainStrategy {
    pub fn new(
        generator: Arc<dyn Generator>,
        registry: Arc<CapabilityRegistry>,
        num_thoughts: usize,
        observation_items: usize,
    ) -> Self {
        Self {
            generator,
            registry,
            num_thoughts,
            observation_items,
        }
    }

    /// Chain, decide and answer. The decision is skipped for an empty registry.
    pub fn max_generation_calls() -> usize {
        3
    }
}

#[async_trait]
impl Strategy for UpfrontChainStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::UpfrontChain
    }

    async fn run_logged(&self, query: &str) -> Result<RunOutcome, GenerationError> {
        tracing::info!("Upfront-chain strategy starting ({} steps)", self.num_thoughts);
        let generator = self.generator.as_ref();
        let mut log = RunLog::new();

        let response = generator
            .generate(&prompt::chain(query, self.num_thoughts), prompt::CHAIN)
            .await?;
        let steps = split_steps(&response, self.num_thoughts);
        if steps.len() < self.num_thoughts {
            tracing::debug!(
                "Chain produced {} of {} requested steps",
                steps.len(),
                self.num_thoughts
            );
        }
        for step in &steps {
            log.push(LogEntryType::Thinking, step);
        }

        let reasoning = if steps.is_empty() {
            "No explicit reasoning steps.".to_string()
        } else {
            prompt::number_steps(&steps)
        };

        let observation = match catalog_if_any(&self.registry).await {
            Some(catalog) => {
                let decision_prompt = prompt::chain_decide(query, &reasoning, &catalog);
                let intent = decide(generator, &decision_prompt, &mut log).await?;
                act(&self.registry, &intent, self.observation_items, &mut log).await
            }
            None => None,
        };

        let answer_prompt = prompt::chain_answer(query, &reasoning, observation.as_deref());
        let answer = synthesize(generator, &answer_prompt, prompt::CHAIN_ANSWER, &mut log).await?;

        Ok(RunOutcome { answer, log })
    }
}
