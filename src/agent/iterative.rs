//! Iterative strategy: think, optionally act, observe, repeat.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{GenerationError, Generator};
use crate::tools::CapabilityRegistry;

use super::log::{LogEntryType, RunLog, RunOutcome};
use super::synthesis::{act, catalog_if_any, decide, synthesize};
use super::{prompt, Strategy, StrategyKind};

/// Phrases in a thought that end the loop early.
const COMPLETION_PHRASES: [&str; 4] = [
    "have enough",
    "can now answer",
    "task complete",
    "have the answer",
];

/// One entry of the running transcript fed back into every prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReasoningStep {
    Thought(String),
    Action(String),
    Observation(String),
}

impl fmt::Display for ReasoningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thought(text) => write!(f, "Thought: {}", text),
            Self::Action(text) => write!(f, "Action: {}", text),
            Self::Observation(text) => write!(f, "Observation: {}", text),
        }
    }
}

fn render_transcript(steps: &[ReasoningStep]) -> String {
    if steps.is_empty() {
        return "Starting fresh.".to_string();
    }
    steps
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn signals_completion(thought: &str) -> bool {
    let lower = thought.to_lowercase();
    COMPLETION_PHRASES.iter().any(|p| lower.contains(p))
}

/// Think/act/observe loop bounded by `max_steps`.
pub struct IterativeStrategy {
    generator: Arc<dyn Generator>,
    registry: Arc<CapabilityRegistry>,
    max_steps: usize,
    observation_items: usize,
}

impl IterativeStrategy {
    pub fn new(
        generator: Arc<dyn Generator>,
        registry: Arc<CapabilityRegistry>,
        max_steps: usize,
        observation_items: usize,
    ) -> Self {
        Self {
            generator,
            registry,
            max_steps,
            observation_items,
        }
    }

    /// Upper bound on generation calls for one run: two per step plus the answer.
    pub fn max_generation_calls(max_steps: usize) -> usize {
        max_steps.saturating_mul(2).saturating_add(1)
    }
}

#[async_trait]
impl Strategy for IterativeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Iterative
    }

    async fn run_logged(&self, query: &str) -> Result<RunOutcome, GenerationError> {
        tracing::info!("Iterative strategy starting (max {} steps)", self.max_steps);
        let generator = self.generator.as_ref();
        let mut log = RunLog::new();
        let mut transcript: Vec<ReasoningStep> = Vec::new();

        for step in 1..=self.max_steps {
            tracing::debug!("Iterative step {}/{}", step, self.max_steps);

            let think_prompt = prompt::think(query, &render_transcript(&transcript), step);
            let thought = generator
                .generate(&think_prompt, prompt::THINK)
                .await?
                .trim()
                .to_string();
            log.push(LogEntryType::Thinking, &thought);
            transcript.push(ReasoningStep::Thought(thought.clone()));

            if signals_completion(&thought) {
                tracing::info!("Reasoning complete after {} step(s)", step);
                break;
            }

            let Some(catalog) = catalog_if_any(&self.registry).await else {
                tracing::debug!("No capabilities registered, moving to the answer");
                break;
            };

            let intent = decide(generator, &prompt::iterative_decide(&thought, &catalog), &mut log).await?;
            let Some(observation) = act(&self.registry, &intent, self.observation_items, &mut log).await
            else {
                tracing::debug!("No action chosen at step {}", step);
                break;
            };

            if let Some((name, args)) = intent.action() {
                transcript.push(ReasoningStep::Action(format!(
                    "{} {}",
                    name,
                    Value::Object(args.clone())
                )));
            }
            transcript.push(ReasoningStep::Observation(observation));

            if step == self.max_steps {
                tracing::info!("Step bound reached, answering with what is known");
            }
        }

        let answer_prompt = prompt::iterative_answer(query, &render_transcript(&transcript));
        let answer = synthesize(generator, &answer_prompt, prompt::ITERATIVE_ANSWER, &mut log).await?;

        Ok(RunOutcome { answer, log })
    }
}
