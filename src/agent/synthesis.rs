//! Pieces every strategy shares: asking for a capability decision, carrying
//! it out, turning the outcome into observation text, and producing the
//! final answer.

use serde_json::Value;

use crate::intent::{self, ActionIntent};
use crate::llm::{GenerationError, GenerationOptions, Generator};
use crate::tools::{CapabilityOutcome, CapabilityRegistry};

use super::log::{LogEntryType, RunLog};
use super::prompt;

/// Answer used when the generator returns only whitespace.
const EMPTY_ANSWER: &str = "I was unable to produce an answer to this request.";

/// The registry catalog, or `None` when nothing is registered.
///
/// Strategies skip the decision call entirely in the `None` case.
pub async fn catalog_if_any(registry: &CapabilityRegistry) -> Option<String> {
    if registry.is_empty().await {
        None
    } else {
        Some(registry.catalog().await)
    }
}

/// Ask the generator whether a capability should be used.
///
/// Unusable responses become "no action"; only generation faults escape.
pub async fn decide(
    generator: &dyn Generator,
    decision_prompt: &str,
    log: &mut RunLog,
) -> Result<ActionIntent, GenerationError> {
    let response = generator.generate(decision_prompt, prompt::DECIDE).await?;
    let intent = intent::decide(&response);
    match intent.action() {
        Some((name, args)) => log.push(
            LogEntryType::Decision,
            format!("invoke {} with {}", name, Value::Object(args.clone())),
        ),
        None => log.push(LogEntryType::Decision, "no capability needed"),
    }
    Ok(intent)
}

/// Carry out `intent`, returning the observation text.
///
/// Returns `None` when the intent asks for no action. Capability failures
/// come back as `Error: ...` observations rather than errors.
pub async fn act(
    registry: &CapabilityRegistry,
    intent: &ActionIntent,
    max_items: usize,
    log: &mut RunLog,
) -> Option<String> {
    let (name, args) = intent.action()?;
    log.push(
        LogEntryType::ToolCall,
        format!("{} {}", name, Value::Object(args.clone())),
    );

    let outcome = registry.invoke(name, args.clone()).await;
    if !outcome.success {
        tracing::warn!(
            "Capability {} failed: {}",
            name,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }

    let observation = format_observation(&outcome, max_items);
    log.push(LogEntryType::ToolResult, &observation);
    Some(observation)
}

/// Render a capability outcome as text for the next prompt.
pub fn format_observation(outcome: &CapabilityOutcome, max_items: usize) -> String {
    if !outcome.success {
        return format!(
            "Error: {}",
            outcome.error.as_deref().unwrap_or("capability failed")
        );
    }

    match &outcome.data {
        Value::Null => "No data returned".to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) if items.is_empty() => "No results found".to_string(),
        Value::Array(items) => items
            .iter()
            .take(max_items)
            .enumerate()
            .map(|(i, item)| format!("{}. {}", i + 1, format_item(item)))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn format_item(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        Value::Object(record) => match record.get("title").and_then(Value::as_str) {
            Some(title) => {
                let snippet = record
                    .get("snippet")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if snippet.is_empty() {
                    title.to_string()
                } else {
                    format!("{}: {}", title, snippet)
                }
            }
            None => item.to_string(),
        },
        other => other.to_string(),
    }
}

/// Produce the final answer from a synthesis prompt.
///
/// The answer is never empty.
pub async fn synthesize(
    generator: &dyn Generator,
    synthesis_prompt: &str,
    options: GenerationOptions,
    log: &mut RunLog,
) -> Result<String, GenerationError> {
    let response = generator.generate(synthesis_prompt, options).await?;
    let answer = match response.trim() {
        "" => {
            tracing::warn!("Generator returned an empty answer");
            EMPTY_ANSWER.to_string()
        }
        text => text.to_string(),
    };
    log.push(LogEntryType::Response, &answer);
    Ok(answer)
}
