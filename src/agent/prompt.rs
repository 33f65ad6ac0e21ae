//! Prompt templates for the reasoning strategies.
//!
//! Decision prompts all ask for the same JSON shape, which
//! [`crate::intent::parse_action_intent`] understands.

use crate::llm::GenerationOptions;

pub const THINK: GenerationOptions = GenerationOptions::new(0.7, 150);
pub const DECIDE: GenerationOptions = GenerationOptions::new(0.1, 200);
pub const ITERATIVE_ANSWER: GenerationOptions = GenerationOptions::new(0.7, 300);
pub const CHAIN: GenerationOptions = GenerationOptions::new(0.7, 400);
pub const CHAIN_ANSWER: GenerationOptions = GenerationOptions::new(0.5, 500);
pub const BRANCH: GenerationOptions = GenerationOptions::new(0.8, 300);
pub const EVALUATE: GenerationOptions = GenerationOptions::new(0.3, 300);
pub const BRANCHING_ANSWER: GenerationOptions = GenerationOptions::new(0.5, 600);

const DECISION_FORMAT: &str = r#"Respond with ONLY valid JSON (no explanation, no markdown):
{"wants_action": true, "capability": "<capability name>", "arguments": {"<parameter>": "<value>"}}

OR if no capability is needed:
{"wants_action": false}

JSON:"#;

/// Render items as `Step 1: ...` lines.
pub fn number_steps(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("Step {}: {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn think(query: &str, transcript: &str, step: usize) -> String {
    format!(
        r#"Task: {query}

Previous steps:
{transcript}

Step {step}: What should I think about next? What do I still need to know?
If I already have everything required, say "I have enough information".

Thought:"#
    )
}

pub fn iterative_decide(thought: &str, catalog: &str) -> String {
    format!(
        r#"Thought: {thought}

Available capabilities:
{catalog}

Decide whether a capability is needed to act on this thought.
- If the thought says it needs to search, find, look up or fetch current information, use the matching capability.
- If the thought can be acted on from knowledge or logic alone, no capability is needed.

{DECISION_FORMAT}"#
    )
}

pub fn iterative_answer(query: &str, transcript: &str) -> String {
    format!(
        r#"Original question: {query}

My reasoning process:
{transcript}

Based on everything above, provide a clear final answer. If the task could not be completed, say so and explain what is missing.

Answer:"#
    )
}

pub fn chain(query: &str, num_thoughts: usize) -> String {
    format!(
        r#"Question: {query}

Let's think through this step by step, in {num_thoughts} numbered steps ("Step 1:", "Step 2:", ...).

Step 1:"#
    )
}

pub fn chain_decide(query: &str, reasoning: &str, catalog: &str) -> String {
    format!(
        r#"Question: {query}

My reasoning:
{reasoning}

Available capabilities:
{catalog}

Decide whether a capability is needed to answer this question.
- If I need current information, facts or data I don't have, use the matching capability.
- If I can answer from pure logic or reasoning alone, no capability is needed.

Examples:
- "What is 2+2?" -> no capability (pure logic)
- "What are the best Python tutorials?" -> search capability (needs current data)
- "If A>B and B>C, is A>C?" -> no capability (logical deduction)

{DECISION_FORMAT}"#
    )
}

pub fn chain_answer(query: &str, reasoning: &str, observation: Option<&str>) -> String {
    match observation {
        Some(observation) => format!(
            r#"Question: {query}

My reasoning:
{reasoning}

Information found:
{observation}

Based on my reasoning and the information found, provide a clear, comprehensive final answer.

Answer:"#
        ),
        None => format!(
            r#"Question: {query}

My reasoning:
{reasoning}

Based on my reasoning alone, provide a clear, comprehensive final answer.

Answer:"#
        ),
    }
}

pub fn branches(query: &str, path: &str, num_branches: usize, depth: usize) -> String {
    format!(
        r#"Original question: {query}

Current reasoning path:
{path}

Generate {num_branches} DIFFERENT possible next steps or approaches.
Each should be a distinct way to proceed.

For depth {depth}, consider:
- Different strategies
- Alternative perspectives
- Various solutions

Respond with ONLY a JSON array of {num_branches} distinct options:
["option 1", "option 2", "option 3"]

JSON:"#
    )
}

pub fn evaluate(query: &str, path: &str, criteria: &[String]) -> String {
    let criteria = criteria.join(", ");
    format!(
        r#"Original question: {query}

Reasoning path to evaluate:
{path}

Evaluate this reasoning path based on: {criteria}

Respond with ONLY valid JSON:
{{"score": 7.5, "evaluation": "This path is good because... However..."}}

Score must be between 0 and 10 (10 is best).

JSON:"#
    )
}

pub fn branching_decide(query: &str, path: &str, catalog: &str) -> String {
    format!(
        r#"Query: {query}

Best reasoning path selected:
{path}

Available capabilities:
{catalog}

Decide whether a capability is needed to carry out this approach.

{DECISION_FORMAT}"#
    )
}

pub fn branching_answer(
    query: &str,
    path: &str,
    score: f64,
    evaluation: &str,
    observation: Option<&str>,
) -> String {
    let gathered = observation
        .map(|o| format!("\nAdditional information gathered:\n{}\n", o))
        .unwrap_or_default();
    let basis = if observation.is_some() {
        "the selected approach and information gathered"
    } else {
        "this approach"
    };
    format!(
        r#"Question: {query}

Best reasoning approach (score: {score:.1}/10):
{path}

Why this approach is best:
{evaluation}
{gathered}
Based on {basis}, provide a comprehensive final answer.

Answer:"#
    )
}
