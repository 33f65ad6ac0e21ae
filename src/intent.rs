//! Structured-intent parsing.
//!
//! Generators are asked to answer decision prompts with a single JSON
//! object, and they routinely wrap it in prose, code fences or both. This
//! module recovers the object anyway:
//!
//! 1. trim the text;
//! 2. if a ``` fence is present, narrow to the first fenced segment that
//!    contains both delimiters;
//! 3. take the span from the first `{` to the last `}`;
//! 4. decode it strictly with `serde_json`;
//! 5. validate its shape.
//!
//! Everything here is pure. Callers absorb [`ParseFailure`]: a decision that
//! cannot be parsed means "no capability needed", a score that cannot be
//! parsed means "neutral score".

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Score assigned to a path whose evaluation cannot be parsed.
pub const NEUTRAL_SCORE: f64 = 5.0;
pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 10.0;

const WANTS_KEYS: &[&str] = &["wants_action", "needs_tool", "needs_action"];
const NAME_KEYS: &[&str] = &["capability", "capability_name", "tool_name", "tool"];
const ARGUMENT_KEYS: &[&str] = &["arguments", "parameters", "args"];
const SCORE_KEYS: &[&str] = &["score", "rating"];
const EVALUATION_KEYS: &[&str] = &["evaluation", "rationale", "reason"];
const ITEM_TEXT_KEYS: &[&str] = &["step", "option", "content", "text", "description"];

/// Why generated text did not yield a structured decision.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseFailure {
    #[error("no JSON object found")]
    NoObject,

    #[error("no list found")]
    NoList,

    #[error("malformed JSON: {0}")]
    Decode(String),

    #[error("unexpected shape: {0}")]
    Shape(String),
}

/// The parsed decision of whether (and how) to invoke a capability.
///
/// When `wants_action` is false, `capability_name` is `None` and
/// `arguments` is empty.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionIntent {
    pub wants_action: bool,
    pub capability_name: Option<String>,
    pub arguments: Map<String, Value>,
}

impl ActionIntent {
    /// "No capability needed".
    pub fn none() -> Self {
        Self::default()
    }

    /// Invoke `name` with `arguments`.
    pub fn invoke(name: &str, arguments: Map<String, Value>) -> Self {
        Self {
            wants_action: true,
            capability_name: Some(name.to_string()),
            arguments,
        }
    }

    /// The capability to invoke, if any.
    pub fn action(&self) -> Option<(&str, &Map<String, Value>)> {
        match (self.wants_action, &self.capability_name) {
            (true, Some(name)) => Some((name.as_str(), &self.arguments)),
            _ => None,
        }
    }
}

/// Parsed score and rationale for one reasoning path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathEvaluation {
    /// Always within `[MIN_SCORE, MAX_SCORE]`.
    pub score: f64,
    pub evaluation: String,
}

impl PathEvaluation {
    /// The evaluation used when the generator's answer is unusable.
    pub fn neutral() -> Self {
        Self {
            score: NEUTRAL_SCORE,
            evaluation: "Could not evaluate path".to_string(),
        }
    }
}

/// Narrow `text` to the first ```-fenced segment containing both delimiters.
fn narrow_to_fence(text: &str, open: char, close: char) -> &str {
    if !text.contains("```") {
        return text;
    }
    text.split("```")
        .find(|part| part.contains(open) && part.contains(close))
        .unwrap_or(text)
}

/// Locate the `{ ... }` span a generator meant as its structured answer.
pub fn extract_object(text: &str) -> Result<&str, ParseFailure> {
    let narrowed = narrow_to_fence(text.trim(), '{', '}');
    let start = narrowed.find('{').ok_or(ParseFailure::NoObject)?;
    let end = narrowed.rfind('}').ok_or(ParseFailure::NoObject)?;
    if end < start {
        return Err(ParseFailure::NoObject);
    }
    Ok(&narrowed[start..=end])
}

/// Extract and strictly decode the JSON object in `text`.
pub fn decode_object(text: &str) -> Result<Map<String, Value>, ParseFailure> {
    let span = extract_object(text)?;
    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ParseFailure::Shape(format!("expected object, got {}", other))),
        Err(e) => Err(ParseFailure::Decode(e.to_string())),
    }
}

fn field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| object.get(*k))
}

/// Parse an action decision.
///
/// A boolean `wants_action` (or `needs_tool`) is required. When it is true a
/// non-empty capability name is required; the arguments map defaults to
/// empty and may be `null`.
pub fn parse_action_intent(text: &str) -> Result<ActionIntent, ParseFailure> {
    let object = decode_object(text)?;

    let wants_action = field(&object, WANTS_KEYS)
        .ok_or_else(|| ParseFailure::Shape("missing wants_action".to_string()))?
        .as_bool()
        .ok_or_else(|| ParseFailure::Shape("wants_action must be a boolean".to_string()))?;
    if !wants_action {
        return Ok(ActionIntent::none());
    }

    let name = field(&object, NAME_KEYS)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ParseFailure::Shape("missing capability name".to_string()))?;

    let arguments = match field(&object, ARGUMENT_KEYS) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            return Err(ParseFailure::Shape(format!(
                "arguments must be an object, got {}",
                other
            )))
        }
    };

    Ok(ActionIntent::invoke(name, arguments))
}

/// Parse a decision, treating any failure as "no capability needed".
pub fn decide(text: &str) -> ActionIntent {
    match parse_action_intent(text) {
        Ok(intent) => {
            match intent.action() {
                Some((name, args)) => {
                    let shown = Value::Object(args.clone());
                    tracing::info!("Decided to invoke {} with {}", name, shown);
                }
                None => tracing::info!("Decided no capability is needed"),
            }
            intent
        }
        Err(e) => {
            tracing::warn!("Could not parse decision ({}): {}", e, preview(text, 150));
            ActionIntent::none()
        }
    }
}

fn score_value(value: &Value) -> Option<f64> {
    let score = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches("/10").trim().parse().ok(),
        _ => None,
    }?;
    score.is_finite().then(|| score.clamp(MIN_SCORE, MAX_SCORE))
}

fn prose_score(text: &str) -> Option<f64> {
    static SCORE_RE: OnceLock<Regex> = OnceLock::new();
    let re = SCORE_RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:score"?\s*[:=]\s*(\d+(?:\.\d+)?))|(?:(\d+(?:\.\d+)?)\s*/\s*10\b)"#)
            .expect("score pattern is valid")
    });
    let caps = re.captures(text)?;
    let raw = caps.get(1).or_else(|| caps.get(2))?.as_str();
    raw.parse::<f64>()
        .ok()
        .filter(|s| s.is_finite())
        .map(|s| s.clamp(MIN_SCORE, MAX_SCORE))
}

/// Parse a path evaluation: a numeric score in `[0, 10]` plus rationale.
///
/// Prefers a JSON object with `score`/`evaluation`; when none is present, a
/// `score: N` or `N/10` mention in the prose is accepted and the prose is
/// used as the rationale.
pub fn parse_path_evaluation(text: &str) -> Result<PathEvaluation, ParseFailure> {
    match decode_object(text) {
        Ok(object) => {
            let score = field(&object, SCORE_KEYS)
                .and_then(score_value)
                .ok_or_else(|| ParseFailure::Shape("missing numeric score".to_string()))?;
            let evaluation = field(&object, EVALUATION_KEYS)
                .and_then(Value::as_str)
                .unwrap_or("No evaluation")
                .to_string();
            Ok(PathEvaluation { score, evaluation })
        }
        Err(err) => match prose_score(text) {
            Some(score) => Ok(PathEvaluation {
                score,
                evaluation: text.trim().to_string(),
            }),
            None => Err(err),
        },
    }
}

fn item_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Object(object) => field(object, ITEM_TEXT_KEYS)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| value.to_string()),
        Value::Null => return None,
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn listed_lines(text: &str) -> Vec<String> {
    static ITEM_RE: OnceLock<Regex> = OnceLock::new();
    let re = ITEM_RE.get_or_init(|| {
        Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+(.+?)\s*$").expect("list item pattern is valid")
    });
    text.lines()
        .filter_map(|line| re.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.trim().to_lowercase()))
        .collect()
}

/// Parse a list of candidate strings, e.g. branch continuations.
///
/// Accepts a JSON array (fence-aware, first `[` to last `]`), falling back
/// to numbered or bulleted lines. Blank and duplicate (case-insensitive)
/// entries are dropped; order is kept. Recovering nothing is a failure.
pub fn parse_string_list(text: &str) -> Result<Vec<String>, ParseFailure> {
    let trimmed = text.trim();
    let narrowed = narrow_to_fence(trimmed, '[', ']');

    let from_json = match (narrowed.find('['), narrowed.rfind(']')) {
        (Some(start), Some(end)) if start < end => {
            match serde_json::from_str::<Value>(&narrowed[start..=end]) {
                Ok(Value::Array(items)) => Some(items.iter().filter_map(item_text).collect()),
                _ => None,
            }
        }
        _ => None,
    };

    let items = match from_json {
        Some(items) => items,
        None => listed_lines(trimmed),
    };
    let items = dedupe(items);
    if items.is_empty() {
        return Err(ParseFailure::NoList);
    }
    Ok(items)
}

/// First `max_chars` characters of `text`, for log lines.
pub fn preview(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BARE: &str =
        r#"{"wants_action": true, "capability": "web_search", "arguments": {"query": "python tutorials"}}"#;

    fn expected() -> ActionIntent {
        let mut args = Map::new();
        args.insert("query".into(), json!("python tutorials"));
        ActionIntent::invoke("web_search", args)
    }

    #[test]
    fn parses_bare_object() {
        assert_eq!(parse_action_intent(BARE).unwrap(), expected());
    }

    #[test]
    fn prose_and_fences_recover_the_same_decision() {
        let wrapped = [
            format!("Sure! Here is my decision:\n{}\nHope that helps.", BARE),
            format!("```json\n{}\n```", BARE),
            format!("I think so.\n```\n{}\n```\nDone.", BARE),
            format!("   \n\n{}\n\n", BARE),
        ];
        for text in &wrapped {
            assert_eq!(parse_action_intent(text).unwrap(), expected(), "input: {}", text);
        }
    }

    #[test]
    fn fence_without_braces_falls_back_to_whole_text() {
        let text = format!("```python\nprint('hi')\n```\n{}", BARE);
        assert_eq!(parse_action_intent(&text).unwrap(), expected());
    }

    #[test]
    fn original_field_names_are_accepted() {
        let text = r#"{"needs_tool": true, "tool_name": "web_search", "parameters": {"query": "python tutorials"}}"#;
        assert_eq!(parse_action_intent(text).unwrap(), expected());
    }

    #[test]
    fn no_action_clears_name_and_arguments() {
        let text = r#"{"wants_action": false, "capability": "web_search", "arguments": {"q": 1}}"#;
        let intent = parse_action_intent(text).unwrap();
        assert_eq!(intent, ActionIntent::none());
        assert!(intent.action().is_none());
    }

    #[test]
    fn null_arguments_default_to_empty() {
        let text = r#"{"needs_tool": true, "tool_name": "current_time", "parameters": null}"#;
        let intent = parse_action_intent(text).unwrap();
        assert_eq!(intent.capability_name.as_deref(), Some("current_time"));
        assert!(intent.arguments.is_empty());
    }

    #[test]
    fn shape_errors() {
        assert!(matches!(
            parse_action_intent(r#"{"capability": "x"}"#),
            Err(ParseFailure::Shape(_))
        ));
        assert!(matches!(
            parse_action_intent(r#"{"wants_action": "yes"}"#),
            Err(ParseFailure::Shape(_))
        ));
        assert!(matches!(
            parse_action_intent(r#"{"wants_action": true}"#),
            Err(ParseFailure::Shape(_))
        ));
        assert!(matches!(
            parse_action_intent(r#"{"wants_action": true, "capability": "x", "arguments": [1]}"#),
            Err(ParseFailure::Shape(_))
        ));
    }

    #[test]
    fn decide_keeps_a_parsed_invocation() {
        assert_eq!(decide(BARE), expected());
        assert_eq!(decide(r#"{"wants_action": false}"#), ActionIntent::none());
    }

    #[test]
    fn unrecoverable_text_means_no_action() {
        for text in [
            "",
            "I don't think we need any tool here.",
            "} backwards {",
            "{not json at all}",
            "[1, 2, 3]",
        ] {
            assert!(parse_action_intent(text).is_err(), "input: {}", text);
            assert_eq!(decide(text), ActionIntent::none());
        }
    }

    #[test]
    fn evaluation_from_json() {
        let text = r#"Here you go: {"score": 7.5, "evaluation": "Solid plan", "strengths": []}"#;
        let eval = parse_path_evaluation(text).unwrap();
        assert_eq!(eval.score, 7.5);
        assert_eq!(eval.evaluation, "Solid plan");
    }

    #[test]
    fn evaluation_scores_are_clamped_and_coerced() {
        assert_eq!(parse_path_evaluation(r#"{"score": 14}"#).unwrap().score, 10.0);
        assert_eq!(parse_path_evaluation(r#"{"score": -2}"#).unwrap().score, 0.0);
        assert_eq!(parse_path_evaluation(r#"{"score": "8/10"}"#).unwrap().score, 8.0);
        assert_eq!(
            parse_path_evaluation(r#"{"score": 6}"#).unwrap().evaluation,
            "No evaluation"
        );
        assert!(parse_path_evaluation(r#"{"evaluation": "no score"}"#).is_err());
    }

    #[test]
    fn evaluation_from_prose() {
        assert_eq!(
            parse_path_evaluation("I'd rate this path 8.5/10 overall.").unwrap().score,
            8.5
        );
        assert_eq!(parse_path_evaluation("Score: 3").unwrap().score, 3.0);
        // Cut off mid-object, so only the quoted key survives.
        let truncated = r#"{"score": 8.5, "evaluation": "This path is strong because"#;
        assert_eq!(parse_path_evaluation(truncated).unwrap().score, 8.5);
        assert!(parse_path_evaluation("Looks fine to me").is_err());
    }

    #[test]
    fn string_list_from_json_array() {
        let text = "```json\n[\"Check docs\", \"Ask a friend\", \"check DOCS\", \"\"]\n```";
        assert_eq!(
            parse_string_list(text).unwrap(),
            vec!["Check docs".to_string(), "Ask a friend".to_string()]
        );
    }

    #[test]
    fn string_list_from_objects_and_numbers() {
        let text = r#"[{"option": "Plan A"}, 42, null]"#;
        assert_eq!(
            parse_string_list(text).unwrap(),
            vec!["Plan A".to_string(), "42".to_string()]
        );
    }

    #[test]
    fn string_list_from_numbered_lines() {
        let text = "Options:\n1. Search the web\n2) Read the manual\n- Ask support";
        assert_eq!(
            parse_string_list(text).unwrap(),
            vec!["Search the web", "Read the manual", "Ask support"]
        );
    }

    #[test]
    fn string_list_failure() {
        assert_eq!(parse_string_list("nothing useful"), Err(ParseFailure::NoList));
        assert_eq!(parse_string_list("[]"), Err(ParseFailure::NoList));
    }

    #[test]
    fn preview_truncates_on_char_boundaries() {
        assert_eq!(preview("héllo wörld", 5), "héllo...");
        assert_eq!(preview("  short ", 10), "short");
    }
}
