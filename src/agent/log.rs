//! Per-run audit log.

use serde::Serialize;

const MAX_ENTRY_CHARS: usize = 2000;

/// A single entry in a run's log.
#[derive(Debug, Clone, Serialize)]
pub struct RunLogEntry {
    /// Timestamp (RFC 3339)
    pub timestamp: String,

    /// Entry type
    pub entry_type: LogEntryType,

    /// Content of the entry (truncated)
    pub content: String,
}

/// Types of log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEntryType {
    /// A reasoning step or candidate continuation
    Thinking,
    /// A parsed capability decision
    Decision,
    /// A capability is being invoked
    ToolCall,
    /// A capability returned (observation text)
    ToolResult,
    /// A reasoning path was scored
    Evaluation,
    /// The final answer
    Response,
}

/// Ordered record of what a strategy did during one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunLog {
    entries: Vec<RunLogEntry>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry_type: LogEntryType, content: impl AsRef<str>) {
        self.entries.push(RunLogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            entry_type,
            content: truncate_for_log(content.as_ref(), MAX_ENTRY_CHARS),
        });
    }

    pub fn entries(&self) -> &[RunLogEntry] {
        &self.entries
    }

    /// Number of entries of the given type.
    pub fn count(&self, entry_type: LogEntryType) -> usize {
        self.entries
            .iter()
            .filter(|e| e.entry_type == entry_type)
            .count()
    }
}

/// What a strategy run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub answer: String,
    pub log: RunLog,
}

/// Truncate a string for logging purposes.
fn truncate_for_log(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}... [truncated]", head)
    }
}
