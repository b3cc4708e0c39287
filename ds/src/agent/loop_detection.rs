//! Repetition safeguard for the tool-calling loop

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Number of trailing calls inspected
const WINDOW: usize = 4;

/// Failures within the window that count as a loop
const MIN_ERRORS: usize = 2;

/// Corrective instruction injected when a loop is detected
pub const DIVERGENCE_MESSAGE: &str = "LOOP DETECTED: You've tried the same approach multiple times without success.

You MUST try a DIFFERENT approach. Options:
1. Use a completely different statistical method
2. Simplify the analysis (fewer variables, simpler aggregation)
3. Explain why this analysis cannot be performed with available data

Do NOT repeat the same tool call.";

/// One entry of the tool-call history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub had_error: bool,
}

impl ToolCallRecord {
    pub fn new(name: impl Into<String>, had_error: bool) -> Self {
        Self {
            name: name.into(),
            had_error,
        }
    }
}

/// True iff the last four calls share one tool name and at least two of them failed
pub fn detect_loop(history: &[ToolCallRecord]) -> bool {
    if history.len() < WINDOW {
        return false;
    }
    let recent = &history[history.len() - WINDOW..];
    let same_tool = recent.iter().all(|r| r.name == recent[0].name);
    let errors = recent.iter().filter(|r| r.had_error).count();
    let detected = same_tool && errors >= MIN_ERRORS;
    if detected {
        debug!(tool = %recent[0].name, errors, "detect_loop: repetition detected");
    }
    detected
}
