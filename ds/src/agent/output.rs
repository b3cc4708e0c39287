//! Final answer handed back to the caller

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::ExecutionLog;
use crate::sandbox::Figure;

/// Highest confidence an error output may carry
pub const MAX_ERROR_CONFIDENCE: f64 = 0.3;

/// What kind of answer was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Analysis,
    Visualization,
    Explanation,
    Error,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutputKind::Analysis => "analysis",
            OutputKind::Visualization => "visualization",
            OutputKind::Explanation => "explanation",
            OutputKind::Error => "error",
        };
        f.write_str(s)
    }
}

/// The structured answer to one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalOutput {
    pub answer: String,
    /// Always within [0, 1]
    pub confidence: f64,
    pub output_type: OutputKind,
    pub result: Option<Value>,
    pub figures: Vec<Figure>,
    pub code: Option<String>,
    pub caveats: Vec<String>,
    pub reasoning_trace: Vec<String>,
    pub execution_log: Option<ExecutionLog>,
}

impl FinalOutput {
    pub fn new(answer: impl Into<String>, confidence: f64, output_type: OutputKind) -> Self {
        debug!(%output_type, confidence, "FinalOutput::new: called");
        Self {
            answer: answer.into(),
            confidence: clamp_confidence(confidence),
            output_type,
            result: None,
            figures: Vec::new(),
            code: None,
            caveats: Vec::new(),
            reasoning_trace: Vec::new(),
            execution_log: None,
        }
    }

    /// Error output: caveats are never empty and confidence stays at or below 0.3
    pub fn error(answer: impl Into<String>, confidence: f64, mut caveats: Vec<String>) -> Self {
        debug!(caveat_count = caveats.len(), "FinalOutput::error: called");
        if caveats.is_empty() {
            caveats.push("The analysis could not be completed".to_string());
        }
        let mut output = Self::new(answer, confidence.min(MAX_ERROR_CONFIDENCE), OutputKind::Error);
        output.caveats = caveats;
        output
    }

    pub fn with_result(mut self, result: Option<Value>) -> Self {
        self.result = result;
        self
    }

    pub fn with_figures(mut self, figures: Vec<Figure>) -> Self {
        self.figures = figures;
        self
    }

    pub fn with_code(mut self, code: Option<String>) -> Self {
        self.code = code;
        self
    }

    /// Append caveats, skipping duplicates
    pub fn with_caveats(mut self, caveats: impl IntoIterator<Item = String>) -> Self {
        for caveat in caveats {
            if !self.caveats.contains(&caveat) {
                self.caveats.push(caveat);
            }
        }
        self
    }

    pub fn with_trace(mut self, trace: Vec<String>) -> Self {
        self.reasoning_trace = trace;
        self
    }

    pub fn with_log(mut self, log: ExecutionLog) -> Self {
        self.execution_log = Some(log);
        self
    }
}

/// Clamp to [0, 1]; NaN becomes 0
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}
