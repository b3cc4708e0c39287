//! Execution sandbox
//!
//! Code text goes in; a success flag with either a result payload or a list of
//! figures comes out. Runner failures never escape as errors: a spawn failure,
//! a timeout and a Python exception all come back as failed outcomes.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::data::DatasetRegistry;

mod lint;
mod python;

pub use lint::scan_suspicious_literals;
pub use python::PythonSandbox;

/// What the code is expected to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// A `result` variable is required
    Analysis,
    /// The figure list is returned, possibly empty
    Visualization,
    /// Figures win, then `result`
    #[default]
    Auto,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Analysis => "analysis",
            ExecutionMode::Visualization => "visualization",
            ExecutionMode::Auto => "auto",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of rendered figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FigureKind {
    /// Plotly figure JSON
    Plotly,
    /// Base64 PNG
    Matplotlib,
    /// Plain data appended to `figures`
    Data,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    pub kind: FigureKind,
    pub data: Value,
}

/// Successful payload of an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecutionOutput {
    Analysis { result_str: String, result: Value },
    Visualization { figures: Vec<Figure> },
}

/// Outcome of one sandbox call
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: Option<ExecutionOutput>,
    /// Empty on success
    pub error: String,
    /// Non-blocking findings such as suspicious literal results
    pub warnings: Vec<String>,
    /// Text the code printed
    pub stdout: String,
    pub duration_ms: u64,
}

impl ExecutionOutcome {
    pub fn analysis(result_str: impl Into<String>, result: Value) -> Self {
        Self {
            success: true,
            output: Some(ExecutionOutput::Analysis {
                result_str: result_str.into(),
                result,
            }),
            ..Default::default()
        }
    }

    pub fn visualization(figures: Vec<Figure>) -> Self {
        Self {
            success: true,
            output: Some(ExecutionOutput::Visualization { figures }),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            ..Default::default()
        }
    }

    pub fn is_visualization(&self) -> bool {
        matches!(self.output, Some(ExecutionOutput::Visualization { .. }))
    }

    /// Printable form of the payload
    pub fn result_str(&self) -> String {
        match &self.output {
            Some(ExecutionOutput::Analysis { result_str, .. }) => result_str.clone(),
            Some(ExecutionOutput::Visualization { figures }) => format!("Generated {} visualization(s)", figures.len()),
            None => String::new(),
        }
    }

    /// `(success, result_str, error)`
    pub fn analysis_triple(&self) -> (bool, String, String) {
        (self.success, self.result_str(), self.error.clone())
    }

    /// `(success, figures, error)`
    pub fn visualization_triple(&self) -> (bool, Vec<Figure>, String) {
        (self.success, self.figures(), self.error.clone())
    }

    /// The `result` value of an analysis run
    pub fn analysis_result(&self) -> Option<Value> {
        match &self.output {
            Some(ExecutionOutput::Analysis { result, .. }) => Some(result.clone()),
            _ => None,
        }
    }

    pub fn figures(&self) -> Vec<Figure> {
        match &self.output {
            Some(ExecutionOutput::Visualization { figures }) => figures.clone(),
            _ => Vec::new(),
        }
    }
}

/// Errors inside a runner; converted to failed outcomes at the boundary
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to start interpreter: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Execution timeout: code exceeded {0} seconds")]
    Timeout(f64),

    #[error("Sandbox protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Anything that can run analysis code against the registered datasets
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn execute(&self, code: &str, datasets: &DatasetRegistry, mode: ExecutionMode) -> ExecutionOutcome;
}

#[cfg(test)]
pub mod stub {
    use super::*;
    use std::sync::Mutex;

    /// Runner that returns canned outcomes in order and records the code it saw
    pub struct StubRunner {
        outcomes: Mutex<Vec<ExecutionOutcome>>,
        codes: Mutex<Vec<String>>,
    }

    impl StubRunner {
        pub fn new(outcomes: Vec<ExecutionOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into_iter().rev().collect()),
                codes: Mutex::new(Vec::new()),
            }
        }

        pub fn codes(&self) -> Vec<String> {
            self.codes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CodeRunner for StubRunner {
        async fn execute(&self, code: &str, _datasets: &DatasetRegistry, _mode: ExecutionMode) -> ExecutionOutcome {
            self.codes.lock().unwrap().push(code.to_string());
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| ExecutionOutcome::failure("No more stub outcomes"))
        }
    }
}
