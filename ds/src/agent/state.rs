//! Per-question working state of the tool-calling agent

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{RetrievedExample, ToolCallRecord};
use crate::data::DatasetRegistry;
use crate::llm::Message;
use crate::sandbox::ExecutionOutcome;
use crate::stages::Validation;

/// A failed execution, kept so later code generation can avoid repeating it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedAttempt {
    /// First 200 characters of the code
    pub approach: String,
    pub error: String,
}

/// Everything the orchestrator and tools know while answering one question
#[derive(Debug, Clone)]
pub struct AgentState {
    pub question: String,
    pub datasets: Arc<DatasetRegistry>,

    /// Append-only within a run
    pub messages: Vec<Message>,
    pub retrieved_examples: Vec<RetrievedExample>,

    /// 0 <= iterations <= max_iterations
    pub iterations: u32,
    /// Grows only through validation bonuses
    pub max_iterations: u32,

    pub current_code: Option<String>,
    /// Last successful execution
    pub current_results: Option<ExecutionOutcome>,
    pub validation: Option<Validation>,
    pub data_profile: Option<Value>,

    pub failed_attempts: Vec<FailedAttempt>,
    /// Append-only
    pub tool_call_history: Vec<ToolCallRecord>,
}

impl AgentState {
    pub fn new(question: impl Into<String>, datasets: Arc<DatasetRegistry>, max_iterations: u32) -> Self {
        let question = question.into();
        debug!(%question, max_iterations, "AgentState::new: called");
        Self {
            question,
            datasets,
            messages: Vec::new(),
            retrieved_examples: Vec::new(),
            iterations: 0,
            max_iterations,
            current_code: None,
            current_results: None,
            validation: None,
            data_profile: None,
            failed_attempts: Vec::new(),
            tool_call_history: Vec::new(),
        }
    }

    pub fn has_results(&self) -> bool {
        self.current_results.as_ref().is_some_and(|r| r.success)
    }

    pub fn is_validated(&self) -> bool {
        self.validation.is_some()
    }

    /// Record a failed execution; the approach is the first 200 characters of the code
    pub fn record_failure(&mut self, code: &str, error: impl Into<String>) {
        let approach: String = code.chars().take(200).collect();
        debug!(failures = self.failed_attempts.len() + 1, "AgentState::record_failure: called");
        self.failed_attempts.push(FailedAttempt {
            approach,
            error: error.into(),
        });
    }

    /// Extend the budget, used when results validate
    pub fn grant_bonus(&mut self, bonus: u32) {
        debug!(bonus, max_iterations = self.max_iterations, "AgentState::grant_bonus: called");
        self.max_iterations += bonus;
    }
}
