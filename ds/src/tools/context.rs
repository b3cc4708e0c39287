//! ToolContext - what a tool may touch while it runs

use tracing::debug;

use crate::agent::AgentState;
use crate::sandbox::CodeRunner;
use crate::stages::Oracle;

/// Execution context for one tool call
///
/// Borrowed from the orchestrator for the duration of the call; tools write
/// their effects (profile, code, results, validation) straight into the state.
pub struct ToolContext<'a> {
    pub state: &'a mut AgentState,
    pub oracle: &'a Oracle,
    pub runner: &'a dyn CodeRunner,
}

impl<'a> ToolContext<'a> {
    pub fn new(state: &'a mut AgentState, oracle: &'a Oracle, runner: &'a dyn CodeRunner) -> Self {
        debug!(question = %state.question, "ToolContext::new: called");
        Self { state, oracle, runner }
    }
}
