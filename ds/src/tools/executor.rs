//! ToolExecutor - the tool set offered to the oracle

use std::collections::HashMap;
use tracing::debug;

use crate::llm::{ToolCall, ToolDefinition};

use super::builtin::{ExecuteCodeTool, ExplainFindingsTool, ProfileDataTool, ValidateResultsTool, WriteCodeTool};
use super::{Tool, ToolContext, ToolError, ToolResult};

/// Name of the tool that ends a run
pub const TERMINAL_TOOL: &str = "explain_findings";

/// Manages tool execution for a run
pub struct ToolExecutor {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolExecutor {
    /// Create executor with the five analysis tools
    pub fn standard() -> Self {
        debug!("ToolExecutor::standard: called");
        let mut executor = Self::empty();
        executor.add_tool(Box::new(ProfileDataTool));
        executor.add_tool(Box::new(WriteCodeTool));
        executor.add_tool(Box::new(ExecuteCodeTool));
        executor.add_tool(Box::new(ValidateResultsTool));
        executor.add_tool(Box::new(ExplainFindingsTool));
        executor
    }

    /// Create an empty executor (for testing)
    pub fn empty() -> Self {
        debug!("ToolExecutor::empty: called");
        Self { tools: HashMap::new() }
    }

    /// Add a tool to the executor
    pub fn add_tool(&mut self, tool: Box<dyn Tool>) {
        debug!(tool_name = %tool.name(), "ToolExecutor::add_tool: called");
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get tool definitions for the oracle, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        debug!("ToolExecutor::definitions: called");
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.input_schema()))
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Execute a tool call
    pub async fn execute(&self, tool_call: &ToolCall, ctx: &mut ToolContext<'_>) -> ToolResult {
        debug!(tool_name = %tool_call.name, tool_id = %tool_call.id, "ToolExecutor::execute: called");
        match self.tools.get(&tool_call.name) {
            Some(tool) => {
                debug!("ToolExecutor::execute: tool found, executing");
                tool.execute(tool_call.input.clone(), ctx).await
            }
            None => {
                debug!("ToolExecutor::execute: unknown tool");
                ToolResult::error(
                    ToolError::UnknownTool {
                        name: tool_call.name.clone(),
                    }
                    .to_string(),
                )
            }
        }
    }
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentState;
    use crate::data::DatasetRegistry;
    use crate::sandbox::stub::StubRunner;
    use crate::stages::testing::oracle;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_standard_executor_has_analysis_tools() {
        let names: Vec<String> = ToolExecutor::standard().definitions().into_iter().map(|d| d.name).collect();
        for name in ["profile_data", "write_code", "execute_code", "validate_results", "explain_findings"] {
            assert!(names.iter().any(|n| n == name), "missing {}", name);
        }
        assert!(!names.iter().any(|n| n == "bash"));
    }

    #[test]
    fn test_definitions_sorted() {
        let names: Vec<String> = ToolExecutor::standard().definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec!["execute_code", "explain_findings", "profile_data", "validate_results", "write_code"]
        );
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let executor = ToolExecutor::standard();
        let (oracle, _) = oracle(vec![]);
        let runner = StubRunner::new(vec![]);
        let mut state = AgentState::new("q", Arc::new(DatasetRegistry::new()), 8);
        let mut ctx = ToolContext::new(&mut state, &oracle, &runner);

        let call = ToolCall::new("call_1", "summon_data", json!({}));
        let result = executor.execute(&call, &mut ctx).await;

        assert!(result.is_error);
        assert_eq!(result.content, json!({"error": "Unknown tool: summon_data"}));
    }
}
