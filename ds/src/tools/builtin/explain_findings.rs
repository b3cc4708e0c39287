//! explain_findings tool - the terminal step of a run

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::stages::explain_findings;
use crate::tools::{Tool, ToolContext, ToolResult, parse_args};

#[derive(Debug, Deserialize)]
struct ExplainArgs {
    key_findings: Vec<String>,
    #[serde(default)]
    caveats: Option<Vec<String>>,
}

/// Write the user-facing explanation of the results
pub struct ExplainFindingsTool;

#[async_trait]
impl Tool for ExplainFindingsTool {
    fn name(&self) -> &'static str {
        "explain_findings"
    }

    fn description(&self) -> &'static str {
        "Generate a user-friendly explanation of the results. Call this as the final step before responding."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key_findings": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "List of key findings to explain"
                },
                "caveats": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Any limitations or caveats to mention"
                }
            },
            "required": ["key_findings"]
        })
    }

    async fn execute(&self, input: Value, ctx: &mut ToolContext<'_>) -> ToolResult {
        debug!("ExplainFindingsTool::execute: called");
        let args: ExplainArgs = match parse_args(input) {
            Ok(args) => args,
            Err(e) => {
                debug!(%e, "ExplainFindingsTool::execute: bad arguments");
                return ToolResult::error(e.to_string());
            }
        };
        let caveats = args.caveats.unwrap_or_default();

        let result = explain_findings(ctx.oracle, &ctx.state.question, &args.key_findings, &caveats).await;
        if result.fallback {
            debug!("ExplainFindingsTool::execute: explanation failed");
            return ToolResult::error(result.value.explanation).with_usage(result.model, result.usage);
        }
        let content = serde_json::to_value(&result.value).unwrap_or(Value::Null);
        ToolResult::success(content).with_usage(result.model, result.usage)
    }
}
