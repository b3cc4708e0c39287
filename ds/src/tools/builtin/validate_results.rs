//! validate_results tool - oracle review of the current results

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::stages::validate_results;
use crate::tools::{Tool, ToolContext, ToolResult, parse_args};

#[derive(Debug, Deserialize)]
struct ValidateArgs {
    results_summary: String,
}

/// Check that results are sensible and answer the question
pub struct ValidateResultsTool;

#[async_trait]
impl Tool for ValidateResultsTool {
    fn name(&self) -> &'static str {
        "validate_results"
    }

    fn description(&self) -> &'static str {
        "Check if the results are correct, sensible, and actually answer the question. Call this after successful code execution."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "results_summary": {
                    "type": "string",
                    "description": "Summary of the results to validate"
                }
            },
            "required": ["results_summary"]
        })
    }

    async fn execute(&self, input: Value, ctx: &mut ToolContext<'_>) -> ToolResult {
        debug!("ValidateResultsTool::execute: called");
        let args: ValidateArgs = match parse_args(input) {
            Ok(args) => args,
            Err(e) => {
                debug!(%e, "ValidateResultsTool::execute: bad arguments");
                return ToolResult::error(e.to_string());
            }
        };

        let result = validate_results(
            ctx.oracle,
            &ctx.state.question,
            &args.results_summary,
            ctx.state.current_code.as_deref(),
        )
        .await;
        info!(
            is_valid = result.value.is_valid,
            confidence = result.value.confidence,
            "ValidateResultsTool::execute: validated"
        );

        let content = serde_json::to_value(&result.value).unwrap_or(Value::Null);
        ctx.state.validation = Some(result.value);
        ToolResult::success(content).with_usage(result.model, result.usage)
    }
}
