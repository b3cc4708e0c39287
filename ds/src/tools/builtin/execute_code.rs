//! execute_code tool - run code in the sandbox

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::sandbox::{ExecutionMode, ExecutionOutcome, ExecutionOutput};
use crate::tools::{Tool, ToolContext, ToolError, ToolResult, parse_args};

#[derive(Debug, Deserialize)]
struct ExecuteCodeArgs {
    code: String,
}

/// Run the generated Python code and report the outcome
pub struct ExecuteCodeTool;

fn outcome_content(outcome: &ExecutionOutcome) -> Value {
    if !outcome.success {
        return json!({
            "success": false,
            "output_type": "error",
            "result_str": "",
            "result": null,
            "figures": [],
            "error": outcome.error,
        });
    }

    let (output_type, result, figures) = match &outcome.output {
        Some(ExecutionOutput::Analysis { result, .. }) => ("analysis", result.clone(), json!([])),
        Some(ExecutionOutput::Visualization { figures }) => ("visualization", Value::Null, json!(figures)),
        None => ("unknown", Value::Null, json!([])),
    };
    let mut content = json!({
        "success": true,
        "output_type": output_type,
        "result_str": outcome.result_str(),
        "result": result,
        "figures": figures,
        "error": null,
    });
    if !outcome.warnings.is_empty() {
        content["warnings"] = json!(outcome.warnings);
    }
    content
}

#[async_trait]
impl Tool for ExecuteCodeTool {
    fn name(&self) -> &'static str {
        "execute_code"
    }

    fn description(&self) -> &'static str {
        "Run the generated Python code and get results. Call this after write_code."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The Python code to execute"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, input: Value, ctx: &mut ToolContext<'_>) -> ToolResult {
        debug!("ExecuteCodeTool::execute: called");
        let args: ExecuteCodeArgs = match parse_args(input) {
            Ok(args) => args,
            Err(e) => {
                debug!(%e, "ExecuteCodeTool::execute: bad arguments");
                return ToolResult::error(e.to_string());
            }
        };
        if args.code.trim().is_empty() {
            debug!("ExecuteCodeTool::execute: empty code");
            return ToolResult::error(ToolError::InvalidArgument("code is empty".to_string()).to_string());
        }

        let outcome = ctx
            .runner
            .execute(&args.code, &ctx.state.datasets, ExecutionMode::Auto)
            .await;
        info!(success = outcome.success, duration_ms = outcome.duration_ms, "ExecuteCodeTool::execute: finished");

        let content = outcome_content(&outcome);
        ctx.state.current_code = Some(args.code.clone());
        if outcome.success {
            ctx.state.current_results = Some(outcome);
            ToolResult::success(content)
        } else {
            ctx.state.record_failure(&args.code, outcome.error.clone());
            ToolResult {
                is_error: true,
                ..ToolResult::success(content)
            }
        }
    }
}
