//! write_code tool - the oracle writes analysis code for an approach

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::agent::AgentState;
use crate::stages::{ModelTier, StageSpec, strip_fences};
use crate::tools::{Tool, ToolContext, ToolResult, parse_args};

/// How many recent failures the prompt repeats back
const RECENT_FAILURES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OutputVar {
    #[default]
    Result,
    Fig,
}

impl OutputVar {
    fn as_str(&self) -> &'static str {
        match self {
            OutputVar::Result => "result",
            OutputVar::Fig => "fig",
        }
    }
}

#[derive(Debug, Deserialize)]
struct WriteCodeArgs {
    approach: String,
    #[serde(default)]
    output_var: OutputVar,
}

/// Generate Python code for the analysis
pub struct WriteCodeTool;

/// Columns, shape and stored profile of every dataset
fn data_context(state: &AgentState) -> String {
    let mut context = String::new();
    for dataset in state.datasets.iter() {
        let table = &dataset.table;
        let columns = table.columns.iter().map(|c| format!("'{}'", c)).collect::<Vec<_>>().join(", ");
        context.push_str(&format!("\nDataset '{}':\n", dataset.name));
        context.push_str(&format!("  Columns: [{}]\n", columns));
        context.push_str(&format!("  Shape: ({}, {})\n", table.num_rows(), table.num_columns()));
        if let Some(profile) = state
            .data_profile
            .as_ref()
            .and_then(|p| p.get("datasets"))
            .and_then(|d| d.get(&dataset.name))
            .and_then(|d| d.get("columns"))
        {
            let pretty = serde_json::to_string_pretty(profile).unwrap_or_default();
            context.push_str(&format!("  Profile: {}\n", pretty));
        }
    }
    context
}

#[async_trait]
impl Tool for WriteCodeTool {
    fn name(&self) -> &'static str {
        "write_code"
    }

    fn description(&self) -> &'static str {
        "Generate Python code to perform the analysis. The code must define either 'result' (for numeric/table output) or 'fig' (for visualization)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "approach": {
                    "type": "string",
                    "description": "Description of the analysis approach to implement"
                },
                "output_var": {
                    "type": "string",
                    "enum": ["result", "fig"],
                    "description": "Which variable to define: 'result' for numeric/table output, 'fig' for Plotly visualization"
                }
            },
            "required": ["approach", "output_var"]
        })
    }

    async fn execute(&self, input: Value, ctx: &mut ToolContext<'_>) -> ToolResult {
        debug!(?input, "WriteCodeTool::execute: called");
        let args: WriteCodeArgs = match parse_args(input) {
            Ok(args) => args,
            Err(e) => {
                debug!(%e, "WriteCodeTool::execute: bad arguments");
                return ToolResult::error(e.to_string());
            }
        };
        let output_var = args.output_var.as_str();

        let failures = &ctx.state.failed_attempts;
        let recent = &failures[failures.len().saturating_sub(RECENT_FAILURES)..];
        let user = format!(
            "Write Python code to: {}\n\nThe code must define '{}' as the output variable.",
            args.approach, output_var
        );
        let spec = StageSpec::new("write_code", ModelTier::Smart, "write-code", user)
            .with_context(json!({
                "data_context": data_context(ctx.state),
                "output_var": output_var,
                "failed_attempts": recent,
            }))
            .with_max_tokens(1500)
            .with_temperature(0.2);

        let reply = ctx.oracle.text_stage(spec).await;
        let (usage, model) = (reply.usage, reply.model);
        match reply.value {
            Ok(text) => {
                let code = strip_fences(&text);
                debug!(code_len = code.len(), "WriteCodeTool::execute: code written");
                ctx.state.current_code = Some(code.clone());
                ToolResult::success(json!({
                    "code": code,
                    "approach": args.approach,
                    "output_var": output_var,
                }))
                .with_usage(model, usage)
            }
            Err(e) => {
                debug!(%e, "WriteCodeTool::execute: oracle failed");
                ToolResult::error(format!("Code generation failed: {}", e)).with_usage(model, usage)
            }
        }
    }
}
