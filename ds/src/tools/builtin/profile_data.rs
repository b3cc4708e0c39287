//! profile_data tool - deterministic look at the registered datasets

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::data::{ColumnStats, column_stats};
use crate::tools::{Tool, ToolContext, ToolResult, parse_args};

/// Columns above this share of missing cells are reported as quality issues
const MISSING_PCT_ISSUE: f64 = 30.0;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProfileArgs {
    columns: Option<Vec<String>>,
    check_requirements: Option<Vec<String>>,
}

/// Examine available columns and data quality
pub struct ProfileDataTool;

fn column_info(stats: &ColumnStats) -> Value {
    let mut info = json!({
        "dtype": stats.dtype.to_string(),
        "missing": stats.missing,
        "missing_pct": stats.missing_pct,
        "unique": stats.unique,
    });
    if stats.dtype.is_numeric() {
        info["min"] = json!(stats.min);
        info["max"] = json!(stats.max);
        info["mean"] = json!(stats.mean);
    } else {
        info["sample_values"] = json!(stats.samples);
    }
    info
}

#[async_trait]
impl Tool for ProfileDataTool {
    fn name(&self) -> &'static str {
        "profile_data"
    }

    fn description(&self) -> &'static str {
        "Examine data to understand what columns are available and assess data quality. Use this FIRST to understand what data you have before writing code."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "columns": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Specific columns to profile in detail. If empty, profiles all columns at a high level."
                },
                "check_requirements": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Specific requirements to validate (e.g., 'age column must be numeric')"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, input: Value, ctx: &mut ToolContext<'_>) -> ToolResult {
        debug!(?input, "ProfileDataTool::execute: called");
        let args: ProfileArgs = match parse_args(input) {
            Ok(args) => args,
            Err(e) => {
                debug!(%e, "ProfileDataTool::execute: bad arguments");
                return ToolResult::error(e.to_string());
            }
        };
        let requested = args.columns.filter(|c| !c.is_empty());

        let mut datasets = Map::new();
        let mut found = BTreeSet::new();
        let mut quality_issues = Vec::new();

        for dataset in ctx.state.datasets.iter() {
            let table = &dataset.table;
            let wanted: Vec<&String> = match &requested {
                Some(cols) => cols.iter().collect(),
                None => table.columns.iter().collect(),
            };

            let mut columns = Map::new();
            for col in wanted {
                let Some(stats) = column_stats(table, col) else {
                    continue;
                };
                found.insert(col.clone());
                if stats.missing_pct > MISSING_PCT_ISSUE {
                    quality_issues.push(format!("{}: {}% missing values", col, stats.missing_pct));
                }
                columns.insert(col.clone(), column_info(&stats));
            }

            datasets.insert(
                dataset.name.clone(),
                json!({
                    "shape": format!("{} rows x {} columns", table.num_rows(), table.num_columns()),
                    "columns": columns,
                }),
            );
        }

        let missing: Vec<String> = requested
            .iter()
            .flatten()
            .filter(|col| ctx.state.datasets.datasets_with_column(col).is_empty())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut profile = json!({
            "datasets": datasets,
            "columns_found": found.into_iter().collect::<Vec<_>>(),
            "columns_missing": missing,
            "quality_issues": quality_issues,
            "can_proceed": missing.is_empty(),
        });
        if let Some(reqs) = args.check_requirements {
            profile["requirements_checked"] = json!(reqs);
        }
        if !missing.is_empty() {
            debug!(?missing, "ProfileDataTool::execute: columns missing from all datasets");
            profile["blocking_issue"] = json!(format!(
                "Required columns not found in any dataset: {}",
                serde_json::to_string(&missing).unwrap_or_default()
            ));
        }

        ctx.state.data_profile = Some(profile.clone());
        ToolResult::success(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::stub::StubRunner;
    use crate::stages::testing::oracle;
    use crate::tools::builtin::testing::state;

    async fn run(input: Value) -> (ToolResult, Option<Value>) {
        let (oracle, client) = oracle(vec![]);
        let runner = StubRunner::new(vec![]);
        let mut state = state();
        let result = {
            let mut ctx = ToolContext::new(&mut state, &oracle, &runner);
            ProfileDataTool.execute(input, &mut ctx).await
        };
        assert_eq!(client.call_count(), 0);
        (result, state.data_profile)
    }

    #[tokio::test]
    async fn test_profiles_all_columns() {
        let (result, stored) = run(json!({})).await;
        let profile = result.content;

        assert_eq!(profile["datasets"]["sales"]["shape"], "5 rows x 3 columns");
        assert_eq!(profile["datasets"]["sales"]["columns"]["revenue"]["dtype"], "float64");
        assert_eq!(profile["datasets"]["sales"]["columns"]["revenue"]["max"], 150.0);
        assert_eq!(profile["datasets"]["regions"]["columns"]["manager"]["sample_values"], json!(["Ana", "Bo"]));
        assert_eq!(profile["quality_issues"], json!(["discount: 40% missing values"]));
        assert_eq!(profile["can_proceed"], true);
        assert_eq!(stored, Some(profile));
    }

    #[tokio::test]
    async fn test_column_found_in_any_dataset() {
        let (result, _) = run(json!({"columns": ["manager", "revenue"]})).await;
        let profile = result.content;

        assert_eq!(profile["columns_found"], json!(["manager", "revenue"]));
        assert_eq!(profile["columns_missing"], json!([]));
        assert_eq!(profile["can_proceed"], true);
        assert!(profile.get("blocking_issue").is_none());
    }

    #[tokio::test]
    async fn test_missing_everywhere_blocks() {
        let (result, _) = run(json!({"columns": ["revenue", "churn"], "check_requirements": ["churn is boolean"]})).await;
        let profile = result.content;

        assert!(!result.is_error);
        assert_eq!(profile["columns_missing"], json!(["churn"]));
        assert_eq!(profile["can_proceed"], false);
        assert_eq!(profile["blocking_issue"], "Required columns not found in any dataset: [\"churn\"]");
        assert_eq!(profile["requirements_checked"], json!(["churn is boolean"]));
    }
}
