//! CLI command definitions and output helpers

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use eyre::{Context, Result};
use tracing::debug;

use crate::agent::{FinalOutput, IterationLog};
use crate::config::{Complexity, OrchestratorKind};
use crate::data::{Dataset, DatasetRegistry, Table, parse_dataset_arg};
use crate::sandbox::{ExecutionMode, ExecutionOutcome};

/// Progress titles for the analysis tools
const TOOL_ACTIONS: &[(&str, &str)] = &[
    ("profile_data", "Profiling data"),
    ("write_code", "Writing code"),
    ("execute_code", "Executing code"),
    ("validate_results", "Validating results"),
    ("explain_findings", "Explaining findings"),
];

const SNIPPET_CHARS: usize = 50;
const SNIPPET_MIN_LINE: usize = 20;

/// datasci - ask questions about tabular data
#[derive(Parser)]
#[command(
    name = "ds",
    about = "Answer natural-language questions about CSV datasets",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Answer a question about the datasets
    Ask {
        /// The question to answer
        question: String,

        /// Dataset as NAME=PATH.csv (repeatable)
        #[arg(short, long = "data", value_name = "NAME=PATH", required = true)]
        data: Vec<String>,

        /// Orchestrator design (defaults to the config)
        #[arg(short, long, value_enum)]
        orchestrator: Option<OrchestratorKind>,

        /// Iteration budget (overrides --complexity)
        #[arg(short, long)]
        max_iterations: Option<u32>,

        /// Iteration budget preset
        #[arg(long, value_enum)]
        complexity: Option<Complexity>,

        /// Print one progress line per iteration
        #[arg(short, long)]
        stream: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = AnswerFormat::Text)]
        format: AnswerFormat,
    },

    /// Print the profile the agent sees for each dataset
    Profile {
        /// Dataset as NAME=PATH.csv (repeatable)
        #[arg(short, long = "data", value_name = "NAME=PATH", required = true)]
        data: Vec<String>,
    },

    /// Show the few-shot examples retrieved for a question
    Examples {
        question: String,

        /// How many examples to retrieve (defaults to the config)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Run a code file through the sandbox
    Exec {
        /// Python file to run
        code_file: PathBuf,

        /// Dataset as NAME=PATH.csv (repeatable)
        #[arg(short, long = "data", value_name = "NAME=PATH")]
        data: Vec<String>,

        /// What the code must produce
        #[arg(short, long, value_enum, default_value_t = ExecutionMode::Auto)]
        mode: ExecutionMode,
    },
}

/// How the final answer is printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AnswerFormat {
    #[default]
    Text,
    Json,
    Markdown,
}

/// Load every `NAME=PATH` argument into a registry
pub fn load_datasets(args: &[String], sample_rows: usize) -> Result<DatasetRegistry> {
    debug!(count = args.len(), "load_datasets: called");
    let mut registry = DatasetRegistry::new();
    for arg in args {
        let (name, path) = parse_dataset_arg(arg)?;
        let table = Table::from_csv_path(&path).with_context(|| format!("Failed to load {}", path.display()))?;
        debug!(%name, rows = table.num_rows(), "load_datasets: loaded");
        registry.insert(Dataset::new(name, table, sample_rows));
    }
    Ok(registry)
}

/// Title for a tool or stage name
pub fn action_title(tool_name: &str) -> &str {
    TOOL_ACTIONS
        .iter()
        .find(|(name, _)| *name == tool_name)
        .map(|(_, title)| *title)
        .unwrap_or(tool_name)
}

/// First substantial reasoning line, or the write_code approach, cut to 50 chars
pub fn reasoning_snippet(iteration: &IterationLog) -> String {
    let from_reasoning = iteration.llm_reasoning.as_deref().and_then(|text| {
        text.lines()
            .map(str::trim)
            .find(|line| line.chars().count() > SNIPPET_MIN_LINE)
            .or_else(|| Some(text.trim()).filter(|t| !t.is_empty()))
    });
    let from_args = || {
        iteration
            .tool_calls
            .iter()
            .find(|c| c.tool_name == "write_code")
            .and_then(|c| c.arguments.get("approach"))
            .and_then(|a| a.as_str())
    };
    let snippet = from_reasoning.or_else(from_args).unwrap_or_default();
    if snippet.chars().count() > SNIPPET_CHARS {
        format!("{}...", snippet.chars().take(SNIPPET_CHARS).collect::<String>())
    } else {
        snippet.to_string()
    }
}

/// One progress line for a completed iteration
pub fn progress_line(iteration: &IterationLog) -> String {
    let action = if iteration.tool_calls.is_empty() {
        "Thinking".to_string()
    } else {
        iteration
            .tool_calls
            .iter()
            .map(|c| action_title(&c.tool_name))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let snippet = reasoning_snippet(iteration);
    if snippet.is_empty() {
        format!("[{}] {}", iteration.iteration_num, action)
    } else {
        format!("[{}] {} - {}", iteration.iteration_num, action, snippet)
    }
}

/// Render the final answer in the requested format
pub fn render_output(output: &FinalOutput, format: AnswerFormat) -> Result<String> {
    debug!(?format, "render_output: called");
    match format {
        AnswerFormat::Json => {
            let mut value = serde_json::to_value(output).context("Failed to serialize output")?;
            if let Some(obj) = value.as_object_mut() {
                obj.remove("execution_log");
            }
            serde_json::to_string_pretty(&value).context("Failed to serialize output")
        }
        AnswerFormat::Markdown => Ok(render_markdown(output)),
        AnswerFormat::Text => Ok(render_text(output)),
    }
}

fn render_markdown(output: &FinalOutput) -> String {
    let mut md = format!(
        "## Answer\n\n{}\n\n**Output:** {} | **Confidence:** {:.0}%\n",
        output.answer,
        output.output_type,
        output.confidence * 100.0
    );
    if !output.caveats.is_empty() {
        md.push_str("\n### Caveats\n\n");
        for caveat in &output.caveats {
            md.push_str(&format!("- {}\n", caveat));
        }
    }
    if !output.figures.is_empty() {
        md.push_str(&format!("\n_{} figure(s) produced_\n", output.figures.len()));
    }
    if let Some(code) = &output.code {
        md.push_str(&format!("\n### Code\n\n```python\n{}\n```\n", code));
    }
    md
}

fn render_text(output: &FinalOutput) -> String {
    let mut text = format!("{}\n\n", output.answer);
    let confidence = format!("{:.0}%", output.confidence * 100.0);
    let confidence = if output.confidence >= 0.7 {
        confidence.green()
    } else if output.confidence >= 0.4 {
        confidence.yellow()
    } else {
        confidence.red()
    };
    text.push_str(&format!("{} {} | {} {}\n", "Output:".bold(), output.output_type, "Confidence:".bold(), confidence));
    if !output.caveats.is_empty() {
        text.push_str(&format!("{}\n", "Caveats:".bold()));
        for caveat in &output.caveats {
            text.push_str(&format!("  - {}\n", caveat));
        }
    }
    if !output.figures.is_empty() {
        text.push_str(&format!("{} figure(s) produced; use --format json to export\n", output.figures.len()));
    }
    text
}

/// Human-readable sandbox outcome for `ds exec`
pub fn render_outcome(outcome: &ExecutionOutcome) -> String {
    let mut text = if outcome.success {
        format!("{} {}\n{}\n", "✓".green(), "success".bold(), outcome.result_str())
    } else {
        format!("{} {}\n{}\n", "✗".red(), "failed".bold(), outcome.error)
    };
    if !outcome.stdout.is_empty() {
        text.push_str(&format!("\nstdout:\n{}\n", outcome.stdout.trim_end()));
    }
    for warning in &outcome.warnings {
        text.push_str(&format!("{} {}\n", "warning:".yellow(), warning));
    }
    text.push_str(&format!("({} ms)\n", outcome.duration_ms));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{OutputKind, ToolCallLog};
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_parse_ask() {
        let cli = Cli::try_parse_from([
            "ds",
            "ask",
            "What is the mean?",
            "--data",
            "sales=sales.csv",
            "-d",
            "regions=regions.csv",
            "--orchestrator",
            "graph",
            "--complexity",
            "complex",
            "--format",
            "json",
        ])
        .unwrap();
        match cli.command {
            Command::Ask {
                data,
                orchestrator,
                complexity,
                format,
                stream,
                ..
            } => {
                assert_eq!(data, vec!["sales=sales.csv", "regions=regions.csv"]);
                assert_eq!(orchestrator, Some(OrchestratorKind::Graph));
                assert_eq!(complexity, Some(Complexity::Complex));
                assert_eq!(format, AnswerFormat::Json);
                assert!(!stream);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_ask_requires_data() {
        assert!(Cli::try_parse_from(["ds", "ask", "q"]).is_err());
    }

    #[test]
    fn test_progress_line_uses_titles_and_snippet() {
        let iteration = IterationLog::new(3)
            .with_reasoning(Some("ok\nI will compare the mean revenue across every region in the data".to_string()))
            .with_tool_call(ToolCallLog::new("write_code", json!({"approach": "groupby"})));
        assert_eq!(
            progress_line(&iteration),
            "[3] Writing code - I will compare the mean revenue across every regio..."
        );
    }

    #[test]
    fn test_snippet_falls_back_to_approach() {
        let iteration = IterationLog::new(1).with_tool_call(ToolCallLog::new(
            "write_code",
            json!({"approach": "chi-square test on conversion"}),
        ));
        assert_eq!(progress_line(&iteration), "[1] Writing code - chi-square test on conversion");
        assert_eq!(progress_line(&IterationLog::new(2)), "[2] Thinking");
    }

    #[test]
    fn test_unknown_tool_title_is_name() {
        assert_eq!(action_title("check_alignment"), "check_alignment");
        assert_eq!(action_title("execute_code"), "Executing code");
    }

    #[test]
    fn test_json_output_drops_log() {
        let output = FinalOutput::new("42", 0.9, OutputKind::Analysis).with_log(crate::agent::ExecutionLog::new("q"));
        let rendered = render_output(&output, AnswerFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["answer"], "42");
        assert!(value.get("execution_log").is_none());
    }

    #[test]
    fn test_markdown_output() {
        let output = FinalOutput::new("Mean is 4", 0.75, OutputKind::Analysis)
            .with_caveats(vec!["Small sample".to_string()])
            .with_code(Some("result = 4".to_string()));
        let md = render_output(&output, AnswerFormat::Markdown).unwrap();
        assert!(md.contains("**Confidence:** 75%"));
        assert!(md.contains("- Small sample"));
        assert!(md.contains("```python\nresult = 4\n```"));
    }

    #[test]
    fn test_load_datasets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("people.csv");
        fs::write(&path, "name,age\nAna,31\nBo,\n").unwrap();

        let registry = load_datasets(&[path.display().to_string()], 5).unwrap();

        assert_eq!(registry.names(), vec!["people"]);
        assert_eq!(registry.get("people").unwrap().table.num_rows(), 2);
    }

    #[test]
    fn test_load_datasets_missing_file() {
        assert!(load_datasets(&["x=/nonexistent/file.csv".to_string()], 5).is_err());
    }
}
