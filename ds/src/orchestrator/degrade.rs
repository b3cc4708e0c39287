//! Graceful degradation when the iteration budget runs out

use tracing::{info, warn};

use crate::agent::{AgentState, ExecutionLog, FinalOutput, OutputKind};

pub const ITERATION_LIMIT_CAVEAT: &str = "Analysis incomplete due to iteration limit";

const ERRORS_SHOWN: usize = 3;
const ERROR_PREVIEW_CHARS: usize = 100;
const CODE_PREVIEW_CHARS: usize = 300;

/// Output type implied by the current result
pub fn determine_output_type(state: &AgentState) -> OutputKind {
    match &state.current_results {
        Some(r) if r.is_visualization() => OutputKind::Visualization,
        Some(_) => OutputKind::Analysis,
        None => OutputKind::Explanation,
    }
}

fn preview(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}

/// Advice keyed off the kind of errors seen
fn error_advice(errors: &[&str]) -> &'static [&'static str] {
    let any = |needles: &[&str]| errors.iter().any(|e| needles.iter().any(|n| e.contains(n)));
    if any(&["KeyError", "not in index"]) {
        &[
            "**Data access issue**: Verify column names and group labels in your dataset",
            "Use `df.columns` or `df['column'].unique()` to check available values",
        ]
    } else if any(&["ValueError", "dtype"]) {
        &[
            "**Data type issue**: Check that numeric columns are properly formatted",
            "Try converting columns explicitly: `df['col'].astype(float)`",
        ]
    } else if any(&["IndexError", "out of bounds"]) {
        &[
            "**Filtering issue**: Verify your filtering conditions match the actual data",
            "Check group labels are spelled correctly (case-sensitive)",
        ]
    } else {
        &["The analysis may be too complex - try breaking it into smaller steps"]
    }
}

/// Summarize what was accomplished, what failed and how to proceed
pub fn graceful_degradation(state: &AgentState, trace: Vec<String>, mut log: ExecutionLog) -> FinalOutput {
    let has_results = state.has_results();
    let has_validation = state.validation.as_ref().is_some_and(|v| v.is_valid);
    let has_failures = !state.failed_attempts.is_empty();
    warn!(has_results, has_validation, failures = state.failed_attempts.len(), "graceful_degradation: iteration limit reached");

    let (output_type, confidence) = if has_results {
        (determine_output_type(state), 0.3)
    } else {
        (OutputKind::Error, 0.1)
    };

    let mut answer = String::new();
    if has_results {
        answer.push_str("I reached the iteration limit but was able to generate some results.");
        let result_str = state.current_results.as_ref().map(|r| r.result_str()).unwrap_or_default();
        answer.push_str(&format!("\n\n**Results:**\n{}", result_str));
    } else {
        answer.push_str("I reached the iteration limit and was unable to complete the analysis.");
    }

    if has_results && !has_validation {
        answer.push_str("\n\n**What's incomplete:**");
        answer.push_str("\n- Results have not been validated for correctness");
        answer.push_str("\n- No statistical significance testing was performed");
        answer.push_str("\n- Results may need interpretation or additional context");
    }

    if has_failures {
        answer.push_str(&format!(
            "\n\n**Attempts made:** {} iteration(s) encountered errors",
            state.failed_attempts.len()
        ));
        answer.push_str("\n\n**Errors encountered:**");
        let skip = state.failed_attempts.len().saturating_sub(ERRORS_SHOWN);
        for (i, attempt) in state.failed_attempts.iter().skip(skip).enumerate() {
            answer.push_str(&format!("\n{}. `{}`", i + 1, preview(&attempt.error, ERROR_PREVIEW_CHARS)));
        }
    }

    if let Some(code) = &state.current_code {
        let label = if has_results { "used" } else { "attempted" };
        let code_preview: String = code.chars().take(CODE_PREVIEW_CHARS).collect();
        answer.push_str(&format!("\n\n**Code {}:**\n```python\n{}...\n```", label, code_preview));
    }

    answer.push_str("\n\n**How to proceed:**");
    if has_results && !has_validation {
        answer.push_str("\n- Review the results carefully - they haven't been validated");
        answer.push_str("\n- Consider asking a follow-up question to validate or interpret these results");
    }
    if has_failures {
        let errors: Vec<&str> = state.failed_attempts.iter().map(|a| a.error.as_str()).collect();
        for line in error_advice(&errors) {
            answer.push_str(&format!("\n- {}", line));
        }
    }
    if !has_results {
        answer.push_str("\n- Simplify the question or provide more specific requirements");
        answer.push_str("\n- Try asking about individual components of the analysis separately");
    }

    log.max_iterations_reached = true;
    log.finalize(output_type, confidence, &answer);
    info!(%output_type, confidence, "graceful_degradation: finished");

    let caveats = vec![ITERATION_LIMIT_CAVEAT.to_string()];
    let output = if has_results {
        let current = state.current_results.as_ref();
        FinalOutput::new(answer, confidence, output_type)
            .with_result(current.and_then(|r| r.analysis_result()))
            .with_figures(current.map(|r| r.figures()).unwrap_or_default())
            .with_caveats(caveats)
    } else {
        FinalOutput::error(answer, confidence, caveats)
    };
    output.with_code(state.current_code.clone()).with_trace(trace).with_log(log)
}
