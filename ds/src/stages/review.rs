//! Review stages: evaluation, validation, remediation

use serde_json::Value;
use tracing::{debug, info};

use super::types::{EvalRecommendation, Evaluation, OutputFormat, Remediation, Requirements, Validation};
use super::{ModelTier, Oracle, StageError, StageResult, StageSpec};
use crate::llm::TokenUsage;
use crate::sandbox::{ExecutionOutcome, ExecutionOutput};

const RESULT_PREVIEW_CHARS: usize = 2000;

/// What the evaluator looks at
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub question: &'a str,
    pub requirements: &'a Requirements,
    pub code: &'a str,
    pub outcome: &'a ExecutionOutcome,
}

/// Deterministic checks that override the oracle's verdict
pub fn precheck_evaluation(format: OutputFormat, outcome: &ExecutionOutcome) -> Option<Evaluation> {
    debug!(%format, success = outcome.success, "precheck_evaluation: called");
    if !outcome.success {
        return Some(Evaluation::rejected(
            EvalRecommendation::CodeError,
            format!("Execution failed: {}", outcome.error),
        ));
    }

    if format.wants_figure() && !outcome.is_visualization() {
        return Some(Evaluation::rejected(
            EvalRecommendation::WrongOutputFormat,
            "A visualization was requested but the code produced a 'result' value instead of a figure",
        ));
    }
    if !format.wants_figure() && outcome.is_visualization() {
        return Some(Evaluation::rejected(
            EvalRecommendation::WrongOutputFormat,
            format!("A {} answer was requested but the code produced a figure", format),
        ));
    }

    if let Some(ExecutionOutput::Analysis { result, .. }) = &outcome.output {
        let mut issues = Vec::new();
        scan_impossible(result, None, &mut issues);
        if !issues.is_empty() {
            debug!(?issues, "precheck_evaluation: impossible values");
            let mut evaluation = Evaluation::rejected(EvalRecommendation::CodeError, issues[0].clone());
            evaluation.issues = issues;
            return Some(evaluation);
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Bounded {
    Correlation,
    PValue,
}

const CORRELATION_KEYS: &[&str] = &["r", "pearson_r", "spearman_r"];
const CORRELATION_TOKENS: &[&str] = &["corr", "correlation"];
const PVALUE_KEYS: &[&str] = &["p", "p_val", "p_value", "pvalue"];

/// Bound implied by a key's own name, matched on whole `_`-separated tokens
fn classify_key(key: &str) -> Option<Bounded> {
    let key = key.to_lowercase().replace('-', "_");
    let tokens: Vec<&str> = key.split('_').filter(|t| !t.is_empty()).collect();
    if CORRELATION_KEYS.contains(&key.as_str()) || tokens.iter().any(|t| CORRELATION_TOKENS.contains(t)) {
        Some(Bounded::Correlation)
    } else if PVALUE_KEYS.contains(&key.as_str())
        || tokens.contains(&"pvalue")
        || tokens.windows(2).any(|w| w == ["p", "value"])
    {
        Some(Bounded::PValue)
    } else {
        None
    }
}

/// Object children take only their own key's bound; array elements inherit
fn scan_impossible(value: &Value, bound: Option<Bounded>, issues: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                scan_impossible(child, classify_key(key), issues);
            }
        }
        Value::Array(items) => {
            for item in items {
                scan_impossible(item, bound, issues);
            }
        }
        Value::Number(n) => {
            let Some(x) = n.as_f64() else { return };
            match bound {
                Some(Bounded::Correlation) if !(-1.0..=1.0).contains(&x) => {
                    issues.push(format!("Correlation coefficient {} is outside [-1, 1]", x));
                }
                Some(Bounded::PValue) if !(0.0..=1.0).contains(&x) => {
                    issues.push(format!("P-value {} is outside [0, 1]", x));
                }
                _ => {}
            }
        }
        _ => {}
    }
}

fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}

/// Judge an executed result; the deterministic pre-check wins over the oracle
pub async fn evaluate_results(oracle: &Oracle, input: EvaluationInput<'_>) -> StageResult<Evaluation> {
    let format = input.requirements.intent.output_format;
    debug!(%format, "evaluate_results: called");

    if let Some(evaluation) = precheck_evaluation(format, input.outcome) {
        info!(recommendation = %evaluation.recommendation, "evaluate_results: pre-check rejected result");
        return StageResult {
            value: evaluation,
            usage: TokenUsage::default(),
            model: String::new(),
            duration_ms: 0,
            fallback: false,
        };
    }

    let mut user = format!(
        "Question: {}\n\nAnalysis type: {}\nRequested output: {}\nSuccess criteria: {}\n\nCode:\n{}\n\nResult:\n{}",
        input.question,
        input.requirements.analysis_type,
        format,
        input.requirements.success_criteria.join("; "),
        input.code,
        preview(&input.outcome.result_str(), RESULT_PREVIEW_CHARS)
    );
    if !input.outcome.warnings.is_empty() {
        user.push_str(&format!("\n\nWarnings:\n- {}", input.outcome.warnings.join("\n- ")));
    }
    let spec = StageSpec::new("evaluate", ModelTier::Smart, "evaluate", user).with_max_tokens(600);

    let result = oracle
        .json_stage::<Evaluation>(spec)
        .await
        .or_fallback("evaluate", Evaluation::fallback)
        .map(|mut evaluation| {
            if evaluation.is_valid {
                evaluation.recommendation = EvalRecommendation::Accept;
            } else if evaluation.recommendation == EvalRecommendation::Accept {
                evaluation.recommendation = EvalRecommendation::CodeError;
            }
            evaluation
        });
    info!(is_valid = result.value.is_valid, recommendation = %result.value.recommendation, "evaluate_results: decided");
    result
}

/// Check results for the tool-calling agent
pub async fn validate_results(
    oracle: &Oracle,
    question: &str,
    results_summary: &str,
    code: Option<&str>,
) -> StageResult<Validation> {
    debug!(summary_len = results_summary.len(), "validate_results: called");
    let user = format!(
        "Question: {}\n\nResults: {}\n\nCode used:\n{}\n\nValidate these results.",
        question,
        results_summary,
        code.unwrap_or("N/A")
    );
    let spec = StageSpec::new("validate", ModelTier::Smart, "validate", user)
        .with_max_tokens(500)
        .with_temperature(0.2);

    let result = oracle.json_stage::<Validation>(spec).await;
    let unreadable = matches!(result.value, Err(StageError::Parse(_)) | Err(StageError::EmptyReply));
    result.or_fallback("validate_results", |reason| {
        if unreadable {
            Validation::unparsed()
        } else {
            Validation {
                issues: vec![reason],
                ..Validation::unparsed()
            }
        }
    })
}

/// Diagnose a rejected attempt and choose where to go back to
pub async fn plan_remediation(
    oracle: &Oracle,
    question: &str,
    requirements: &Requirements,
    code: &str,
    evaluation: &Evaluation,
    attempt_errors: &[String],
) -> StageResult<Remediation> {
    debug!(recommendation = %evaluation.recommendation, "plan_remediation: called");
    let mut user = format!(
        "Question: {}\n\nAnalysis type: {}\n\nCode:\n{}\n\nEvaluation: {}\nIssues:\n- {}",
        question,
        requirements.analysis_type,
        code,
        evaluation.recommendation,
        evaluation.issues.join("\n- ")
    );
    if !attempt_errors.is_empty() {
        user.push_str(&format!("\n\nExecution errors so far:\n- {}", attempt_errors.join("\n- ")));
    }
    let spec = StageSpec::new("remediate", ModelTier::Smart, "remediate", user).with_max_tokens(600);

    let issues = evaluation.issues.join("; ");
    oracle
        .json_stage::<Remediation>(spec)
        .await
        .or_fallback("remediate", |reason| Remediation {
            guidance: issues.clone(),
            ..Remediation::fallback(reason)
        })
        .map(|mut remediation| {
            if remediation.guidance.trim().is_empty() {
                remediation.guidance = if remediation.root_cause.is_empty() { issues.clone() } else { remediation.root_cause.clone() };
            }
            remediation
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CompletionResponse;
    use crate::sandbox::{Figure, FigureKind};
    use crate::stages::testing::{failing_oracle, oracle};
    use crate::stages::types::RemediationAction;
    use serde_json::json;

    fn figure() -> ExecutionOutcome {
        ExecutionOutcome::visualization(vec![Figure {
            kind: FigureKind::Plotly,
            data: json!({"data": []}),
        }])
    }

    #[test]
    fn test_precheck_failed_execution() {
        let evaluation = precheck_evaluation(OutputFormat::Numeric, &ExecutionOutcome::failure("KeyError: 'x'")).unwrap();
        assert!(!evaluation.is_valid);
        assert_eq!(evaluation.recommendation, EvalRecommendation::CodeError);
        assert_eq!(evaluation.issues, vec!["Execution failed: KeyError: 'x'"]);
    }

    #[test]
    fn test_precheck_output_format_exclusivity() {
        let numeric = ExecutionOutcome::analysis("4", json!(4));

        let figure_for_numbers = precheck_evaluation(OutputFormat::Numeric, &figure()).unwrap();
        assert_eq!(figure_for_numbers.recommendation, EvalRecommendation::WrongOutputFormat);
        let figure_for_table = precheck_evaluation(OutputFormat::Table, &figure()).unwrap();
        assert_eq!(figure_for_table.recommendation, EvalRecommendation::WrongOutputFormat);

        let result_for_chart = precheck_evaluation(OutputFormat::Visualization, &numeric).unwrap();
        assert_eq!(result_for_chart.recommendation, EvalRecommendation::WrongOutputFormat);

        assert!(precheck_evaluation(OutputFormat::Numeric, &numeric).is_none());
        assert!(precheck_evaluation(OutputFormat::Visualization, &figure()).is_none());
    }

    #[test]
    fn test_precheck_impossible_values() {
        let corr = ExecutionOutcome::analysis("", json!({"correlation": 1.4, "p_value": 0.01}));
        let evaluation = precheck_evaluation(OutputFormat::Numeric, &corr).unwrap();
        assert!(!evaluation.is_valid);
        assert_eq!(evaluation.issues, vec!["Correlation coefficient 1.4 is outside [-1, 1]"]);

        let p = ExecutionOutcome::analysis("", json!({"stats": {"pvalue": -0.2}}));
        assert!(precheck_evaluation(OutputFormat::Numeric, &p).is_some());

        let nested = ExecutionOutcome::analysis("", json!({"corr_matrix": [[1.0, 0.3], [0.3, 1.0]]}));
        assert!(precheck_evaluation(OutputFormat::Table, &nested).is_none());

        let fine = ExecutionOutcome::analysis("", json!({"mean": 42.0, "count": 1000}));
        assert!(precheck_evaluation(OutputFormat::Numeric, &fine).is_none());
    }

    #[test]
    fn test_precheck_bounds_do_not_leak_into_nested_keys() {
        let summary = ExecutionOutcome::analysis("", json!({"correlation": {"r": 0.45, "p_value": 0.001, "n": 200}}));
        assert!(precheck_evaluation(OutputFormat::Numeric, &summary).is_none());

        let bad_r = ExecutionOutcome::analysis("", json!({"correlation": {"r": 1.7, "n": 200}}));
        let evaluation = precheck_evaluation(OutputFormat::Numeric, &bad_r).unwrap();
        assert_eq!(evaluation.issues, vec!["Correlation coefficient 1.7 is outside [-1, 1]"]);
    }

    #[test]
    fn test_precheck_matches_whole_key_tokens() {
        let accuracy = ExecutionOutcome::analysis("", json!({"correct_predictions": 87, "accuracy": 0.87}));
        assert!(precheck_evaluation(OutputFormat::Numeric, &accuracy).is_none());

        let spread = ExecutionOutcome::analysis("", json!({"price_range": 250, "revenue_p90": 1200}));
        assert!(precheck_evaluation(OutputFormat::Numeric, &spread).is_none());

        assert_eq!(classify_key("price_corr"), Some(Bounded::Correlation));
        assert_eq!(classify_key("Pearson_R"), Some(Bounded::Correlation));
        assert_eq!(classify_key("t_test_p_value"), Some(Bounded::PValue));
        assert_eq!(classify_key("p-value"), Some(Bounded::PValue));
        assert_eq!(classify_key("corrected_total"), None);
        assert_eq!(classify_key("rate"), None);
    }

    #[tokio::test]
    async fn test_precheck_skips_oracle() {
        let (oracle, client) = oracle(vec![CompletionResponse::text(r#"{"is_valid": true}"#)]);
        let req = Requirements::default();
        let outcome = figure();
        let input = EvaluationInput {
            question: "average revenue",
            requirements: &req,
            code: "fig = px.bar(df)",
            outcome: &outcome,
        };

        let result = evaluate_results(&oracle, input).await;

        assert!(!result.value.is_valid);
        assert_eq!(result.value.recommendation, EvalRecommendation::WrongOutputFormat);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_evaluate_keeps_recommendation_consistent() {
        let (oracle, _) = oracle(vec![CompletionResponse::text(
            r#"{"is_valid": false, "recommendation": "accept", "issues": ["wrong test"], "confidence": 0.7}"#,
        )]);
        let req = Requirements::default();
        let outcome = ExecutionOutcome::analysis("4", json!(4));
        let input = EvaluationInput {
            question: "q",
            requirements: &req,
            code: "result = 4",
            outcome: &outcome,
        };

        let result = evaluate_results(&oracle, input).await;

        assert!(!result.value.is_valid);
        assert_eq!(result.value.recommendation, EvalRecommendation::CodeError);
        assert_eq!(result.value.confidence, 0.7);
    }

    #[tokio::test]
    async fn test_validate_prompt_and_parse() {
        let (oracle, client) = oracle(vec![CompletionResponse::text(
            r#"{"is_valid": true, "confidence": 0.85, "issues": [], "suggestions": ["add effect size"]}"#,
        )]);

        let result = validate_results(&oracle, "Is A better than B?", "p=0.03", None).await;

        assert!(result.value.is_valid);
        assert_eq!(result.value.confidence, 0.85);
        assert_eq!(result.value.suggestions, vec!["add effect size"]);
        let request = &client.requests()[0];
        assert_eq!(request.max_tokens, 500);
        assert_eq!(request.temperature, Some(0.2));
        assert!(request.messages[0].content.as_text().unwrap().contains("Code used:\nN/A\n\nValidate these results."));
    }

    #[tokio::test]
    async fn test_validate_unparseable_reply() {
        let (oracle, _) = oracle(vec![CompletionResponse::text("looks fine to me")]);
        let result = validate_results(&oracle, "q", "r", Some("result = 1")).await;
        assert!(result.fallback);
        assert_eq!(result.value, Validation::unparsed());
    }

    #[tokio::test]
    async fn test_remediation_fallback_rewrites_code() {
        let evaluation = Evaluation::rejected(EvalRecommendation::CodeError, "Execution failed: KeyError: 'x'");
        let result = plan_remediation(&failing_oracle(), "q", &Requirements::default(), "code", &evaluation, &[]).await;
        assert!(result.fallback);
        assert_eq!(result.value.action, RemediationAction::RewriteCode);
        assert_eq!(result.value.guidance, "Execution failed: KeyError: 'x'");
    }

    #[tokio::test]
    async fn test_remediation_parsed() {
        let (oracle, _) = oracle(vec![CompletionResponse::text(
            r#"{"root_cause": "used revenue instead of net_revenue", "action": "revise_requirements", "guidance": "Use net_revenue"}"#,
        )]);
        let evaluation = Evaluation::rejected(EvalRecommendation::WrongApproach, "wrong column");
        let result = plan_remediation(&oracle, "q", &Requirements::default(), "code", &evaluation, &[]).await;
        assert_eq!(result.value.action, RemediationAction::ReviseRequirements);
        assert_eq!(result.value.guidance, "Use net_revenue");
    }
}
