//! Narrative stages

use serde_json::json;
use tracing::debug;

use super::types::{Findings, Requirements};
use super::{ModelTier, Oracle, StageResult, StageSpec};
use crate::sandbox::ExecutionOutcome;

const RESULT_PREVIEW_CHARS: usize = 3000;

/// What the final explanation is built from
#[derive(Debug, Clone, Copy)]
pub struct ExplainContext<'a> {
    pub question: &'a str,
    pub requirements: &'a Requirements,
    pub code: Option<&'a str>,
    pub outcome: Option<&'a ExecutionOutcome>,
    /// Data-quality caveats that must reach the user verbatim
    pub caveats: &'a [String],
    /// True when remediation ran out before the result validated
    pub attempts_exhausted: bool,
    pub remediations: u32,
}

fn bullets(items: &[String]) -> String {
    items.iter().map(|i| format!("- {}", i)).collect::<Vec<_>>().join("\n")
}

/// Append every caveat the narrative does not already quote
fn ensure_caveats(mut text: String, caveats: &[String]) -> String {
    let dropped: Vec<String> = caveats
        .iter()
        .filter(|c| !c.trim().is_empty() && !text.contains(c.as_str()))
        .cloned()
        .collect();
    if !dropped.is_empty() {
        debug!(count = dropped.len(), "ensure_caveats: appending dropped caveats");
        text.push_str("\n\nCaveats:\n");
        text.push_str(&bullets(&dropped));
    }
    text
}

/// Explain an executed result to the user
pub async fn explain_results(oracle: &Oracle, ctx: ExplainContext<'_>) -> StageResult<String> {
    debug!(attempts_exhausted = ctx.attempts_exhausted, caveats = ctx.caveats.len(), "explain_results: called");
    let result_text = ctx.outcome.map(|o| o.result_str()).unwrap_or_default();
    let result_text: String = result_text.chars().take(RESULT_PREVIEW_CHARS).collect();

    let mut user = format!(
        "Question: {}\n\nAnalysis type: {}\n\nResult:\n{}",
        ctx.question, ctx.requirements.analysis_type, result_text
    );
    if let Some(code) = ctx.code {
        user.push_str(&format!("\n\nCode used:\n{}", code));
    }
    if !ctx.caveats.is_empty() {
        user.push_str(&format!("\n\nData-quality caveats:\n{}", bullets(ctx.caveats)));
    }
    user.push_str("\n\nWrite a clear explanation for the user.");

    let spec = StageSpec::new("explain_results", ModelTier::Smart, "explain-results", user)
        .with_context(json!({
            "attempts_exhausted": ctx.attempts_exhausted,
            "remediations": ctx.remediations,
        }))
        .with_max_tokens(800)
        .with_temperature(0.3);

    let exhausted_note = ctx.attempts_exhausted.then(|| {
        format!(
            "The analysis could not be fully validated after {} remediation attempt(s).",
            ctx.remediations
        )
    });
    oracle
        .text_stage(spec)
        .await
        .or_fallback("explain_results", |reason| {
            format!(
                "The analysis produced a result, but the explanation could not be written ({}).\n\nResult:\n{}",
                reason, result_text
            )
        })
        .map(|text| {
            let text = match &exhausted_note {
                Some(note) if !text.contains("could not be fully validated") => format!("{}\n\n{}", text, note),
                _ => text,
            };
            ensure_caveats(text, ctx.caveats)
        })
}

/// Conceptual answer, or an explanation of why the data cannot answer
pub async fn provide_explanation(
    oracle: &Oracle,
    question: &str,
    data_summary: &str,
    alignment_issues: &[String],
) -> StageResult<String> {
    debug!(issues = alignment_issues.len(), "provide_explanation: called");
    let user = format!("Question: {}\n\nAvailable data:\n{}", question, data_summary);
    let issues = bullets(alignment_issues);
    let spec = StageSpec::new("provide_explanation", ModelTier::Smart, "conceptual", user)
        .with_context(json!({ "alignment_issues": issues }))
        .with_max_tokens(800)
        .with_temperature(0.3);

    oracle.text_stage(spec).await.or_fallback("provide_explanation", |reason| {
        if issues.is_empty() {
            format!("I could not answer this question ({}).", reason)
        } else {
            format!("The available data cannot support this analysis:\n{}", issues)
        }
    })
}

/// Turn key findings into the user-facing explanation
pub async fn explain_findings(
    oracle: &Oracle,
    question: &str,
    key_findings: &[String],
    caveats: &[String],
) -> StageResult<Findings> {
    debug!(findings = key_findings.len(), caveats = caveats.len(), "explain_findings: called");
    let caveats_text = if caveats.is_empty() {
        String::new()
    } else {
        format!("Caveats:\n{}", bullets(caveats))
    };
    let user = format!(
        "Question: {}\n\nKey Findings:\n{}\n\n{}\n\nWrite a clear explanation for the user.",
        question,
        bullets(key_findings),
        caveats_text
    );
    let spec = StageSpec::new("explain_findings", ModelTier::Smart, "explain-findings", user)
        .with_max_tokens(800)
        .with_temperature(0.3);

    oracle
        .text_stage(spec)
        .await
        .map(|reply| {
            reply.map(|explanation| Findings {
                explanation,
                key_findings: key_findings.to_vec(),
                caveats: caveats.to_vec(),
            })
        })
        .or_fallback("explain_findings", |reason| Findings {
            explanation: reason,
            key_findings: key_findings.to_vec(),
            caveats: caveats.to_vec(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CompletionResponse;
    use crate::stages::testing::{failing_oracle, oracle};
    use serde_json::json;

    #[tokio::test]
    async fn test_dropped_caveat_is_appended() {
        let (oracle, _) = oracle(vec![CompletionResponse::text("Revenue averages $42 per order.")]);
        let req = Requirements::default();
        let outcome = ExecutionOutcome::analysis("42.0", json!(42.0));
        let caveats = vec!["income: 25.0% missing values".to_string()];
        let ctx = ExplainContext {
            question: "average revenue?",
            requirements: &req,
            code: Some("result = df['revenue'].mean()"),
            outcome: Some(&outcome),
            caveats: &caveats,
            attempts_exhausted: false,
            remediations: 0,
        };

        let result = explain_results(&oracle, ctx).await;

        assert!(result.value.starts_with("Revenue averages $42 per order."));
        assert!(result.value.ends_with("Caveats:\n- income: 25.0% missing values"));
    }

    #[tokio::test]
    async fn test_quoted_caveat_not_repeated() {
        let (oracle, _) = oracle(vec![CompletionResponse::text("Mean is 42. Note: income: 25.0% missing values")]);
        let req = Requirements::default();
        let caveats = vec!["income: 25.0% missing values".to_string()];
        let ctx = ExplainContext {
            question: "q",
            requirements: &req,
            code: None,
            outcome: None,
            caveats: &caveats,
            attempts_exhausted: false,
            remediations: 0,
        };
        let result = explain_results(&oracle, ctx).await;
        assert_eq!(result.value.matches("25.0% missing").count(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_mentioned() {
        let (oracle, client) = oracle(vec![CompletionResponse::text("The mean is 42.")]);
        let req = Requirements::default();
        let ctx = ExplainContext {
            question: "q",
            requirements: &req,
            code: None,
            outcome: None,
            caveats: &[],
            attempts_exhausted: true,
            remediations: 2,
        };

        let result = explain_results(&oracle, ctx).await;

        assert!(result.value.contains("could not be fully validated after 2 remediation attempt(s)"));
        assert!(client.requests()[0].system_prompt.contains("after 2 remediation attempt(s)"));
    }

    #[tokio::test]
    async fn test_provide_explanation_fallback_lists_issues() {
        let issues = vec!["No column records customer churn".to_string()];
        let result = provide_explanation(&failing_oracle(), "Why do customers churn?", "summary", &issues).await;
        assert!(result.fallback);
        assert!(result.value.contains("- No column records customer churn"));
    }

    #[tokio::test]
    async fn test_explain_findings_prompt() {
        let (oracle, client) = oracle(vec![CompletionResponse::text("Group A converts better.").with_usage(50, 20)]);
        let findings = vec!["A converts at 12%".to_string(), "B converts at 9%".to_string()];
        let caveats = vec!["Small sample".to_string()];

        let result = explain_findings(&oracle, "Which converts better?", &findings, &caveats).await;

        assert_eq!(result.value.explanation, "Group A converts better.");
        assert_eq!(result.value.key_findings, findings);
        assert_eq!(result.usage.total(), 70);
        let request = &client.requests()[0];
        assert_eq!(request.max_tokens, 800);
        let user = request.messages[0].content.as_text().unwrap();
        assert!(user.contains("Key Findings:\n- A converts at 12%\n- B converts at 9%"));
        assert!(user.contains("Caveats:\n- Small sample"));
    }
}
