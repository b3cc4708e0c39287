//! Code generation stage

use serde_json::json;
use tracing::debug;

use super::types::{DataProfile, GeneratedCode, Requirements};
use super::{ModelTier, Oracle, StageResult, StageSpec};
use crate::agent::FailedAttempt;

/// Everything code generation may see
#[derive(Debug, Clone, Copy)]
pub struct CodeContext<'a> {
    pub question: &'a str,
    pub requirements: &'a Requirements,
    pub profile: &'a DataProfile,
    pub dataset_names: &'a [&'a str],
    pub data_summary: &'a str,
    /// Remediation guidance for a fresh attempt
    pub guidance: Option<&'a str>,
    /// Set for the code-repair variant
    pub previous_error: Option<&'a str>,
    pub failed_attempts: &'a [FailedAttempt],
}

/// Remove a surrounding markdown fence and its language tag
pub fn strip_fences(text: &str) -> String {
    let mut s = text.trim();
    if let Some(start) = s.find("```").filter(|&i| i > 0) {
        s = &s[start..];
    }
    if let Some(rest) = s.strip_prefix("```") {
        s = match rest.find('\n') {
            Some(i) if rest[..i].trim().chars().all(|c| c.is_ascii_alphanumeric()) => &rest[i + 1..],
            _ => rest,
        };
    }
    if let Some(end) = s.rfind("```") {
        s = &s[..end];
    }
    s.trim().to_string()
}

/// Write code that produces exactly the requested artifact
pub async fn generate_code(oracle: &Oracle, ctx: CodeContext<'_>) -> StageResult<GeneratedCode> {
    debug!(
        repair = ctx.previous_error.is_some(),
        failed_attempts = ctx.failed_attempts.len(),
        "generate_code: called"
    );
    let format = ctx.requirements.intent.output_format;
    let context = json!({
        "dataset_names": ctx.dataset_names.iter().map(|n| format!("'{}'", n)).collect::<Vec<_>>().join(", "),
        "single_dataset": ctx.dataset_names.len() == 1,
        "output_format": format.as_str(),
        "wants_figure": format.wants_figure(),
        "guidance": ctx.guidance,
        "previous_error": ctx.previous_error,
        "failed_attempts": ctx.failed_attempts,
    });
    let user = format!(
        "Question: {}\n\nRequirements:\n{}\n\nColumns found: {}\nData quality caveats: {}\n\nDatasets:\n{}",
        ctx.question,
        serde_json::to_string_pretty(ctx.requirements).unwrap_or_default(),
        ctx.profile.columns_found.join(", "),
        ctx.profile.quality_caveats.join("; "),
        ctx.data_summary
    );
    let spec = StageSpec::new("generate_code", ModelTier::Smart, "generate-code", user)
        .with_context(context)
        .with_max_tokens(1500);

    oracle
        .text_stage(spec)
        .await
        .map(|reply| {
            reply.map(|text| GeneratedCode {
                code: strip_fences(&text),
                reasoning: String::new(),
            })
        })
        .or_fallback("generate_code", GeneratedCode::fallback)
}
