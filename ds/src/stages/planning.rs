//! Planning stages: intent, requirements, data profile, alignment

use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;
use tracing::{debug, info};

use super::types::{Alignment, AlignmentRecommendation, DataProfile, Intent, OutputFormat, Requirements};
use super::{ModelTier, Oracle, StageResult, StageSpec};

const CHART_WORDS: &[&str] = &[
    "show",
    "plot",
    "plots",
    "chart",
    "charts",
    "graph",
    "graphs",
    "visualize",
    "visualise",
    "visualization",
    "visualisation",
    "draw",
    "histogram",
    "histograms",
];

/// Missingness at or above this share is a real gap, not a caveat
const MODERATE_MISSING_PCT: f64 = 30.0;

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("percent pattern is valid"));

const MECHANICAL_FIXES: &[&str] = &[
    "type coercion",
    "dtype",
    "data type",
    "convert",
    "conversion",
    "cast",
    "date format",
    "parse",
    "parsing",
    "stored as string",
    "stored as text",
];

/// Does the question explicitly ask for a chart; whole words only
pub fn requests_chart(question: &str) -> bool {
    question
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| CHART_WORDS.contains(&word))
}

/// Decide whether the question needs data analysis at all
pub async fn understand_question(oracle: &Oracle, question: &str, data_summary: &str) -> StageResult<Intent> {
    debug!(%question, "understand_question: called");
    let user = format!("Question: {}\n\nAvailable data:\n{}", question, data_summary);
    let spec = StageSpec::new("understand", ModelTier::Fast, "understand", user).with_max_tokens(300);
    let result = oracle.json_stage::<Intent>(spec).await.or_fallback("understand", Intent::fallback);
    info!(needs_data_work = result.value.needs_data_work, "understand_question: decided");
    result
}

/// Turn the question into requirements, optionally steered by remediation guidance
pub async fn formulate_requirements(
    oracle: &Oracle,
    question: &str,
    data_summary: &str,
    guidance: Option<&str>,
) -> StageResult<Requirements> {
    debug!(%question, has_guidance = guidance.is_some(), "formulate_requirements: called");
    let user = format!("Question: {}\n\nAvailable data:\n{}", question, data_summary);
    let spec = StageSpec::new("requirements", ModelTier::Smart, "requirements", user)
        .with_context(json!({ "guidance": guidance }))
        .with_max_tokens(1000);

    oracle
        .json_stage::<Requirements>(spec)
        .await
        .or_fallback("requirements", Requirements::fallback)
        .map(|req| coerce_output_format(req, question))
}

fn coerce_output_format(mut req: Requirements, question: &str) -> Requirements {
    if req.intent.output_format == OutputFormat::Visualization && !requests_chart(question) {
        debug!("coerce_output_format: visualization not requested, using numeric");
        req.intent.output_format = OutputFormat::Numeric;
    }
    req
}

/// Check the requirements against the actual columns
pub async fn profile_data(
    oracle: &Oracle,
    question: &str,
    requirements: &Requirements,
    data_summary: &str,
    guidance: Option<&str>,
) -> StageResult<DataProfile> {
    debug!(variables = requirements.variables_needed.len(), "profile_data: called");
    let user = format!(
        "Question: {}\n\nVariables needed: {}\nAnalysis type: {}\n\nDatasets:\n{}",
        question,
        requirements.variables_needed.join(", "),
        requirements.analysis_type,
        data_summary
    );
    let spec = StageSpec::new("profile", ModelTier::Fast, "profile", user)
        .with_context(json!({ "guidance": guidance }))
        .with_max_tokens(800);

    oracle.json_stage::<DataProfile>(spec).await.or_fallback("profile", DataProfile::fallback)
}

/// Can the profiled data meet the requirements
pub async fn check_alignment(oracle: &Oracle, requirements: &Requirements, profile: &DataProfile) -> StageResult<Alignment> {
    debug!("check_alignment: called");
    let user = format!(
        "Requirements:\n{}\n\nData profile:\n{}",
        serde_json::to_string_pretty(requirements).unwrap_or_default(),
        serde_json::to_string_pretty(profile).unwrap_or_default()
    );
    let spec = StageSpec::new("alignment", ModelTier::Fast, "alignment", user).with_max_tokens(600);

    let result = oracle
        .json_stage::<Alignment>(spec)
        .await
        .or_fallback("alignment", Alignment::fallback)
        .map(|alignment| coerce_alignment(alignment, profile));
    info!(recommendation = %result.value.recommendation, aligned = result.value.aligned, "check_alignment: decided");
    result
}

/// Bias toward proceeding and keep `aligned` consistent with the recommendation
pub fn coerce_alignment(mut alignment: Alignment, profile: &DataProfile) -> Alignment {
    if alignment.recommendation == AlignmentRecommendation::CannotProceed && gaps_are_soft(&alignment, profile) {
        debug!(gaps = ?alignment.gaps, "coerce_alignment: downgrading cannot_proceed");
        alignment.recommendation = AlignmentRecommendation::ProceedWithCaveats;
        for gap in alignment.gaps.clone() {
            if !alignment.caveats.contains(&gap) {
                alignment.caveats.push(gap);
            }
        }
    }
    alignment.aligned = alignment.recommendation.is_proceed();
    alignment
}

fn gaps_are_soft(alignment: &Alignment, profile: &DataProfile) -> bool {
    if !profile.columns_missing.is_empty() || alignment.gaps.is_empty() {
        return false;
    }
    alignment.gaps.iter().all(|gap| is_moderate_missingness(gap) || is_mechanical_fix(gap))
}

fn is_moderate_missingness(gap: &str) -> bool {
    let lower = gap.to_lowercase();
    if !["missing", "null", "nan", "incomplete"].iter().any(|w| lower.contains(w)) {
        return false;
    }
    let values: Vec<f64> = PERCENT_RE
        .captures_iter(&lower)
        .filter_map(|c| c[1].parse::<f64>().ok())
        .collect();
    !values.is_empty() && values.iter().all(|pct| *pct < MODERATE_MISSING_PCT)
}

fn is_mechanical_fix(gap: &str) -> bool {
    let lower = gap.to_lowercase();
    MECHANICAL_FIXES.iter().any(|w| lower.contains(w))
}
