//! Stage record types
//!
//! Every record deserializes with defaults for missing fields and coerces
//! loosely typed values. Unknown enum labels fall back to a safe variant.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::coerce::{self, normalize_label};

macro_rules! lenient_enum {
    ($(#[$meta:meta])* $name:ident, default = $default:ident, { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            /// Parse a label, mapping anything unknown to the default variant
            pub fn from_label(label: &str) -> Self {
                match normalize_label(label).as_str() {
                    $($label => $name::$variant,)+
                    _ => $name::default(),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                let value = Value::deserialize(d)?;
                Ok(value.as_str().map($name::from_label).unwrap_or_default())
            }
        }
    };
}

lenient_enum!(
    /// What the user is trying to learn
    PrimaryGoal, default = DescribeData, {
        CompareGroups => "compare_groups",
        FindRelationship => "find_relationship",
        PredictOutcome => "predict_outcome",
        DescribeData => "describe_data",
        IdentifyPatterns => "identify_patterns",
        MergeData => "merge_data",
        TrackTrends => "track_trends",
    }
);

lenient_enum!(
    /// Shape of the final artifact
    OutputFormat, default = Numeric, {
        Numeric => "numeric",
        Visualization => "visualization",
        Table => "table",
        Text => "text",
    }
);

lenient_enum!(
    AlignmentRecommendation, default = ProceedWithCaveats, {
        Proceed => "proceed",
        ProceedWithCaveats => "proceed_with_caveats",
        ReviseRequirements => "revise_requirements",
        ReviseDataUnderstanding => "revise_data_understanding",
        CannotProceed => "cannot_proceed",
    }
);

lenient_enum!(
    EvalRecommendation, default = Accept, {
        Accept => "accept",
        CodeError => "code_error",
        WrongApproach => "wrong_approach",
        DataIssue => "data_issue",
        WrongOutputFormat => "wrong_output_format",
    }
);

lenient_enum!(
    RemediationAction, default = RewriteCode, {
        RewriteCode => "rewrite_code",
        ReviseRequirements => "revise_requirements",
        ReexamineData => "reexamine_data",
    }
);

impl OutputFormat {
    pub fn wants_figure(&self) -> bool {
        matches!(self, OutputFormat::Visualization)
    }
}

impl AlignmentRecommendation {
    pub fn is_proceed(&self) -> bool {
        matches!(self, AlignmentRecommendation::Proceed | AlignmentRecommendation::ProceedWithCaveats)
    }
}

/// Does the question need the data at all
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Intent {
    #[serde(deserialize_with = "coerce::boolean")]
    pub needs_data_work: bool,
    #[serde(deserialize_with = "coerce::string")]
    pub reasoning: String,
}

impl Default for Intent {
    fn default() -> Self {
        Self {
            needs_data_work: true,
            reasoning: String::new(),
        }
    }
}

impl Intent {
    pub fn fallback(reasoning: String) -> Self {
        Self {
            needs_data_work: true,
            reasoning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisIntent {
    pub primary_goal: PrimaryGoal,
    pub output_format: OutputFormat,
    #[serde(deserialize_with = "coerce::string")]
    pub methodology: String,
    #[serde(deserialize_with = "coerce::confidence")]
    pub confidence: f64,
}

/// What the analysis must use and produce
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Requirements {
    #[serde(deserialize_with = "coerce::string_list")]
    pub variables_needed: Vec<String>,
    #[serde(deserialize_with = "coerce::string_list")]
    pub constraints: Vec<String>,
    #[serde(deserialize_with = "coerce::string")]
    pub analysis_type: String,
    #[serde(deserialize_with = "coerce::string_list")]
    pub success_criteria: Vec<String>,
    pub intent: AnalysisIntent,
    #[serde(deserialize_with = "coerce::string")]
    pub reasoning: String,
}

impl Requirements {
    pub fn fallback(reasoning: String) -> Self {
        Self {
            reasoning,
            ..Default::default()
        }
    }
}

/// Requirements checked against the actual columns
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataProfile {
    #[serde(deserialize_with = "coerce::string_list")]
    pub columns_found: Vec<String>,
    #[serde(deserialize_with = "coerce::string_list")]
    pub columns_missing: Vec<String>,
    #[serde(deserialize_with = "coerce::string_list")]
    pub quality_caveats: Vec<String>,
    #[serde(deserialize_with = "coerce::boolean")]
    pub suitable: bool,
    #[serde(deserialize_with = "coerce::string")]
    pub reasoning: String,
}

impl DataProfile {
    pub fn fallback(reasoning: String) -> Self {
        Self {
            quality_caveats: vec![reasoning.clone()],
            suitable: false,
            reasoning,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Alignment {
    #[serde(deserialize_with = "coerce::boolean")]
    pub aligned: bool,
    pub recommendation: AlignmentRecommendation,
    #[serde(deserialize_with = "coerce::string_list")]
    pub gaps: Vec<String>,
    #[serde(deserialize_with = "coerce::string_list")]
    pub caveats: Vec<String>,
    #[serde(deserialize_with = "coerce::string")]
    pub reasoning: String,
}

impl Alignment {
    /// A failed check proceeds with the failure as a caveat
    pub fn fallback(reasoning: String) -> Self {
        Self {
            aligned: true,
            recommendation: AlignmentRecommendation::ProceedWithCaveats,
            caveats: vec![reasoning.clone()],
            reasoning,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeneratedCode {
    pub code: String,
    /// Empty unless generation failed
    pub reasoning: String,
}

impl GeneratedCode {
    pub fn fallback(reasoning: String) -> Self {
        Self {
            code: String::new(),
            reasoning,
        }
    }
}

/// Verdict on an executed result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Evaluation {
    #[serde(deserialize_with = "coerce::boolean")]
    pub is_valid: bool,
    pub recommendation: EvalRecommendation,
    #[serde(deserialize_with = "coerce::string_list")]
    pub issues: Vec<String>,
    #[serde(deserialize_with = "coerce::confidence")]
    pub confidence: f64,
    #[serde(deserialize_with = "coerce::string")]
    pub reasoning: String,
}

impl Default for Evaluation {
    fn default() -> Self {
        Self {
            is_valid: false,
            recommendation: EvalRecommendation::Accept,
            issues: Vec::new(),
            confidence: 0.5,
            reasoning: String::new(),
        }
    }
}

impl Evaluation {
    /// An unreachable reviewer does not block a result that passed the pre-check
    pub fn fallback(reasoning: String) -> Self {
        Self {
            is_valid: true,
            reasoning,
            ..Default::default()
        }
    }

    pub fn rejected(recommendation: EvalRecommendation, issue: impl Into<String>) -> Self {
        let issue = issue.into();
        Self {
            is_valid: false,
            recommendation,
            issues: vec![issue.clone()],
            confidence: 0.9,
            reasoning: issue,
        }
    }
}

/// Result check used by the tool-calling agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Validation {
    #[serde(deserialize_with = "coerce::boolean")]
    pub is_valid: bool,
    #[serde(deserialize_with = "coerce::confidence")]
    pub confidence: f64,
    #[serde(deserialize_with = "coerce::string_list")]
    pub issues: Vec<String>,
    #[serde(deserialize_with = "coerce::string_list")]
    pub suggestions: Vec<String>,
}

impl Default for Validation {
    fn default() -> Self {
        Self {
            is_valid: false,
            confidence: 0.5,
            issues: Vec::new(),
            suggestions: Vec::new(),
        }
    }
}

impl Validation {
    /// Used when the reviewer reply cannot be read
    pub fn unparsed() -> Self {
        Self {
            is_valid: true,
            confidence: 0.5,
            issues: vec!["Could not parse validation response".to_string()],
            suggestions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Remediation {
    #[serde(deserialize_with = "coerce::string")]
    pub root_cause: String,
    pub action: RemediationAction,
    #[serde(deserialize_with = "coerce::string")]
    pub guidance: String,
}

impl Remediation {
    pub fn fallback(reasoning: String) -> Self {
        Self {
            root_cause: reasoning,
            action: RemediationAction::RewriteCode,
            guidance: String::new(),
        }
    }
}

/// Output of the terminal explain_findings tool
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Findings {
    pub explanation: String,
    pub key_findings: Vec<String>,
    pub caveats: Vec<String>,
}
