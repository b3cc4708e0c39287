//! Few-shot example library and keyword retrieval

use tracing::debug;

use crate::agent::RetrievedExample;

/// Words that mark a request for a chart
const VISUAL_WORDS: &[&str] = &["show", "plot", "visualize", "chart", "graph"];

/// A worked example the agent can imitate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    pub id: &'static str,
    pub question: &'static str,
    pub approach: &'static str,
    /// `result` or `fig`
    pub output_var: &'static str,
    pub tags: &'static [&'static str],
}

pub const EXAMPLE_LIBRARY: &[Example] = &[
    Example {
        id: "comparison_proportions_01",
        question: "Is there a significant difference in conversion rates between A and B?",
        approach: "Use chi-square test to compare proportions between two groups",
        output_var: "result",
        tags: &["comparison", "proportions", "chi-square"],
    },
    Example {
        id: "comparison_continuous_01",
        question: "Do customers in segment A have higher average spend than segment B?",
        approach: "Use independent t-test to compare means between two groups",
        output_var: "result",
        tags: &["comparison", "continuous", "t-test"],
    },
    Example {
        id: "visualization_distribution_01",
        question: "Show me the distribution of customer ages",
        approach: "Create a histogram using Plotly",
        output_var: "fig",
        tags: &["visualization", "distribution", "histogram"],
    },
    Example {
        id: "correlation_01",
        question: "What's the correlation between price and quantity?",
        approach: "Calculate Pearson correlation coefficient",
        output_var: "result",
        tags: &["relationship", "correlation"],
    },
    Example {
        id: "aggregation_01",
        question: "What's the average revenue by region?",
        approach: "Group by region and calculate mean revenue",
        output_var: "result",
        tags: &["description", "aggregation", "groupby"],
    },
];

impl Example {
    /// Keyword score against a lowercased question
    fn score(&self, question_lower: &str) -> usize {
        let tag_score: usize = self.tags.iter().filter(|t| question_lower.contains(*t)).count() * 2;

        let own_lower = self.question.to_lowercase();
        let own_words: std::collections::HashSet<&str> = own_lower.split_whitespace().collect();
        let question_words: std::collections::HashSet<&str> = question_lower.split_whitespace().collect();
        let overlap = own_words.intersection(&question_words).count();

        let visual_boost = if self.output_var == "fig" && VISUAL_WORDS.iter().any(|w| question_lower.contains(w)) {
            3
        } else {
            0
        };

        tag_score + overlap + visual_boost
    }
}

impl From<&Example> for RetrievedExample {
    fn from(example: &Example) -> Self {
        Self {
            id: example.id.to_string(),
            question: example.question.to_string(),
            approach: example.approach.to_string(),
        }
    }
}

/// Up to `top_k` examples with a positive score, best first; ties keep library order
pub fn retrieve_examples(question: &str, top_k: usize) -> Vec<&'static Example> {
    debug!(%question, top_k, "retrieve_examples: called");
    let question_lower = question.to_lowercase();
    let mut scored: Vec<(usize, &'static Example)> = EXAMPLE_LIBRARY
        .iter()
        .map(|ex| (ex.score(&question_lower), ex))
        .filter(|(score, _)| *score > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(top_k).map(|(_, ex)| ex).collect()
}
