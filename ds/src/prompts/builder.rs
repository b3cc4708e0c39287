//! System prompt assembly for the tool-calling agent

use eyre::Result;
use serde::Serialize;
use tracing::debug;

use super::PromptRenderer;
use crate::agent::RetrievedExample;
use crate::data::DatasetRegistry;

/// Per-dataset profile budget in characters
pub const SUMMARY_CHARS: usize = 1000;

/// Examples shown in the system prompt
pub const MAX_PROMPT_EXAMPLES: usize = 2;

#[derive(Serialize)]
struct DatasetContext<'a> {
    name: &'a str,
    summary: String,
}

#[derive(Serialize)]
struct SystemPromptContext<'a> {
    datasets: Vec<DatasetContext<'a>>,
    examples: &'a [RetrievedExample],
    single_dataset: bool,
}

/// Build the agent's system prompt from the dataset profiles and retrieved examples
pub fn build_system_prompt(
    renderer: &PromptRenderer,
    datasets: &DatasetRegistry,
    examples: &[RetrievedExample],
) -> Result<String> {
    debug!(datasets = datasets.len(), examples = examples.len(), "build_system_prompt: called");
    let context = SystemPromptContext {
        datasets: datasets
            .iter()
            .map(|d| DatasetContext {
                name: &d.name,
                summary: d.profile.chars().take(SUMMARY_CHARS).collect(),
            })
            .collect(),
        examples: &examples[..examples.len().min(MAX_PROMPT_EXAMPLES)],
        single_dataset: datasets.len() == 1,
    };
    renderer.render("react-system", &context)
}
