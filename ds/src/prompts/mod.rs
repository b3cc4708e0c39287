//! Prompt templates, the few-shot example library and system prompt assembly
//!
//! Templates are `.pmt` files compiled into the binary and rendered with
//! handlebars.

mod builder;
pub mod embedded;
mod examples;
mod renderer;

pub use builder::{MAX_PROMPT_EXAMPLES, SUMMARY_CHARS, build_system_prompt};
pub use embedded::get_embedded;
pub use examples::{EXAMPLE_LIBRARY, Example, retrieve_examples};
pub use renderer::PromptRenderer;
