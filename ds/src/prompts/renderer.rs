//! Prompt renderer
//!
//! Renders embedded `.pmt` templates with handlebars. Output is plain text, so
//! HTML escaping is turned off.

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;

/// Renders prompt templates by name
pub struct PromptRenderer {
    hbs: Handlebars<'static>,
}

impl PromptRenderer {
    pub fn new() -> Self {
        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(handlebars::no_escape);
        Self { hbs }
    }

    /// Render a template with the given context
    pub fn render<T: Serialize>(&self, template_name: &str, context: &T) -> Result<String> {
        debug!(%template_name, "PromptRenderer::render: called");
        let template =
            embedded::get_embedded(template_name).ok_or_else(|| eyre!("Prompt template not found: {}", template_name))?;
        self.hbs
            .render_template(template, context)
            .map(|s| s.trim().to_string())
            .map_err(|e| eyre!("Failed to render template {}: {}", template_name, e))
    }
}

impl Default for PromptRenderer {
    fn default() -> Self {
        Self::new()
    }
}
