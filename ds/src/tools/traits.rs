//! Tool trait definition

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use super::{ToolContext, ToolError};
use crate::llm::TokenUsage;

/// A tool that can be called by the oracle
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (matches the oracle's tool call name)
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    /// Execute the tool
    async fn execute(&self, input: Value, ctx: &mut ToolContext<'_>) -> ToolResult;
}

/// Result of a tool execution
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: Value,
    pub is_error: bool,
    /// Oracle usage when the tool called the oracle
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(content: Value) -> Self {
        debug!("ToolResult::success: called");
        Self {
            content,
            is_error: false,
            usage: None,
            model: None,
        }
    }

    /// Create an error result, shaped as `{"error": message}`
    pub fn error(message: impl Into<String>) -> Self {
        debug!("ToolResult::error: called");
        Self {
            content: json!({ "error": message.into() }),
            is_error: true,
            usage: None,
            model: None,
        }
    }

    pub fn with_usage(mut self, model: impl Into<String>, usage: TokenUsage) -> Self {
        self.model = Some(model.into());
        self.usage = Some(usage);
        self
    }

    /// A non-empty `error` field counts as a failed call
    pub fn had_error(&self) -> bool {
        self.is_error
            || match self.content.get("error") {
                Some(Value::String(s)) => !s.is_empty(),
                Some(Value::Null) | None => false,
                Some(_) => true,
            }
    }

    /// Content as sent back to the oracle, cut to `max_chars`
    pub fn to_message_text(&self, max_chars: usize) -> String {
        let text = serde_json::to_string(&self.content).unwrap_or_default();
        if text.chars().count() > max_chars {
            let cut: String = text.chars().take(max_chars).collect();
            format!("{}... [truncated]", cut)
        } else {
            text
        }
    }
}

/// Deserialize tool input into its argument struct
pub fn parse_args<T: DeserializeOwned>(input: Value) -> Result<T, ToolError> {
    Ok(serde_json::from_value(input)?)
}
