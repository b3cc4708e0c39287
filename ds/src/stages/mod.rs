//! Oracle-backed stage functions
//!
//! Each stage renders its own instruction, sends only the fields it needs,
//! parses the reply into a lenient record and coerces it into range. No stage
//! returns an error: a failed call or an unparseable reply yields the stage's
//! marked default, with `fallback` set and the error text in its reasoning.

use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError, Message, TokenUsage};
use crate::prompts::PromptRenderer;

mod code;
mod coerce;
mod explain;
mod planning;
mod review;
mod types;

pub use code::{generate_code, strip_fences, CodeContext};
pub use explain::{explain_findings, explain_results, provide_explanation, ExplainContext};
pub use planning::{check_alignment, coerce_alignment, formulate_requirements, profile_data, requests_chart, understand_question};
pub use review::{evaluate_results, plan_remediation, precheck_evaluation, validate_results, EvaluationInput};
pub use types::{
    Alignment, AlignmentRecommendation, AnalysisIntent, DataProfile, EvalRecommendation, Evaluation, Findings,
    GeneratedCode, Intent, OutputFormat, PrimaryGoal, Remediation, RemediationAction, Requirements, Validation,
};

/// Errors inside a stage; never returned to callers
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{0}")]
    Llm(#[from] LlmError),

    #[error("Could not parse response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Empty response")]
    EmptyReply,

    #[error("Prompt error: {0}")]
    Prompt(String),
}

/// Which configured model a call goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Smart,
    Fast,
}

/// Stage output plus what it cost
#[derive(Debug, Clone, PartialEq)]
pub struct StageResult<T> {
    pub value: T,
    pub usage: TokenUsage,
    pub model: String,
    pub duration_ms: u64,
    /// True when `value` is the stage's default after a failure
    pub fallback: bool,
}

impl<T> StageResult<T> {
    /// Transform the value, keeping the accounting
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StageResult<U> {
        StageResult {
            value: f(self.value),
            usage: self.usage,
            model: self.model,
            duration_ms: self.duration_ms,
            fallback: self.fallback,
        }
    }
}

impl<T> StageResult<Result<T, StageError>> {
    /// Replace a failure with the stage default built from `"Stage failed: <error>"`
    pub fn or_fallback(self, stage: &str, fallback: impl FnOnce(String) -> T) -> StageResult<T> {
        let failed = self.value.is_err();
        let mut result = self.map(|value| match value {
            Ok(v) => v,
            Err(e) => {
                warn!(%stage, error = %e, "stage fallback used");
                fallback(format!("Stage failed: {}", e))
            }
        });
        result.fallback = failed;
        result
    }
}

/// What a single stage call needs
pub struct StageSpec<'a> {
    pub stage: &'static str,
    pub tier: ModelTier,
    pub template: &'static str,
    pub context: Value,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub messages: &'a [Message],
}

impl StageSpec<'_> {
    pub fn new(stage: &'static str, tier: ModelTier, template: &'static str, user: String) -> Self {
        Self {
            stage,
            tier,
            template,
            context: Value::Null,
            user,
            max_tokens: 1000,
            temperature: 0.2,
            messages: &[],
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Sampling temperature when the config does not set one
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// The reasoning oracle as the stages and tools see it
#[derive(Clone)]
pub struct Oracle {
    client: Arc<dyn LlmClient>,
    smart_model: String,
    fast_model: String,
    temperature: f32,
    renderer: Arc<PromptRenderer>,
}

impl Oracle {
    pub fn new(client: Arc<dyn LlmClient>, smart_model: impl Into<String>, fast_model: impl Into<String>) -> Self {
        Self {
            client,
            smart_model: smart_model.into(),
            fast_model: fast_model.into(),
            temperature: DEFAULT_TEMPERATURE,
            renderer: Arc::new(PromptRenderer::new()),
        }
    }

    pub fn from_config(client: Arc<dyn LlmClient>, config: &LlmConfig) -> Self {
        Self::new(client, config.model.clone(), config.fast_model.clone()).with_temperature(config.temperature)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sampling temperature for free-form reasoning calls
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn model(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Smart => &self.smart_model,
            ModelTier::Fast => &self.fast_model,
        }
    }

    pub fn renderer(&self) -> &PromptRenderer {
        &self.renderer
    }

    /// Raw completion on the smart model unless the request names one
    pub async fn complete(&self, mut request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        if request.model.is_none() {
            request.model = Some(self.smart_model.clone());
        }
        let requested = request.model.clone().unwrap_or_default();
        let mut response = self.client.complete(request).await?;
        if response.model.is_empty() {
            response.model = requested;
        }
        Ok(response)
    }

    /// Run a text-mode stage call
    pub async fn text_stage(&self, spec: StageSpec<'_>) -> StageResult<Result<String, StageError>> {
        self.call(spec, false).await.map(|reply| {
            reply.and_then(|text| {
                let text = text.trim().to_string();
                if text.is_empty() { Err(StageError::EmptyReply) } else { Ok(text) }
            })
        })
    }

    /// Run a JSON-mode stage call and parse the reply into `T`
    pub async fn json_stage<T: DeserializeOwned>(&self, spec: StageSpec<'_>) -> StageResult<Result<T, StageError>> {
        self.call(spec, true).await.map(|reply| {
            let text = reply?;
            let body = strip_fences(&text);
            if body.is_empty() {
                return Err(StageError::EmptyReply);
            }
            Ok(serde_json::from_str(&body)?)
        })
    }

    async fn call(&self, spec: StageSpec<'_>, json: bool) -> StageResult<Result<String, StageError>> {
        debug!(stage = spec.stage, tier = ?spec.tier, json, "Oracle::call: called");
        let start = Instant::now();
        let model = self.model(spec.tier).to_string();
        let mut result = StageResult {
            value: Err(StageError::EmptyReply),
            usage: TokenUsage::default(),
            model: model.clone(),
            duration_ms: 0,
            fallback: false,
        };

        let system = match self.renderer.render(spec.template, &spec.context) {
            Ok(s) => s,
            Err(e) => {
                result.value = Err(StageError::Prompt(e.to_string()));
                return result;
            }
        };

        let mut messages = spec.messages.to_vec();
        messages.push(Message::user(spec.user));
        let mut request = CompletionRequest::new(system, messages)
            .with_model(model)
            .with_max_tokens(spec.max_tokens)
            .with_temperature(spec.temperature);
        if json {
            request = request.json();
        }

        result.value = match self.complete(request).await {
            Ok(response) => {
                result.usage = response.usage;
                result.model = response.model.clone();
                Ok(response.content.unwrap_or_default())
            }
            Err(e) => Err(StageError::Llm(e)),
        };
        result.duration_ms = start.elapsed().as_millis() as u64;
        debug!(stage = spec.stage, ok = result.value.is_ok(), duration_ms = result.duration_ms, "Oracle::call: finished");
        result
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::llm::client::mock::MockLlmClient;

    /// Oracle backed by a scripted client
    pub fn oracle(responses: Vec<CompletionResponse>) -> (Oracle, Arc<MockLlmClient>) {
        let client = Arc::new(MockLlmClient::new(responses));
        (Oracle::new(client.clone(), "smart-model", "fast-model"), client)
    }

    /// Oracle whose every call fails
    pub fn failing_oracle() -> Oracle {
        let client = Arc::new(MockLlmClient::with_results(vec![Err("oracle unavailable".to_string()); 8]));
        Oracle::new(client, "smart-model", "fast-model")
    }
}
