//! Execution log types
//!
//! Every oracle call and tool invocation made while answering a question is
//! recorded here. The markdown and JSON renderings are the stable formats the
//! log sink persists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::OutputKind;
use crate::llm::TokenUsage;

/// Record of a single tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallLog {
    pub tool_name: String,
    pub arguments: Value,
    pub result: Value,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    /// Model the tool itself called, if any
    pub model: Option<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl ToolCallLog {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        let tool_name = tool_name.into();
        debug!(%tool_name, "ToolCallLog::new: called");
        Self {
            tool_name,
            arguments,
            result: Value::Null,
            success: true,
            error: None,
            duration_ms: 0,
            timestamp: Utc::now(),
            model: None,
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    /// Builder: set the result; an `error` field in it marks the call failed
    pub fn with_result(mut self, result: Value) -> Self {
        if let Some(err) = result.get("error").and_then(Value::as_str).filter(|e| !e.is_empty()) {
            debug!(tool_name = %self.tool_name, "ToolCallLog::with_result: result carries an error");
            self.success = false;
            self.error = Some(err.to_string());
        }
        self.result = result;
        self
    }

    /// Builder: mark failed with an explicit error
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Builder: record the model and tokens the tool spent
    pub fn with_usage(mut self, model: Option<String>, usage: TokenUsage) -> Self {
        self.model = model.filter(|m| !m.is_empty());
        self.prompt_tokens = usage.input_tokens;
        self.completion_tokens = usage.output_tokens;
        self
    }
}

/// Record of one agent iteration or one graph node visit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationLog {
    /// 1-indexed
    pub iteration_num: u32,
    pub llm_reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallLog>,
    pub timestamp: DateTime<Utc>,
    pub model: Option<String>,
    /// Includes tokens spent by tool calls
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl IterationLog {
    pub fn new(iteration_num: u32) -> Self {
        debug!(iteration_num, "IterationLog::new: called");
        Self {
            iteration_num,
            llm_reasoning: None,
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
            model: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        }
    }

    /// Builder: set the reasoning text; empty text is dropped
    pub fn with_reasoning(mut self, reasoning: Option<String>) -> Self {
        self.llm_reasoning = reasoning.filter(|r| !r.trim().is_empty());
        self
    }

    /// Builder: record the orchestrating call's model and tokens
    pub fn with_usage(mut self, model: impl Into<String>, usage: TokenUsage) -> Self {
        let model = model.into();
        if !model.is_empty() {
            self.model = Some(model);
        }
        self.add_tokens(usage.input_tokens, usage.output_tokens);
        self
    }

    /// Append a tool call, folding its tokens into this iteration
    pub fn push_tool_call(&mut self, call: ToolCallLog) {
        debug!(iteration_num = self.iteration_num, tool_name = %call.tool_name, "IterationLog::push_tool_call: called");
        self.add_tokens(call.prompt_tokens, call.completion_tokens);
        self.tool_calls.push(call);
    }

    pub fn with_tool_call(mut self, call: ToolCallLog) -> Self {
        self.push_tool_call(call);
        self
    }

    fn add_tokens(&mut self, prompt: u64, completion: u64) {
        self.prompt_tokens += prompt;
        self.completion_tokens += completion;
        self.total_tokens = self.prompt_tokens + self.completion_tokens;
    }
}

/// Short reference to a few-shot example used for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedExample {
    pub id: String,
    pub question: String,
    pub approach: String,
}

/// Complete record of answering one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub question: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub iterations: Vec<IterationLog>,

    pub retrieved_examples: Vec<RetrievedExample>,
    pub system_prompt: Option<String>,

    pub final_output_type: Option<OutputKind>,
    pub final_confidence: Option<f64>,
    pub final_answer: Option<String>,

    pub total_tool_calls: u64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,

    pub loop_detected: bool,
    pub forced_divergence: bool,
    pub max_iterations_reached: bool,
    pub errors: Vec<String>,
}

impl ExecutionLog {
    pub fn new(question: impl Into<String>) -> Self {
        let question = question.into();
        debug!(%question, "ExecutionLog::new: called");
        Self {
            question,
            start_time: Utc::now(),
            end_time: None,
            iterations: Vec::new(),
            retrieved_examples: Vec::new(),
            system_prompt: None,
            final_output_type: None,
            final_confidence: None,
            final_answer: None,
            total_tool_calls: 0,
            total_prompt_tokens: 0,
            total_completion_tokens: 0,
            total_tokens: 0,
            loop_detected: false,
            forced_divergence: false,
            max_iterations_reached: false,
            errors: Vec::new(),
        }
    }

    /// Append an iteration and update every cumulative counter
    pub fn add_iteration(&mut self, iteration: IterationLog) {
        debug!(iteration_num = iteration.iteration_num, "ExecutionLog::add_iteration: called");
        self.total_tool_calls += iteration.tool_calls.len() as u64;
        self.total_prompt_tokens += iteration.prompt_tokens;
        self.total_completion_tokens += iteration.completion_tokens;
        self.total_tokens = self.total_prompt_tokens + self.total_completion_tokens;
        self.iterations.push(iteration);
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Stamp the end time and the outcome
    pub fn finalize(&mut self, output_type: OutputKind, confidence: f64, answer: &str) {
        debug!(%output_type, confidence, "ExecutionLog::finalize: called");
        self.end_time = Some(Utc::now());
        self.final_output_type = Some(output_type);
        self.final_confidence = Some(confidence);
        self.final_answer = Some(answer.to_string());
    }

    pub fn to_markdown(&self) -> String {
        let mut md = vec![
            "## Agent Execution".to_string(),
            format!("**Question:** {}", self.question),
            format!("**Started:** {}", self.start_time.to_rfc3339()),
        ];
        if let Some(end) = &self.end_time {
            md.push(format!("**Ended:** {}", end.to_rfc3339()));
        }
        md.push(String::new());

        if !self.retrieved_examples.is_empty() {
            md.push("### Retrieved Examples".to_string());
            for ex in &self.retrieved_examples {
                md.push(format!("- {} → {}", ex.question, ex.approach));
            }
            md.push(String::new());
        }

        for iteration in &self.iterations {
            md.push(format!("### Iteration {}", iteration.iteration_num));
            md.push(format!("*{}*", iteration.timestamp.to_rfc3339()));
            if let Some(model) = &iteration.model {
                md.push(format!("**Model:** `{}`", model));
            }
            if iteration.total_tokens > 0 {
                md.push(format!(
                    "**Tokens:** {} prompt + {} completion = {} total",
                    iteration.prompt_tokens, iteration.completion_tokens, iteration.total_tokens
                ));
            }
            md.push(String::new());

            if let Some(reasoning) = &iteration.llm_reasoning {
                md.push("**Reasoning:**".to_string());
                md.extend(reasoning.lines().map(|l| format!("> {}", l)));
                md.push(String::new());
            }

            for tc in &iteration.tool_calls {
                let status = if tc.success { "✓" } else { "✗" };
                let model_info = tc.model.as_ref().map(|m| format!(" [{}]", m)).unwrap_or_default();
                md.push(format!(
                    "**Tool Call:** `{}` {} ({}ms){}",
                    tc.tool_name, status, tc.duration_ms, model_info
                ));
                md.push(String::new());
                md.push("**Arguments:**".to_string());
                md.push("```json".to_string());
                md.push(pretty(&tc.arguments));
                md.push("```".to_string());
                md.push(String::new());
                md.push("**Result:**".to_string());
                md.push("```json".to_string());
                md.push(pretty(&tc.result));
                md.push("```".to_string());
                if let Some(err) = &tc.error {
                    md.push(format!("**Error:** {}", err));
                }
                md.push(String::new());
            }
        }

        md.push("### Execution Summary".to_string());
        md.push(format!(
            "- **Output Type:** {}",
            self.final_output_type.map(|k| k.to_string()).unwrap_or_else(|| "N/A".to_string())
        ));
        md.push(format!(
            "- **Confidence:** {}",
            self.final_confidence.map(|c| format!("{:.2}", c)).unwrap_or_else(|| "N/A".to_string())
        ));
        md.push(format!("- **Total Iterations:** {}", self.iterations.len()));
        md.push(format!("- **Total Tool Calls:** {}", self.total_tool_calls));
        if self.total_tokens > 0 {
            md.push(format!(
                "- **Total Tokens:** {} ({} prompt + {} completion)",
                thousands(self.total_tokens),
                thousands(self.total_prompt_tokens),
                thousands(self.total_completion_tokens)
            ));
        }
        if self.loop_detected {
            md.push("- **⚠️ Loop Detected:** Yes".to_string());
        }
        if self.forced_divergence {
            md.push("- **⚠️ Forced Divergence:** Yes".to_string());
        }
        if self.max_iterations_reached {
            md.push("- **⚠️ Max Iterations Reached:** Yes".to_string());
        }

        if !self.errors.is_empty() {
            md.push(String::new());
            md.push("### Errors".to_string());
            md.extend(self.errors.iter().map(|e| format!("- {}", e)));
        }

        md.push(String::new());
        md.push("---".to_string());
        md.push(String::new());
        md.join("\n")
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
