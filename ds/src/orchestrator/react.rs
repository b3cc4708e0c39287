//! ReactAgent - the tool-calling loop
//!
//! Each iteration sends the whole conversation and the tool set to the oracle.
//! Tool calls run in order and their results go back as the next message. A
//! reply without tool calls is the final answer, validated first when results
//! exist. Running out of iterations ends in graceful degradation.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::degrade::{determine_output_type, graceful_degradation};
use super::{Emitter, Orchestrator, StreamUpdate};
use crate::agent::{
    AgentState, DIVERGENCE_MESSAGE, ExecutionLog, FinalOutput, IterationLog, RetrievedExample, ToolCallLog,
    ToolCallRecord, detect_loop,
};
use crate::config::AgentConfig;
use crate::data::DatasetRegistry;
use crate::llm::{CompletionRequest, CompletionResponse, ContentBlock, Message, StopReason};
use crate::prompts::{build_system_prompt, retrieve_examples};
use crate::sandbox::CodeRunner;
use crate::stages::{Findings, Oracle, validate_results};
use crate::tools::{TERMINAL_TOOL, ToolContext, ToolExecutor};

pub const APPROACHING_LIMIT_MESSAGE: &str = "You are approaching the iteration limit. If you cannot complete the analysis in the next iteration, please provide a summary of what you tried and why it failed.";

const ORCHESTRATOR_MAX_TOKENS: u32 = 2000;

/// Confidence when nothing validated the answer
const UNVALIDATED_CONFIDENCE: f64 = 0.5;

pub const TRUNCATED_CAVEAT: &str = "The answer was cut off at the output token limit";

/// The tool-calling orchestrator
#[derive(Clone)]
pub struct ReactAgent {
    oracle: Oracle,
    runner: Arc<dyn CodeRunner>,
    tools: Arc<ToolExecutor>,
    settings: AgentConfig,
}

impl ReactAgent {
    pub fn new(oracle: Oracle, runner: Arc<dyn CodeRunner>, settings: AgentConfig) -> Self {
        debug!(max_iterations = settings.max_iterations, "ReactAgent::new: called");
        Self {
            oracle,
            runner,
            tools: Arc::new(ToolExecutor::standard()),
            settings,
        }
    }

    async fn drive(&self, question: &str, datasets: Arc<DatasetRegistry>, emit: &Emitter) -> FinalOutput {
        info!(%question, datasets = datasets.len(), "ReactAgent::drive: starting");
        let mut state = AgentState::new(question, datasets, self.settings.max_iterations);
        let mut log = ExecutionLog::new(question);
        let mut trace = Vec::new();

        let examples: Vec<RetrievedExample> = retrieve_examples(question, self.settings.examples_top_k)
            .into_iter()
            .map(RetrievedExample::from)
            .collect();
        let system_prompt = match build_system_prompt(self.oracle.renderer(), &state.datasets, &examples) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = %e, "ReactAgent::drive: system prompt failed");
                log.record_error(format!("System prompt: {}", e));
                let output = FinalOutput::error(
                    format!("The analysis could not be started: {}", e),
                    0.0,
                    vec!["The agent prompt could not be built".to_string()],
                );
                return finish(output, log, emit).await;
            }
        };
        log.retrieved_examples = examples.clone();
        log.system_prompt = Some(system_prompt.clone());
        state.retrieved_examples = examples;
        state.messages.push(Message::user(question));

        let tool_definitions = self.tools.definitions();

        while state.iterations < state.max_iterations {
            state.iterations += 1;
            let n = state.iterations;
            debug!(iteration = n, max_iterations = state.max_iterations, "ReactAgent::drive: iteration");

            let request = CompletionRequest::new(system_prompt.clone(), state.messages.clone())
                .with_tools(tool_definitions.clone())
                .with_max_tokens(ORCHESTRATOR_MAX_TOKENS)
                .with_temperature(self.oracle.temperature());
            let response = match self.oracle.complete(request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(iteration = n, error = %e, "ReactAgent::drive: oracle call failed");
                    log.record_error(format!("Iteration {}: {}", n, e));
                    trace.push(format!("Oracle error: {}", e));
                    let iteration = IterationLog::new(n);
                    log.add_iteration(iteration.clone());
                    emit.iteration(&iteration, &log).await;
                    continue;
                }
            };

            debug!(iteration = n, tokens = response.usage.total(), stop_reason = ?response.stop_reason, "ReactAgent::drive: oracle replied");
            let mut iteration = IterationLog::new(n)
                .with_reasoning(response.content.clone())
                .with_usage(response.model.clone(), response.usage);

            if response.tool_calls.is_empty() {
                match self.final_answer(&mut state, &mut iteration, &mut trace, &response).await {
                    Some(output) => {
                        log.add_iteration(iteration.clone());
                        emit.iteration(&iteration, &log).await;
                        log.finalize(output.output_type, output.confidence, &output.answer);
                        info!(iterations = n, output_type = %output.output_type, "ReactAgent::drive: final answer");
                        return finish(output.with_trace(trace), log, emit).await;
                    }
                    None => {
                        log.add_iteration(iteration.clone());
                        emit.iteration(&iteration, &log).await;
                        continue;
                    }
                }
            }

            state.messages.push(assistant_message(&response));
            let mut result_blocks = Vec::with_capacity(response.tool_calls.len());
            let mut findings: Option<Value> = None;

            for call in &response.tool_calls {
                trace.push(format!("Tool: {}", call.name));
                let start = Instant::now();
                let result = {
                    let mut ctx = ToolContext::new(&mut state, &self.oracle, self.runner.as_ref());
                    self.tools.execute(call, &mut ctx).await
                };
                let duration_ms = start.elapsed().as_millis() as u64;
                let had_error = result.had_error();
                debug!(tool = %call.name, had_error, duration_ms, "ReactAgent::drive: tool finished");

                let mut call_log = ToolCallLog::new(&call.name, call.input.clone())
                    .with_result(result.content.clone())
                    .with_duration(duration_ms)
                    .with_usage(result.model.clone(), result.usage.unwrap_or_default());
                if had_error && call_log.success {
                    call_log = call_log.with_error("Tool reported an error");
                }
                iteration.push_tool_call(call_log);
                state.tool_call_history.push(ToolCallRecord::new(&call.name, had_error));
                result_blocks.push(ContentBlock::tool_result(
                    &call.id,
                    result.to_message_text(self.settings.tool_result_chars),
                    had_error,
                ));

                if had_error {
                    continue;
                }
                if call.name == "validate_results" && state.validation.as_ref().is_some_and(|v| v.is_valid) {
                    state.grant_bonus(self.settings.bonus_iterations);
                    trace.push(format!(
                        "Validation successful - granted +{} bonus iterations",
                        self.settings.bonus_iterations
                    ));
                }
                if call.name == TERMINAL_TOOL {
                    findings = Some(result.content);
                    break;
                }
            }

            if let Some(content) = findings {
                let output = self.findings_output(&state, content);
                log.add_iteration(iteration.clone());
                emit.iteration(&iteration, &log).await;
                log.finalize(output.output_type, output.confidence, &output.answer);
                info!(iterations = n, output_type = %output.output_type, "ReactAgent::drive: findings explained");
                return finish(output.with_trace(trace), log, emit).await;
            }

            state.messages.push(Message::user_blocks(result_blocks));

            if detect_loop(&state.tool_call_history) {
                warn!(iteration = n, "ReactAgent::drive: loop detected, forcing divergence");
                state.messages.push(Message::system(DIVERGENCE_MESSAGE));
                trace.push("Loop detected - forcing divergence".to_string());
                log.loop_detected = true;
                log.forced_divergence = true;
            }

            // The next iteration is the last one
            if state.iterations + 1 >= state.max_iterations && !state.failed_attempts.is_empty() && !state.has_results() {
                debug!(iteration = n, "ReactAgent::drive: approaching limit");
                state.messages.push(Message::system(APPROACHING_LIMIT_MESSAGE));
            }

            log.add_iteration(iteration.clone());
            emit.iteration(&iteration, &log).await;
        }

        let output = graceful_degradation(&state, trace, log);
        let log = output.execution_log.clone().unwrap_or_else(|| ExecutionLog::new(question));
        emit.finish(&output, &log).await;
        output
    }

    /// Handle a reply without tool calls; `None` means the loop continues
    async fn final_answer(
        &self,
        state: &mut AgentState,
        iteration: &mut IterationLog,
        trace: &mut Vec<String>,
        response: &CompletionResponse,
    ) -> Option<FinalOutput> {
        let answer = response.content.clone().unwrap_or_default();
        trace.push("Final answer provided".to_string());

        if state.has_results() && !state.is_validated() {
            let result_str = state.current_results.as_ref().map(|r| r.result_str()).unwrap_or_default();
            let start = Instant::now();
            let validation =
                validate_results(&self.oracle, &state.question, &result_str, state.current_code.as_deref()).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let content = serde_json::to_value(&validation.value).unwrap_or(Value::Null);
            let mut call_log = ToolCallLog::new(
                "validate_results (forced)",
                json!({ "results_summary": result_str.chars().take(100).collect::<String>() }),
            )
            .with_result(content)
            .with_duration(duration_ms)
            .with_usage(Some(validation.model.clone()), validation.usage);
            let is_valid = validation.value.is_valid;
            if !is_valid {
                call_log = call_log.with_error(validation.value.issues.join("; "));
            }
            iteration.push_tool_call(call_log);
            let issues = validation.value.issues.clone();
            state.validation = Some(validation.value);

            if !is_valid {
                info!(issues = issues.len(), "ReactAgent::final_answer: forced validation failed");
                trace.push("Forced validation failed".to_string());
                if !answer.trim().is_empty() {
                    state.messages.push(Message::assistant(answer));
                }
                state.messages.push(Message::system(format!(
                    "Validation failed: {:?}. Please address these issues.",
                    issues
                )));
                return None;
            }
            state.grant_bonus(self.settings.bonus_iterations);
        }

        let answer = if answer.trim().is_empty() {
            state
                .current_results
                .as_ref()
                .map(|r| r.result_str())
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "No answer was produced.".to_string())
        } else {
            answer
        };
        let confidence = state.validation.as_ref().map_or(UNVALIDATED_CONFIDENCE, |v| v.confidence);
        let mut caveats = state.validation.as_ref().map(|v| v.issues.clone()).unwrap_or_default();
        if response.stop_reason == StopReason::MaxTokens {
            warn!("ReactAgent::final_answer: answer truncated at the token limit");
            caveats.push(TRUNCATED_CAVEAT.to_string());
        }
        Some(self.output_from_state(state, answer, confidence).with_caveats(caveats))
    }

    /// Final output from a successful explain_findings call
    fn findings_output(&self, state: &AgentState, content: Value) -> FinalOutput {
        let findings: Findings = serde_json::from_value(content).unwrap_or_default();
        let confidence = state.validation.as_ref().map_or(UNVALIDATED_CONFIDENCE, |v| v.confidence);
        let validation_issues = state.validation.as_ref().map(|v| v.issues.clone()).unwrap_or_default();
        self.output_from_state(state, findings.explanation, confidence)
            .with_caveats(findings.caveats)
            .with_caveats(validation_issues)
    }

    fn output_from_state(&self, state: &AgentState, answer: String, confidence: f64) -> FinalOutput {
        let current = state.current_results.as_ref().filter(|r| r.success);
        FinalOutput::new(answer, confidence, determine_output_type(state))
            .with_result(current.and_then(|r| r.analysis_result()))
            .with_figures(current.map(|r| r.figures()).unwrap_or_default())
            .with_code(state.current_code.clone())
    }
}

/// Assistant turn carrying the reasoning text and the tool calls
fn assistant_message(response: &CompletionResponse) -> Message {
    let mut blocks = Vec::new();
    if let Some(text) = response.content.as_ref().filter(|t| !t.is_empty()) {
        blocks.push(ContentBlock::text(text.clone()));
    }
    for call in &response.tool_calls {
        blocks.push(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
        });
    }
    Message::assistant_blocks(blocks)
}

/// Attach the log, send the final update and hand the output back
async fn finish(output: FinalOutput, log: ExecutionLog, emit: &Emitter) -> FinalOutput {
    let output = output.with_log(log.clone());
    emit.finish(&output, &log).await;
    output
}

#[async_trait]
impl Orchestrator for ReactAgent {
    async fn run(&self, question: &str, datasets: Arc<DatasetRegistry>) -> FinalOutput {
        self.drive(question, datasets, &Emitter::silent()).await
    }

    fn stream(&self, question: &str, datasets: Arc<DatasetRegistry>) -> mpsc::Receiver<StreamUpdate> {
        let (emit, rx) = Emitter::channel();
        let agent = self.clone();
        let question = question.to_string();
        tokio::spawn(async move {
            agent.drive(&question, datasets, &emit).await;
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{MAX_ERROR_CONFIDENCE, OutputKind};
    use crate::llm::{Role, ToolCall};
    use crate::sandbox::ExecutionOutcome;
    use crate::sandbox::stub::StubRunner;
    use crate::stages::testing::oracle;
    use crate::tools::builtin::testing::registry;

    const VALID: &str = r#"{"is_valid": true, "confidence": 0.9, "issues": [], "suggestions": []}"#;

    fn call(id: &str, name: &str, input: Value) -> CompletionResponse {
        CompletionResponse::tools(None, vec![ToolCall::new(id, name, input)]).with_usage(100, 20)
    }

    fn settings(max_iterations: u32) -> AgentConfig {
        AgentConfig {
            max_iterations,
            ..Default::default()
        }
    }

    fn agent(
        responses: Vec<CompletionResponse>,
        outcomes: Vec<ExecutionOutcome>,
        max_iterations: u32,
    ) -> (ReactAgent, Arc<crate::llm::client::mock::MockLlmClient>, Arc<StubRunner>) {
        let (oracle, client) = oracle(responses);
        let runner = Arc::new(StubRunner::new(outcomes));
        (ReactAgent::new(oracle, runner.clone(), settings(max_iterations)), client, runner)
    }

    #[tokio::test]
    async fn test_full_tool_sequence() {
        let (agent, client, runner) = agent(
            vec![
                call("c1", "profile_data", json!({"check_requirements": ["revenue", "region"]})),
                call("c2", "write_code", json!({"approach": "mean revenue by region", "output_var": "result"})),
                CompletionResponse::text("```python\nresult = df.groupby('region')['revenue'].mean()\n```"),
                call("c3", "execute_code", json!({"code": "result = df.groupby('region')['revenue'].mean()"})),
                call("c4", "validate_results", json!({"results_summary": "north 109.75"})),
                CompletionResponse::text(VALID),
                call("c5", "explain_findings", json!({"key_findings": ["North leads"], "caveats": ["Small sample"]})),
                CompletionResponse::text("North has the highest average revenue."),
            ],
            vec![ExecutionOutcome::analysis("north 109.75", json!({"north": 109.75}))],
            8,
        );

        let output = agent.run("What is the average revenue by region?", registry()).await;

        assert_eq!(output.answer, "North has the highest average revenue.");
        assert_eq!(output.output_type, OutputKind::Analysis);
        assert_eq!(output.confidence, 0.9);
        assert_eq!(output.caveats, vec!["Small sample"]);
        assert_eq!(output.result, Some(json!({"north": 109.75})));
        assert_eq!(runner.codes().len(), 1);
        assert_eq!(client.call_count(), 8);

        let log = output.execution_log.unwrap();
        assert_eq!(log.iterations.len(), 5);
        assert_eq!(log.total_tool_calls, 5);
        assert!(log.system_prompt.is_some());
        assert!(!log.max_iterations_reached);
        assert_eq!(log.final_confidence, Some(0.9));
        let sum: u64 = log.iterations.iter().map(|i| i.total_tokens).sum();
        assert_eq!(log.total_tokens, sum);
    }

    #[tokio::test]
    async fn test_requests_use_tools_and_settings() {
        let (agent, client, _) = agent(vec![CompletionResponse::text("Averages need data.")], vec![], 8);

        let output = agent.run("What does a p-value mean?", registry()).await;

        assert_eq!(output.output_type, OutputKind::Explanation);
        assert_eq!(output.confidence, 0.5);
        let request = &client.requests()[0];
        assert_eq!(request.max_tokens, 2000);
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.tools.len(), 5);
        assert_eq!(request.messages[0].content.as_text(), Some("What does a p-value mean?"));
    }

    #[tokio::test]
    async fn test_requests_use_configured_temperature() {
        let (oracle, client) = oracle(vec![CompletionResponse::text("A median is the middle value.")]);
        let agent = ReactAgent::new(oracle.with_temperature(0.6), Arc::new(StubRunner::new(vec![])), settings(8));

        agent.run("What is a median?", registry()).await;

        assert_eq!(client.requests()[0].temperature, Some(0.6));
    }

    #[tokio::test]
    async fn test_truncated_answer_gets_caveat() {
        let mut truncated = CompletionResponse::text("The mean revenue is");
        truncated.stop_reason = StopReason::MaxTokens;
        let (agent, _, _) = agent(vec![truncated], vec![], 8);

        let output = agent.run("What is the mean revenue?", registry()).await;

        assert!(output.caveats.contains(&TRUNCATED_CAVEAT.to_string()));
    }

    #[tokio::test]
    async fn test_forced_validation_failure_continues() {
        let invalid = r#"{"is_valid": false, "confidence": 0.3, "issues": ["Mean ignores missing values"]}"#;
        let (agent, _, _) = agent(
            vec![
                call("c1", "execute_code", json!({"code": "result = df['revenue'].mean()"})),
                CompletionResponse::text("The mean is 102."),
                CompletionResponse::text(invalid),
                CompletionResponse::text("Corrected: the mean is 102 over non-null rows."),
            ],
            vec![ExecutionOutcome::analysis("102.0", json!(102.0))],
            8,
        );

        let output = agent.run("Average revenue?", registry()).await;

        assert_eq!(output.answer, "Corrected: the mean is 102 over non-null rows.");
        assert_eq!(output.confidence, 0.3);
        assert_eq!(output.caveats, vec!["Mean ignores missing values"]);
        let log = output.execution_log.unwrap();
        assert_eq!(log.iterations.len(), 3);
        let forced = &log.iterations[1].tool_calls[0];
        assert_eq!(forced.tool_name, "validate_results (forced)");
        assert!(!forced.success);
    }

    #[tokio::test]
    async fn test_forced_validation_success_finalizes() {
        let (agent, client, _) = agent(
            vec![
                call("c1", "execute_code", json!({"code": "result = 4"})),
                CompletionResponse::text("The answer is 4."),
                CompletionResponse::text(VALID),
            ],
            vec![ExecutionOutcome::analysis("4", json!(4))],
            8,
        );

        let output = agent.run("q", registry()).await;

        assert_eq!(output.answer, "The answer is 4.");
        assert_eq!(output.confidence, 0.9);
        assert_eq!(client.call_count(), 3);
        let log = output.execution_log.unwrap();
        assert_eq!(log.iterations[1].tool_calls[0].tool_name, "validate_results (forced)");
    }

    #[tokio::test]
    async fn test_degrades_after_max_iterations() {
        let responses = (0..4)
            .map(|i| call(&format!("c{}", i), "execute_code", json!({"code": "result = df['nope'].mean()"})))
            .collect();
        let outcomes = (0..4).map(|_| ExecutionOutcome::failure("KeyError: 'nope'")).collect();
        let (agent, client, _) = agent(responses, outcomes, 4);

        let output = agent.run("q", registry()).await;

        assert_eq!(client.call_count(), 4);
        assert_eq!(output.output_type, OutputKind::Error);
        assert!(output.confidence <= MAX_ERROR_CONFIDENCE);
        assert!(output.caveats.contains(&"Analysis incomplete due to iteration limit".to_string()));
        let log = output.execution_log.unwrap();
        assert!(log.max_iterations_reached);
        assert!(log.loop_detected);
        assert!(log.forced_divergence);
        assert_eq!(log.iterations.len(), 4);
    }

    #[tokio::test]
    async fn test_loop_injects_divergence_message() {
        let responses = (0..4)
            .map(|i| call(&format!("c{}", i), "execute_code", json!({"code": "bad"})))
            .chain(std::iter::once(CompletionResponse::text("I could not compute it.")))
            .collect();
        let outcomes = (0..4).map(|_| ExecutionOutcome::failure("ValueError: bad")).collect();
        let (agent, client, _) = agent(responses, outcomes, 8);

        agent.run("q", registry()).await;

        let last = client.requests().pop().unwrap();
        let system_texts: Vec<&str> = last
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .filter_map(|m| m.content.as_text())
            .collect();
        assert_eq!(system_texts, vec![DIVERGENCE_MESSAGE]);
    }

    #[tokio::test]
    async fn test_approaching_limit_message() {
        let responses = (0..3)
            .map(|i| call(&format!("c{}", i), "execute_code", json!({"code": "bad"})))
            .collect();
        let outcomes = (0..3).map(|_| ExecutionOutcome::failure("IndexError: out of bounds")).collect();
        let (agent, client, _) = agent(responses, outcomes, 3);

        agent.run("q", registry()).await;

        let last = client.requests().pop().unwrap();
        let injected = last
            .messages
            .iter()
            .filter_map(|m| m.content.as_text())
            .any(|t| t == APPROACHING_LIMIT_MESSAGE);
        assert!(injected);
    }

    #[tokio::test]
    async fn test_oracle_failure_counts_as_iteration() {
        let (agent, _, _) = agent(vec![], vec![], 2);

        let output = agent.run("q", registry()).await;

        let log = output.execution_log.unwrap();
        assert_eq!(log.iterations.len(), 2);
        assert_eq!(log.errors.len(), 2);
        assert!(log.errors[0].starts_with("Iteration 1: "));
        assert_eq!(output.output_type, OutputKind::Error);
    }

    #[tokio::test]
    async fn test_stream_ends_with_single_final_update() {
        let (agent, _, _) = agent(
            vec![
                call("c1", "profile_data", json!({})),
                CompletionResponse::text("Regions are north, south and east."),
            ],
            vec![],
            8,
        );

        let mut rx = agent.stream("Which regions exist?", registry());
        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }

        assert_eq!(updates.len(), 3);
        assert!(updates[..2].iter().all(|u| u.iteration.is_some() && !u.is_final()));
        assert!(updates[2].is_final());
        assert_eq!(updates.iter().filter(|u| u.is_final()).count(), 1);
        assert_eq!(updates[2].log.iterations.len(), 2);
    }

    #[tokio::test]
    async fn test_valid_validation_grants_bonus() {
        let (agent, _, _) = agent(
            vec![
                call("c1", "execute_code", json!({"code": "result = 4"})),
                call("c2", "validate_results", json!({"results_summary": "4"})),
                CompletionResponse::text(VALID),
                call("c3", "profile_data", json!({})),
                CompletionResponse::text("It is 4."),
            ],
            vec![ExecutionOutcome::analysis("4", json!(4))],
            3,
        );

        let output = agent.run("q", registry()).await;

        assert_eq!(output.answer, "It is 4.");
        assert_eq!(output.execution_log.unwrap().iterations.len(), 4);
    }
}
