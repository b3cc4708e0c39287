//! Integration tests for datasci
//!
//! These drive both orchestrators through the public API with a scripted
//! oracle and a canned code runner.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use datasci::agent::{DIVERGENCE_MESSAGE, MAX_ERROR_CONFIDENCE, OutputKind, ToolCallRecord, detect_loop};
use datasci::config::{Config, OrchestratorKind};
use datasci::data::{Dataset, DatasetRegistry, Table};
use datasci::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError, Role, ToolCall};
use datasci::orchestrator::create_orchestrator;
use datasci::sandbox::{CodeRunner, ExecutionMode, ExecutionOutcome, Figure, FigureKind};
use datasci::stages::{
    Alignment, AlignmentRecommendation, DataProfile, EvalRecommendation, OutputFormat, coerce_alignment,
    precheck_evaluation,
};
use serde_json::json;

// =============================================================================
// Fixtures
// =============================================================================

/// Oracle that replays a fixed script and records every request
struct ScriptedClient {
    script: Mutex<VecDeque<CompletionResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedClient {
    fn new(script: Vec<CompletionResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::InvalidResponse("script exhausted".to_string()))
    }
}

/// Runner that hands back canned outcomes in order
struct CannedRunner {
    outcomes: Mutex<VecDeque<ExecutionOutcome>>,
    runs: Mutex<usize>,
}

impl CannedRunner {
    fn new(outcomes: Vec<ExecutionOutcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            runs: Mutex::new(0),
        })
    }

    fn runs(&self) -> usize {
        *self.runs.lock().unwrap()
    }
}

#[async_trait]
impl CodeRunner for CannedRunner {
    async fn execute(&self, _code: &str, _datasets: &DatasetRegistry, _mode: ExecutionMode) -> ExecutionOutcome {
        *self.runs.lock().unwrap() += 1;
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ExecutionOutcome::failure("no outcome scripted"))
    }
}

fn datasets() -> Arc<DatasetRegistry> {
    let table = Table::new(
        vec!["region".to_string(), "revenue".to_string()],
        vec![
            vec![json!("north"), json!(120.5)],
            vec![json!("south"), json!(98.0)],
            vec![json!("north"), json!(99.0)],
        ],
    )
    .expect("valid table");
    let mut registry = DatasetRegistry::new();
    registry.insert(Dataset::new("sales", table, 3));
    Arc::new(registry)
}

fn config(kind: OrchestratorKind, max_iterations: u32) -> Config {
    let mut config = Config::default();
    config.agent.orchestrator = kind;
    config.agent.max_iterations = max_iterations;
    config.agent.max_code_attempts = 3;
    config
}

fn text(s: &str) -> CompletionResponse {
    CompletionResponse::text(s).with_usage(40, 10)
}

fn tool(id: &str, name: &str, input: serde_json::Value) -> CompletionResponse {
    CompletionResponse::tools(None, vec![ToolCall::new(id, name, input)]).with_usage(80, 20)
}

fn planning() -> Vec<CompletionResponse> {
    vec![
        text(r#"{"needs_data_work": true, "reasoning": "needs sales"}"#),
        text(
            r#"{"variables_needed": ["revenue", "region"], "analysis_type": "group mean",
                "intent": {"primary_goal": "compare_groups", "output_format": "numeric", "confidence": 0.9}}"#,
        ),
        text(r#"{"columns_found": ["revenue", "region"], "columns_missing": [], "quality_caveats": [], "suitable": true}"#),
        text(r#"{"aligned": true, "recommendation": "proceed", "gaps": [], "caveats": []}"#),
    ]
}

// =============================================================================
// Graph Orchestrator Tests
// =============================================================================

#[tokio::test]
async fn test_graph_gives_up_after_code_attempt_cap() {
    let mut script = planning();
    script.extend((0..3).map(|_| text("result = sales['revenu'].mean()")));
    let client = ScriptedClient::new(script);
    let runner = CannedRunner::new((0..3).map(|_| ExecutionOutcome::failure("KeyError: 'revenu'")).collect());

    let orchestrator = create_orchestrator(&config(OrchestratorKind::Graph, 8), client.clone(), runner.clone());
    let output = orchestrator.run("What is the mean revenue?", datasets()).await;

    assert_eq!(runner.runs(), 3, "Should stop at exactly the attempt cap");
    assert_eq!(client.calls(), 7);
    assert_eq!(output.output_type, OutputKind::Error);
    assert!(output.confidence <= MAX_ERROR_CONFIDENCE);
    assert!(output.answer.contains("KeyError"));
}

#[tokio::test]
async fn test_graph_answers_conceptual_question_without_code() {
    let client = ScriptedClient::new(vec![
        text(r#"{"needs_data_work": false, "reasoning": "definition"}"#),
        text("Standard deviation measures spread around the mean."),
    ]);
    let runner = CannedRunner::new(vec![]);

    let orchestrator = create_orchestrator(&config(OrchestratorKind::Graph, 8), client.clone(), runner.clone());
    let output = orchestrator.run("What is standard deviation?", datasets()).await;

    assert_eq!(output.output_type, OutputKind::Explanation);
    assert_eq!(runner.runs(), 0);
    assert!(output.answer.contains("spread"));
}

// =============================================================================
// ReAct Orchestrator Tests
// =============================================================================

#[tokio::test]
async fn test_react_degrades_after_max_iterations() {
    let script = (0..5)
        .map(|i| tool(&format!("call-{}", i), "execute_code", json!({"code": "result = sales['x'].sum()"})))
        .collect();
    let client = ScriptedClient::new(script);
    let runner = CannedRunner::new((0..5).map(|_| ExecutionOutcome::failure("KeyError: 'x'")).collect());

    let orchestrator = create_orchestrator(&config(OrchestratorKind::React, 5), client.clone(), runner.clone());
    let output = orchestrator.run("Total x per region?", datasets()).await;

    assert_eq!(client.calls(), 5, "Should call the oracle exactly max_iterations times");
    assert_eq!(output.output_type, OutputKind::Error);
    assert!(output.confidence <= MAX_ERROR_CONFIDENCE);

    let log = output.execution_log.expect("execution log attached");
    assert_eq!(log.iterations.len(), 5);
    assert!(log.max_iterations_reached);
    assert!(log.loop_detected);
    assert!(log.forced_divergence);
}

#[tokio::test]
async fn test_react_loop_injects_single_divergence_message() {
    let mut script: Vec<CompletionResponse> = (0..4)
        .map(|i| tool(&format!("call-{}", i), "execute_code", json!({"code": "bad"})))
        .collect();
    script.push(text("I could not compute the value."));
    let client = ScriptedClient::new(script);
    let runner = CannedRunner::new((0..4).map(|_| ExecutionOutcome::failure("ValueError: bad")).collect());

    let orchestrator = create_orchestrator(&config(OrchestratorKind::React, 10), client.clone(), runner);
    orchestrator.run("q", datasets()).await;

    let last = client.last_request().expect("at least one request");
    let divergence = last
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .filter_map(|m| m.content.as_text())
        .filter(|t| *t == DIVERGENCE_MESSAGE)
        .count();
    assert_eq!(divergence, 1);
}

#[tokio::test]
async fn test_react_stream_sends_final_update_last() {
    let client = ScriptedClient::new(vec![
        tool("call-1", "profile_data", json!({})),
        text("Sales covers the north and south regions."),
    ]);
    let runner = CannedRunner::new(vec![]);

    let orchestrator = create_orchestrator(&config(OrchestratorKind::React, 8), client, runner);
    let mut rx = orchestrator.stream("Which regions exist?", datasets());

    let mut updates = Vec::new();
    while let Some(update) = rx.recv().await {
        updates.push(update);
    }

    assert!(!updates.is_empty());
    assert_eq!(updates.iter().filter(|u| u.is_final()).count(), 1);
    assert!(updates.last().map(|u| u.is_final()).unwrap_or(false));
    let iterations: Vec<u32> = updates
        .iter()
        .filter_map(|u| u.iteration.as_ref().map(|i| i.iteration_num))
        .collect();
    let mut sorted = iterations.clone();
    sorted.sort();
    assert_eq!(iterations, sorted, "Updates should arrive in iteration order");
}

// =============================================================================
// Policy Tests
// =============================================================================

#[test]
fn test_moderate_missingness_does_not_block() {
    let profile = DataProfile {
        columns_found: vec!["income".to_string()],
        suitable: true,
        ..Default::default()
    };
    let alignment = Alignment {
        aligned: false,
        recommendation: AlignmentRecommendation::CannotProceed,
        gaps: vec!["income has 25% missing values".to_string()],
        ..Default::default()
    };

    let coerced = coerce_alignment(alignment, &profile);

    assert!(coerced.aligned);
    assert_eq!(coerced.recommendation, AlignmentRecommendation::ProceedWithCaveats);
    assert!(coerced.caveats.contains(&"income has 25% missing values".to_string()));
}

#[test]
fn test_output_format_is_exclusive() {
    let figure = ExecutionOutcome::visualization(vec![Figure {
        kind: FigureKind::Plotly,
        data: json!({"data": []}),
    }]);
    let numeric = ExecutionOutcome::analysis("4.2", json!(4.2));

    let rejected = precheck_evaluation(OutputFormat::Numeric, &figure).expect("figure rejected for numeric");
    assert!(!rejected.is_valid);
    assert_eq!(rejected.recommendation, EvalRecommendation::WrongOutputFormat);

    let rejected = precheck_evaluation(OutputFormat::Visualization, &numeric).expect("value rejected for chart");
    assert_eq!(rejected.recommendation, EvalRecommendation::WrongOutputFormat);

    assert!(precheck_evaluation(OutputFormat::Numeric, &numeric).is_none());
}

#[test]
fn test_loop_needs_repeated_errors() {
    let clean: Vec<ToolCallRecord> = (0..4).map(|_| ToolCallRecord::new("execute_code", false)).collect();
    assert!(!detect_loop(&clean));

    let mut failing = clean.clone();
    failing[2].had_error = true;
    failing[3].had_error = true;
    assert!(detect_loop(&failing));
}
