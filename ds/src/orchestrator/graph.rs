//! GraphAgent - the fixed stage state machine
//!
//! understand -> requirements -> profile -> alignment -> code (retry) ->
//! evaluate -> remediate -> {code, requirements, profile} -> explain, with a
//! terminal error state once code attempts run out. Every node visit becomes
//! one IterationLog carrying one ToolCallLog named after its stage.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Emitter, Orchestrator, StreamUpdate};
use crate::agent::{ExecutionLog, FailedAttempt, FinalOutput, IterationLog, OutputKind, ToolCallLog};
use crate::config::AgentConfig;
use crate::data::DatasetRegistry;
use crate::llm::TokenUsage;
use crate::sandbox::{CodeRunner, ExecutionMode, ExecutionOutcome};
use crate::stages::{
    Alignment, AlignmentRecommendation, CodeContext, DataProfile, EvaluationInput, Evaluation, ExplainContext, Intent,
    OutputFormat, Oracle, Remediation, RemediationAction, Requirements, StageResult, check_alignment, evaluate_results,
    explain_results, formulate_requirements, generate_code, plan_remediation, profile_data, provide_explanation,
    understand_question,
};

/// Node visits before the run is forced into the error state
const MAX_STEPS: u32 = 64;

/// Confidence of a conceptual answer that needed no data
const CONCEPTUAL_CONFIDENCE: f64 = 0.7;

/// Confidence of an answer explaining why the data cannot support the question
const REFUSAL_CONFIDENCE: f64 = 0.5;

/// Ceiling for results that never passed evaluation
const UNVALIDATED_CEILING: f64 = 0.3;

const ERROR_CONFIDENCE: f64 = 0.1;

/// Failed attempts shown to the code-repair prompt
const REPAIR_HISTORY: usize = 3;

/// States of the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphNode {
    Understand,
    Requirements,
    Profile,
    Alignment,
    Code,
    Evaluate,
    Remediate,
    Explain,
    Error,
}

impl GraphNode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphNode::Understand => "understand",
            GraphNode::Requirements => "requirements",
            GraphNode::Profile => "profile",
            GraphNode::Alignment => "alignment",
            GraphNode::Code => "code",
            GraphNode::Evaluate => "evaluate",
            GraphNode::Remediate => "remediate",
            GraphNode::Explain => "explain",
            GraphNode::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GraphNode::Explain | GraphNode::Error)
    }
}

impl fmt::Display for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the nodes accumulate for one question
struct GraphState {
    question: String,
    datasets: Arc<DatasetRegistry>,
    /// Full profiles, for the planning and code prompts
    data_summary: String,
    /// Shape and column lines, for the profiling prompt
    concise_summary: String,

    intent: Intent,
    requirements: Requirements,
    profile: DataProfile,
    alignment: Option<Alignment>,
    code: Option<String>,
    outcome: Option<ExecutionOutcome>,
    evaluation: Option<Evaluation>,
    remediation: Option<Remediation>,

    alignment_iterations: u32,
    code_attempts: u32,
    remediations: u32,
    failed_attempts: Vec<FailedAttempt>,
    step_budget_exhausted: bool,
}

impl GraphState {
    fn new(question: &str, datasets: Arc<DatasetRegistry>) -> Self {
        let data_summary = datasets.profiles();
        let concise_summary = datasets.summaries();
        Self {
            question: question.to_string(),
            datasets,
            data_summary,
            concise_summary,
            intent: Intent::default(),
            requirements: Requirements::default(),
            profile: DataProfile::default(),
            alignment: None,
            code: None,
            outcome: None,
            evaluation: None,
            remediation: None,
            alignment_iterations: 0,
            code_attempts: 0,
            remediations: 0,
            failed_attempts: Vec::new(),
            step_budget_exhausted: false,
        }
    }

    fn guidance(&self) -> Option<&str> {
        self.remediation
            .as_ref()
            .map(|r| r.guidance.as_str())
            .filter(|g| !g.is_empty())
    }

    fn last_error(&self) -> Option<&str> {
        self.outcome
            .as_ref()
            .filter(|o| !o.success)
            .map(|o| o.error.as_str())
    }

    fn attempt_errors(&self) -> Vec<String> {
        self.failed_attempts.iter().map(|a| a.error.clone()).collect()
    }

    /// Data-quality caveats that must reach the user
    fn caveats(&self) -> Vec<String> {
        let mut caveats: Vec<String> = Vec::new();
        let alignment = self.alignment.iter().flat_map(|a| a.caveats.iter());
        for caveat in alignment.chain(self.profile.quality_caveats.iter()) {
            if !caveats.contains(caveat) {
                caveats.push(caveat.clone());
            }
        }
        caveats
    }
}

/// Outcome of one non-terminal node visit
struct Visit {
    next: GraphNode,
    summary: String,
    call: Option<ToolCallLog>,
}

/// Log entry for a stage call
fn stage_call<T: Serialize>(name: &str, arguments: Value, result: &StageResult<T>) -> ToolCallLog {
    let call = ToolCallLog::new(name, arguments)
        .with_result(serde_json::to_value(&result.value).unwrap_or(Value::Null))
        .with_duration(result.duration_ms)
        .with_usage(Some(result.model.clone()), result.usage);
    if result.fallback {
        call.with_error("Stage failed; default used")
    } else {
        call
    }
}

/// The state-machine orchestrator
#[derive(Clone)]
pub struct GraphAgent {
    oracle: Oracle,
    runner: Arc<dyn CodeRunner>,
    settings: AgentConfig,
}

impl GraphAgent {
    pub fn new(oracle: Oracle, runner: Arc<dyn CodeRunner>, settings: AgentConfig) -> Self {
        debug!(
            max_code_attempts = settings.max_code_attempts,
            max_remediations = settings.max_remediations,
            "GraphAgent::new: called"
        );
        Self {
            oracle,
            runner,
            settings,
        }
    }

    async fn drive(&self, question: &str, datasets: Arc<DatasetRegistry>, emit: &Emitter) -> FinalOutput {
        info!(%question, datasets = datasets.len(), "GraphAgent::drive: starting");
        let mut st = GraphState::new(question, datasets);
        let mut log = ExecutionLog::new(question);
        let mut trace = Vec::new();
        let mut node = GraphNode::Understand;
        let mut step = 0;

        loop {
            step += 1;
            if step > MAX_STEPS && !node.is_terminal() {
                warn!(step, %node, "GraphAgent::drive: step budget exhausted");
                st.step_budget_exhausted = true;
                log.record_error(format!("Step budget of {} node visits exhausted at {}", MAX_STEPS, node));
                node = GraphNode::Error;
            }
            debug!(step, %node, "GraphAgent::drive: visiting");

            if node.is_terminal() {
                let (output, call) = match node {
                    GraphNode::Explain => self.explain(&st).await,
                    _ => (self.error_output(&st), None),
                };
                let mut iteration =
                    IterationLog::new(step).with_reasoning(Some(format!("{}: {}", node, output.output_type)));
                if let Some(call) = call {
                    iteration = iteration.with_usage(call.model.clone().unwrap_or_default(), TokenUsage::default());
                    iteration.push_tool_call(call);
                }
                trace.push(format!("{}: finished with {}", node, output.output_type));
                log.add_iteration(iteration.clone());
                emit.iteration(&iteration, &log).await;
                log.finalize(output.output_type, output.confidence, &output.answer);
                info!(steps = step, output_type = %output.output_type, "GraphAgent::drive: finished");

                let output = output.with_trace(trace).with_log(log.clone());
                emit.finish(&output, &log).await;
                return output;
            }

            let visit = self.visit(node, &mut st).await;
            info!(from = %node, to = %visit.next, "GraphAgent::drive: transition");
            trace.push(format!("{}: {}", node, visit.summary));

            let mut iteration = IterationLog::new(step).with_reasoning(Some(visit.summary));
            if let Some(call) = visit.call {
                iteration = iteration.with_usage(call.model.clone().unwrap_or_default(), TokenUsage::default());
                iteration.push_tool_call(call);
            }
            log.add_iteration(iteration.clone());
            emit.iteration(&iteration, &log).await;
            node = visit.next;
        }
    }

    async fn visit(&self, node: GraphNode, st: &mut GraphState) -> Visit {
        match node {
            GraphNode::Understand => self.understand(st).await,
            GraphNode::Requirements => self.requirements(st).await,
            GraphNode::Profile => self.profile(st).await,
            GraphNode::Alignment => self.alignment(st).await,
            GraphNode::Code => self.code(st).await,
            GraphNode::Evaluate => self.evaluate(st).await,
            GraphNode::Remediate => self.remediate(st).await,
            GraphNode::Explain | GraphNode::Error => Visit {
                next: node,
                summary: String::new(),
                call: None,
            },
        }
    }

    async fn understand(&self, st: &mut GraphState) -> Visit {
        let result = understand_question(&self.oracle, &st.question, &st.data_summary).await;
        let call = stage_call("understand_question", json!({ "question": st.question }), &result);
        st.intent = result.value;
        // Conceptual questions go straight to Explain; no code is generated for them
        let next = if st.intent.needs_data_work {
            GraphNode::Requirements
        } else {
            GraphNode::Explain
        };
        Visit {
            next,
            summary: format!("needs data work: {}. {}", st.intent.needs_data_work, st.intent.reasoning),
            call: Some(call),
        }
    }

    async fn requirements(&self, st: &mut GraphState) -> Visit {
        let guidance = st.guidance().map(str::to_string);
        let result = formulate_requirements(&self.oracle, &st.question, &st.data_summary, guidance.as_deref()).await;
        let call = stage_call("formulate_requirements", json!({ "guidance": guidance }), &result);
        st.requirements = result.value;
        Visit {
            next: GraphNode::Profile,
            summary: format!(
                "{} needing [{}], output {}",
                st.requirements.analysis_type,
                st.requirements.variables_needed.join(", "),
                st.requirements.intent.output_format
            ),
            call: Some(call),
        }
    }

    async fn profile(&self, st: &mut GraphState) -> Visit {
        let guidance = st.guidance().map(str::to_string);
        let result = profile_data(
            &self.oracle,
            &st.question,
            &st.requirements,
            &st.concise_summary,
            guidance.as_deref(),
        )
        .await;
        let call = stage_call(
            "profile_data",
            json!({ "variables_needed": st.requirements.variables_needed }),
            &result,
        );
        st.profile = result.value;
        Visit {
            next: GraphNode::Alignment,
            summary: format!(
                "found [{}], missing [{}], suitable: {}",
                st.profile.columns_found.join(", "),
                st.profile.columns_missing.join(", "),
                st.profile.suitable
            ),
            call: Some(call),
        }
    }

    async fn alignment(&self, st: &mut GraphState) -> Visit {
        let result = check_alignment(&self.oracle, &st.requirements, &st.profile).await;
        let call = stage_call(
            "check_alignment",
            json!({ "iteration": st.alignment_iterations + 1 }),
            &result,
        );
        st.alignment_iterations += 1;
        let alignment = result.value;

        let next = if alignment.aligned {
            GraphNode::Code
        } else if st.alignment_iterations >= self.settings.max_alignment_iterations
            || alignment.recommendation == AlignmentRecommendation::CannotProceed
        {
            GraphNode::Explain
        } else if alignment.recommendation == AlignmentRecommendation::ReviseRequirements {
            GraphNode::Requirements
        } else {
            GraphNode::Profile
        };
        let summary = format!("{} (aligned: {})", alignment.recommendation, alignment.aligned);
        st.alignment = Some(alignment);
        Visit {
            next,
            summary,
            call: Some(call),
        }
    }

    async fn code(&self, st: &mut GraphState) -> Visit {
        st.code_attempts += 1;
        let attempt = st.code_attempts;
        let previous_error = st.last_error().map(str::to_string);
        let guidance = st.guidance().map(str::to_string);
        let skip = st.failed_attempts.len().saturating_sub(REPAIR_HISTORY);
        let names = st.datasets.names();

        let result = generate_code(
            &self.oracle,
            CodeContext {
                question: &st.question,
                requirements: &st.requirements,
                profile: &st.profile,
                dataset_names: &names,
                data_summary: &st.data_summary,
                guidance: guidance.as_deref(),
                previous_error: previous_error.as_deref(),
                failed_attempts: &st.failed_attempts[skip..],
            },
        )
        .await;

        let code = result.value.code.clone();
        let outcome = if code.is_empty() {
            ExecutionOutcome::failure(format!("Code generation failed: {}", result.value.reasoning))
        } else {
            let mode = match st.requirements.intent.output_format {
                OutputFormat::Visualization => ExecutionMode::Visualization,
                _ => ExecutionMode::Analysis,
            };
            self.runner.execute(&code, &st.datasets, mode).await
        };

        let mut call = stage_call("generate_code", json!({ "attempt": attempt, "repair": previous_error.is_some() }), &result)
            .with_result(json!({
                "code": code,
                "success": outcome.success,
                "result_str": outcome.result_str(),
                "error": outcome.error,
            }));
        if !outcome.success {
            call = call.with_error(outcome.error.clone());
        }

        let next = if outcome.success {
            GraphNode::Evaluate
        } else {
            st.failed_attempts.push(FailedAttempt {
                approach: code.chars().take(200).collect(),
                error: outcome.error.clone(),
            });
            if attempt >= self.settings.max_code_attempts {
                GraphNode::Error
            } else {
                GraphNode::Code
            }
        };
        let summary = if outcome.success {
            format!("attempt {} succeeded", attempt)
        } else {
            format!("attempt {} failed: {}", attempt, outcome.error)
        };
        st.code = Some(code);
        st.outcome = Some(outcome);
        Visit {
            next,
            summary,
            call: Some(call),
        }
    }

    async fn evaluate(&self, st: &mut GraphState) -> Visit {
        let Some(outcome) = st.outcome.clone() else {
            return Visit {
                next: GraphNode::Error,
                summary: "no execution result to evaluate".to_string(),
                call: None,
            };
        };
        let code = st.code.clone().unwrap_or_default();
        let result = evaluate_results(
            &self.oracle,
            EvaluationInput {
                question: &st.question,
                requirements: &st.requirements,
                code: &code,
                outcome: &outcome,
            },
        )
        .await;
        let call = stage_call(
            "evaluate_results",
            json!({ "output_format": st.requirements.intent.output_format }),
            &result,
        );
        let evaluation = result.value;
        let next = if evaluation.is_valid {
            GraphNode::Explain
        } else {
            GraphNode::Remediate
        };
        let summary = format!("valid: {}, {}", evaluation.is_valid, evaluation.recommendation);
        st.evaluation = Some(evaluation);
        Visit {
            next,
            summary,
            call: Some(call),
        }
    }

    async fn remediate(&self, st: &mut GraphState) -> Visit {
        let evaluation = st.evaluation.clone().unwrap_or_default();
        let code = st.code.clone().unwrap_or_default();
        let errors = st.attempt_errors();
        let result = plan_remediation(&self.oracle, &st.question, &st.requirements, &code, &evaluation, &errors).await;
        let call = stage_call("plan_remediation", json!({ "issues": evaluation.issues }), &result);
        st.remediations += 1;
        st.code_attempts = 0;
        let remediation = result.value;

        let next = if st.remediations >= self.settings.max_remediations {
            GraphNode::Explain
        } else {
            match remediation.action {
                RemediationAction::RewriteCode => GraphNode::Code,
                RemediationAction::ReviseRequirements => GraphNode::Requirements,
                RemediationAction::ReexamineData => GraphNode::Profile,
            }
        };
        let summary = format!("{} ({} of {})", remediation.action, st.remediations, self.settings.max_remediations);
        st.remediation = Some(remediation);
        Visit {
            next,
            summary,
            call: Some(call),
        }
    }

    /// Terminal explanation: of the results, of a concept, or of why the data falls short
    async fn explain(&self, st: &GraphState) -> (FinalOutput, Option<ToolCallLog>) {
        let Some(outcome) = st.outcome.as_ref().filter(|o| o.success) else {
            return self.explain_without_results(st).await;
        };

        let caveats = st.caveats();
        let valid = st.evaluation.as_ref().is_none_or(|e| e.is_valid);
        let attempts_exhausted = !valid && st.remediations >= self.settings.max_remediations;
        let result = explain_results(
            &self.oracle,
            ExplainContext {
                question: &st.question,
                requirements: &st.requirements,
                code: st.code.as_deref(),
                outcome: Some(outcome),
                caveats: &caveats,
                attempts_exhausted,
                remediations: st.remediations,
            },
        )
        .await;
        let call = stage_call("explain_results", json!({ "attempts_exhausted": attempts_exhausted }), &result);

        let confidence = match &st.evaluation {
            Some(e) if e.is_valid => e.confidence,
            Some(e) => e.confidence.min(UNVALIDATED_CEILING),
            None => UNVALIDATED_CEILING,
        };
        let kind = if outcome.is_visualization() {
            OutputKind::Visualization
        } else {
            OutputKind::Analysis
        };
        let mut extra = Vec::new();
        if !valid {
            extra.extend(st.evaluation.iter().flat_map(|e| e.issues.iter().cloned()));
            extra.push("Results could not be fully validated".to_string());
        }
        let output = FinalOutput::new(result.value, confidence, kind)
            .with_result(outcome.analysis_result())
            .with_figures(outcome.figures())
            .with_code(st.code.clone())
            .with_caveats(caveats)
            .with_caveats(extra);
        (output, Some(call))
    }

    async fn explain_without_results(&self, st: &GraphState) -> (FinalOutput, Option<ToolCallLog>) {
        let refusal = st.intent.needs_data_work;
        let issues: Vec<String> = match (&st.alignment, refusal) {
            (Some(alignment), true) => {
                let mut issues = alignment.gaps.clone();
                if !alignment.reasoning.is_empty() {
                    issues.push(alignment.reasoning.clone());
                }
                issues
            }
            _ => Vec::new(),
        };
        let result = provide_explanation(&self.oracle, &st.question, &st.data_summary, &issues).await;
        let call = stage_call("provide_explanation", json!({ "alignment_issues": issues }), &result);

        let output = if refusal {
            let gaps = st.alignment.iter().flat_map(|a| a.gaps.iter().cloned());
            FinalOutput::new(result.value, REFUSAL_CONFIDENCE, OutputKind::Explanation).with_caveats(gaps)
        } else {
            FinalOutput::new(result.value, CONCEPTUAL_CONFIDENCE, OutputKind::Explanation)
        };
        (output, Some(call))
    }

    fn error_output(&self, st: &GraphState) -> FinalOutput {
        let mut answer = if st.step_budget_exhausted {
            "I was unable to complete the analysis: it exceeded its step budget.".to_string()
        } else {
            format!(
                "I was unable to complete the analysis after {} code attempt(s).",
                st.failed_attempts.len()
            )
        };
        if let Some(error) = st.failed_attempts.last() {
            answer.push_str(&format!("\n\n**Last error:**\n`{}`", error.error));
        }
        answer.push_str("\n\nTry rephrasing the question, or check that the columns it mentions exist.");

        let mut caveats = st.attempt_errors();
        if st.step_budget_exhausted {
            caveats.push(format!("Stopped after {} steps", MAX_STEPS));
        }
        FinalOutput::error(answer, ERROR_CONFIDENCE, caveats).with_code(st.code.clone())
    }
}

#[async_trait]
impl Orchestrator for GraphAgent {
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
