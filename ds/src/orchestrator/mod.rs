//! Orchestrators: drive the stages and tools from a question to a FinalOutput
//!
//! Two designs share one interface. `ReactAgent` lets the oracle pick tools in
//! a loop; `GraphAgent` walks a fixed state machine of stages. Both run through
//! a single driver per design, so batch and streaming runs behave identically.

mod degrade;
mod graph;
mod react;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::agent::{ExecutionLog, FinalOutput, IterationLog};
use crate::config::{Config, OrchestratorKind};
use crate::data::DatasetRegistry;
use crate::llm::LlmClient;
use crate::sandbox::CodeRunner;
use crate::stages::Oracle;

pub use degrade::{determine_output_type, graceful_degradation};
pub use graph::{GraphAgent, GraphNode};
pub use react::{APPROACHING_LIMIT_MESSAGE, ReactAgent, TRUNCATED_CAVEAT};

/// Buffered updates before a slow consumer blocks the run
const STREAM_CAPACITY: usize = 64;

/// One step of a streamed run
///
/// Every iteration or node visit yields an update with `iteration` set. The
/// last update carries `final_output`, and no update follows it.
#[derive(Debug, Clone)]
pub struct StreamUpdate {
    pub iteration: Option<IterationLog>,
    pub log: ExecutionLog,
    pub final_output: Option<FinalOutput>,
}

impl StreamUpdate {
    pub fn is_final(&self) -> bool {
        self.final_output.is_some()
    }
}

/// Answers one question against a set of datasets
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Run to completion and return the final output
    async fn run(&self, question: &str, datasets: Arc<DatasetRegistry>) -> FinalOutput;

    /// Run in the background, sending one update per step and the final output last
    fn stream(&self, question: &str, datasets: Arc<DatasetRegistry>) -> mpsc::Receiver<StreamUpdate>;
}

/// Where a driver reports its progress; silent for batch runs
#[derive(Debug, Clone, Default)]
pub(crate) struct Emitter {
    tx: Option<mpsc::Sender<StreamUpdate>>,
}

impl Emitter {
    pub(crate) fn silent() -> Self {
        Self { tx: None }
    }

    pub(crate) fn channel() -> (Self, mpsc::Receiver<StreamUpdate>) {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        (Self { tx: Some(tx) }, rx)
    }

    /// Report a completed iteration
    pub(crate) async fn iteration(&self, iteration: &IterationLog, log: &ExecutionLog) {
        self.send(StreamUpdate {
            iteration: Some(iteration.clone()),
            log: log.clone(),
            final_output: None,
        })
        .await;
    }

    /// Report the final output; must be the last call
    pub(crate) async fn finish(&self, output: &FinalOutput, log: &ExecutionLog) {
        self.send(StreamUpdate {
            iteration: None,
            log: log.clone(),
            final_output: Some(output.clone()),
        })
        .await;
    }

    async fn send(&self, update: StreamUpdate) {
        if let Some(tx) = &self.tx {
            if tx.send(update).await.is_err() {
                debug!("Emitter::send: receiver dropped");
            }
        }
    }
}

/// Build the orchestrator the config selects
pub fn create_orchestrator(
    config: &Config,
    llm: Arc<dyn LlmClient>,
    runner: Arc<dyn CodeRunner>,
) -> Arc<dyn Orchestrator> {
    let oracle = Oracle::from_config(llm, &config.llm);
    info!(orchestrator = ?config.agent.orchestrator, max_iterations = config.agent.max_iterations, "create_orchestrator: called");
    match config.agent.orchestrator {
        OrchestratorKind::React => Arc::new(ReactAgent::new(oracle, runner, config.agent.clone())),
        OrchestratorKind::Graph => Arc::new(GraphAgent::new(oracle, runner, config.agent.clone())),
    }
}
