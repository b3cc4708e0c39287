//! datasci - question-driven data analysis agent
//!
//! Answers natural-language questions about CSV datasets by having an oracle
//! write Python that runs in a sandbox, then validating and explaining the
//! result. Two orchestrators share one interface: a tool-calling ReAct loop
//! and a fixed stage graph.

pub mod agent;
pub mod cli;
pub mod config;
pub mod data;
pub mod llm;
pub mod logsink;
pub mod orchestrator;
pub mod prompts;
pub mod sandbox;
pub mod stages;
pub mod tools;

pub use agent::{ExecutionLog, FinalOutput, OutputKind};
pub use config::Config;
pub use data::{Dataset, DatasetRegistry, Table};
pub use orchestrator::{Orchestrator, StreamUpdate, create_orchestrator};
pub use sandbox::{CodeRunner, ExecutionMode, ExecutionOutcome, PythonSandbox};
