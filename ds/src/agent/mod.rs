//! Agent data model: working state, execution log, final output and the
//! loop safeguard

mod log;
mod loop_detection;
mod output;
mod state;

pub use log::{ExecutionLog, IterationLog, RetrievedExample, ToolCallLog};
pub use loop_detection::{DIVERGENCE_MESSAGE, ToolCallRecord, detect_loop};
pub use output::{FinalOutput, MAX_ERROR_CONFIDENCE, OutputKind, clamp_confidence};
pub use state::{AgentState, FailedAttempt};
