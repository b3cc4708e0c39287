//! Tool system for the tool-calling agent
//!
//! Tools read and update the per-question `AgentState` through a
//! `ToolContext`, which also carries the oracle and the code runner. A tool
//! never fails outward: errors come back as `{"error": ...}` results.

mod context;
mod error;
mod executor;
mod traits;

pub mod builtin;

pub use context::ToolContext;
pub use error::ToolError;
pub use executor::{TERMINAL_TOOL, ToolExecutor};
pub use traits::{Tool, ToolResult, parse_args};
