//! Built-in analysis tools

mod execute_code;
mod explain_findings;
mod profile_data;
mod validate_results;
mod write_code;

pub use execute_code::ExecuteCodeTool;
pub use explain_findings::ExplainFindingsTool;
pub use profile_data::ProfileDataTool;
pub use validate_results::ValidateResultsTool;
pub use write_code::WriteCodeTool;
