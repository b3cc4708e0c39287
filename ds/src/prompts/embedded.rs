//! Embedded prompts
//!
//! These are compiled into the binary from .pmt files at build time.

use tracing::debug;

/// Tool-calling agent system prompt
pub const REACT_SYSTEM: &str = include_str!("../../prompts/react-system.pmt");

/// write_code tool instruction
pub const WRITE_CODE: &str = include_str!("../../prompts/write-code.pmt");

/// Result validation instruction
pub const VALIDATE: &str = include_str!("../../prompts/validate.pmt");

/// explain_findings tool instruction
pub const EXPLAIN_FINDINGS: &str = include_str!("../../prompts/explain-findings.pmt");

pub const UNDERSTAND: &str = include_str!("../../prompts/understand.pmt");
pub const REQUIREMENTS: &str = include_str!("../../prompts/requirements.pmt");
pub const PROFILE: &str = include_str!("../../prompts/profile.pmt");
pub const ALIGNMENT: &str = include_str!("../../prompts/alignment.pmt");
pub const GENERATE_CODE: &str = include_str!("../../prompts/generate-code.pmt");
pub const EVALUATE: &str = include_str!("../../prompts/evaluate.pmt");
pub const REMEDIATE: &str = include_str!("../../prompts/remediate.pmt");
pub const EXPLAIN_RESULTS: &str = include_str!("../../prompts/explain-results.pmt");
pub const CONCEPTUAL: &str = include_str!("../../prompts/conceptual.pmt");

/// Every embedded template with its name
pub const ALL: &[(&str, &str)] = &[
    ("react-system", REACT_SYSTEM),
    ("write-code", WRITE_CODE),
    ("validate", VALIDATE),
    ("explain-findings", EXPLAIN_FINDINGS),
    ("understand", UNDERSTAND),
    ("requirements", REQUIREMENTS),
    ("profile", PROFILE),
    ("alignment", ALIGNMENT),
    ("generate-code", GENERATE_CODE),
    ("evaluate", EVALUATE),
    ("remediate", REMEDIATE),
    ("explain-results", EXPLAIN_RESULTS),
    ("conceptual", CONCEPTUAL),
];

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    let found = ALL.iter().find(|(n, _)| *n == name).map(|(_, t)| *t);
    if found.is_none() {
        debug!("get_embedded: no match found");
    }
    found
}
