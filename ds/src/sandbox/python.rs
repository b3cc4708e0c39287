//! Subprocess Python runner
//!
//! Each call gets a fresh temp dir and a fresh interpreter, so nothing a call
//! creates (figures, globals, files) survives into the next one.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{CodeRunner, ExecutionMode, ExecutionOutcome, ExecutionOutput, Figure, SandboxError, scan_suspicious_literals};
use crate::config::SandboxConfig;
use crate::data::DatasetRegistry;

const HARNESS: &str = include_str!("harness.py");
const REPORT_MARKER: &str = "__DATASCI_REPORT__";

/// Runs analysis code with an external Python interpreter
#[derive(Debug, Clone)]
pub struct PythonSandbox {
    python: String,
    timeout: Duration,
}

impl PythonSandbox {
    pub fn new(python: impl Into<String>, timeout: Duration) -> Self {
        Self {
            python: python.into(),
            timeout,
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(config.python.clone(), config.timeout())
    }

    async fn run(&self, code: &str, datasets: &DatasetRegistry, mode: ExecutionMode) -> Result<ExecutionOutcome, SandboxError> {
        let workdir = tempfile::tempdir()?;
        debug!(workdir = ?workdir.path(), %mode, "PythonSandbox::run: called");
        write_inputs(workdir.path(), code, datasets).await?;

        let child = Command::new(&self.python)
            .arg(workdir.path().join("harness.py"))
            .arg(workdir.path())
            .arg(mode.as_str())
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SandboxError::Spawn)?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "PythonSandbox::run: execution timed out");
                return Err(SandboxError::Timeout(self.timeout.as_secs_f64()));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(line) = stdout.lines().rev().find_map(|l| l.strip_prefix(REPORT_MARKER)) else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(status = ?output.status, "PythonSandbox::run: no report line");
            return Err(SandboxError::Protocol(format!(
                "interpreter exited with {} and no report: {}",
                output.status,
                tail(&stderr, 500)
            )));
        };

        let report: HarnessReport = serde_json::from_str(line)?;
        Ok(report.into_outcome())
    }
}

#[async_trait]
impl CodeRunner for PythonSandbox {
    async fn execute(&self, code: &str, datasets: &DatasetRegistry, mode: ExecutionMode) -> ExecutionOutcome {
        debug!(code_len = code.len(), %mode, "PythonSandbox::execute: called");
        let start = Instant::now();

        let warnings = scan_suspicious_literals(code, &datasets.names());
        for w in &warnings {
            warn!(warning = %w, "PythonSandbox::execute: suspicious code");
        }

        let mut outcome = match self.run(code, datasets, mode).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(error = %e, "PythonSandbox::execute: runner failed");
                ExecutionOutcome::failure(e.to_string())
            }
        };
        outcome.warnings = warnings;
        outcome.duration_ms = start.elapsed().as_millis() as u64;
        info!(success = outcome.success, duration_ms = outcome.duration_ms, "PythonSandbox::execute: finished");
        outcome
    }
}

async fn write_inputs(dir: &Path, code: &str, datasets: &DatasetRegistry) -> Result<(), SandboxError> {
    let payload: serde_json::Map<String, Value> = datasets
        .iter()
        .map(|d| {
            let entry = serde_json::json!({
                "columns": d.table.columns,
                "records": d.table.to_records(),
            });
            (d.name.clone(), entry)
        })
        .collect();

    tokio::fs::write(dir.join("datasets.json"), serde_json::to_vec(&payload)?).await?;
    tokio::fs::write(dir.join("code.py"), code).await?;
    tokio::fs::write(dir.join("harness.py"), HARNESS).await?;
    Ok(())
}

fn tail(s: &str, max_chars: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(max_chars)).collect::<String>().trim().to_string()
}

#[derive(Debug, Deserialize)]
struct HarnessReport {
    success: bool,
    kind: Option<String>,
    #[serde(default)]
    result_str: String,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    figures: Vec<Figure>,
    #[serde(default)]
    error: String,
    #[serde(default)]
    stdout: String,
}

impl HarnessReport {
    fn into_outcome(self) -> ExecutionOutcome {
        let output = match (self.success, self.kind.as_deref()) {
            (true, Some("visualization")) => Some(ExecutionOutput::Visualization { figures: self.figures }),
            (true, _) => Some(ExecutionOutput::Analysis {
                result_str: self.result_str,
                result: self.result,
            }),
            (false, _) => None,
        };
        ExecutionOutcome {
            success: self.success,
            output,
            error: self.error,
            stdout: self.stdout,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Dataset, Table};
    use serde_json::json;

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn sandbox() -> PythonSandbox {
        PythonSandbox::new("python3", Duration::from_secs(30))
    }

    fn registry() -> DatasetRegistry {
        let table = Table::new(
            vec!["x".to_string()],
            vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]],
        )
        .unwrap();
        DatasetRegistry::new().with(Dataset::new("nums", table, 5))
    }

    #[tokio::test]
    async fn test_analysis_result() {
        if !python_available() {
            return;
        }
        let outcome = sandbox()
            .execute("result = 2 + 2", &DatasetRegistry::new(), ExecutionMode::Analysis)
            .await;
        assert_eq!(outcome.analysis_triple(), (true, "4".to_string(), String::new()));
    }

    #[tokio::test]
    async fn test_exception_is_reported() {
        if !python_available() {
            return;
        }
        let outcome = sandbox()
            .execute("raise ValueError(\"x\")", &DatasetRegistry::new(), ExecutionMode::Analysis)
            .await;
        assert_eq!(outcome.analysis_triple(), (false, String::new(), "ValueError: x".to_string()));
    }

    #[tokio::test]
    async fn test_datasets_are_bound() {
        if !python_available() {
            return;
        }
        let code = "rows = datasets['nums']\nresult = len(rows)\nprint('hello')";
        let outcome = sandbox().execute(code, &registry(), ExecutionMode::Analysis).await;
        assert!(outcome.success, "error: {}", outcome.error);
        assert_eq!(outcome.result_str(), "3");
        assert!(outcome.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_visualization_isolation() {
        if !python_available() {
            return;
        }
        let sandbox = sandbox();
        let datasets = DatasetRegistry::new();

        let first = sandbox
            .execute("figures.append({'x': [1, 2, 3]})", &datasets, ExecutionMode::Visualization)
            .await;
        let (ok, figures, _) = first.visualization_triple();
        assert!(ok);
        assert_eq!(figures.len(), 1);

        let second = sandbox.execute("y = 1", &datasets, ExecutionMode::Visualization).await;
        let (ok, figures, _) = second.visualization_triple();
        assert!(ok);
        assert!(figures.is_empty());
    }

    #[tokio::test]
    async fn test_auto_mode_requires_output() {
        if !python_available() {
            return;
        }
        let outcome = sandbox().execute("y = 1", &DatasetRegistry::new(), ExecutionMode::Auto).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error, "Code did not produce a 'fig' or 'result' variable");
    }

    #[tokio::test]
    async fn test_timeout() {
        if !python_available() {
            return;
        }
        let sandbox = PythonSandbox::new("python3", Duration::from_secs(1));
        let outcome = sandbox
            .execute("import time\ntime.sleep(10)\nresult = 1", &DatasetRegistry::new(), ExecutionMode::Analysis)
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error, "Execution timeout: code exceeded 1 seconds");
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_a_failed_outcome() {
        let sandbox = PythonSandbox::new("/nonexistent/python-for-tests", Duration::from_secs(5));
        let outcome = sandbox.execute("result = 1", &DatasetRegistry::new(), ExecutionMode::Analysis).await;
        assert!(!outcome.success);
        assert!(outcome.error.starts_with("Failed to start interpreter"));
    }

    #[tokio::test]
    async fn test_suspicious_literal_warning_attached() {
        let sandbox = PythonSandbox::new("/nonexistent/python-for-tests", Duration::from_secs(5));
        let outcome = sandbox
            .execute("result = {'mean': 42.0}", &registry(), ExecutionMode::Analysis)
            .await;
        assert_eq!(outcome.warnings.len(), 1);
    }
}
