//! Run logger - persists execution logs to disk
//!
//! Each run gets `{runs_dir}/{run-id}/execution.md` and `execution.json`; the
//! markdown is also appended to `{runs_dir}/log_global.md`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tracing::{debug, info};
use uuid::Uuid;

use crate::agent::ExecutionLog;

pub const GLOBAL_LOG: &str = "log_global.md";

/// Writes execution logs below a runs directory
pub struct RunLogger {
    runs_dir: PathBuf,
}

impl RunLogger {
    pub fn new(runs_dir: impl AsRef<Path>) -> Self {
        let runs_dir = runs_dir.as_ref().to_path_buf();
        debug!(?runs_dir, "RunLogger::new: called");
        Self { runs_dir }
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// Persist one run; returns the run directory
    pub fn write(&self, log: &ExecutionLog) -> Result<PathBuf> {
        let run_dir = self.runs_dir.join(Uuid::now_v7().to_string());
        debug!(?run_dir, "RunLogger::write: called");
        fs::create_dir_all(&run_dir).with_context(|| format!("Failed to create run directory {}", run_dir.display()))?;

        let markdown = log.to_markdown();
        let json = log.to_json().context("Failed to serialize execution log")?;
        fs::write(run_dir.join("execution.md"), &markdown).context("Failed to write execution.md")?;
        fs::write(run_dir.join("execution.json"), json).context("Failed to write execution.json")?;

        let global_path = self.runs_dir.join(GLOBAL_LOG);
        let mut global = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&global_path)
            .with_context(|| format!("Failed to open {}", global_path.display()))?;
        writeln!(global, "{}\n\n---\n", markdown).context("Failed to append to global log")?;

        info!(?run_dir, "RunLogger::write: execution log saved");
        Ok(run_dir)
    }
}
