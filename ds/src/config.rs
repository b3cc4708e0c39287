//! datasci configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Main datasci configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Oracle (LLM provider) configuration
    pub llm: LlmConfig,

    /// Orchestrator limits and policy
    pub agent: AgentConfig,

    /// Code execution sandbox
    pub sandbox: SandboxConfig,

    /// Log level and run log directory
    pub logging: LoggingConfig,
}

impl Config {
    /// Validate configuration before contacting the oracle
    ///
    /// Checks that the API key environment variable is set so that commands
    /// fail fast with a clear message instead of on the first request.
    pub fn validate(&self) -> Result<()> {
        debug!(api_key_env = %self.llm.api_key_env, "Config::validate: called");
        if std::env::var(&self.llm.api_key_env).is_err() {
            return Err(eyre::eyre!(
                "LLM API key not found. Set the {} environment variable.",
                self.llm.api_key_env
            ));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: ./datasci.yml
        let local_config = PathBuf::from("datasci.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/datasci/datasci.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("datasci").join("datasci.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Errors are swallowed: a broken config file is reported later by `load`.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(p) => vec![p.clone()],
            None => {
                let mut paths = vec![PathBuf::from("datasci.yml")];
                if let Some(dir) = dirs::config_dir() {
                    paths.push(dir.join("datasci").join("datasci.yml"));
                }
                paths
            }
        };

        candidates
            .into_iter()
            .filter(|p| p.exists())
            .find_map(|p| Self::load_from_file(&p).ok())
            .and_then(|c| c.logging.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Oracle provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "openai")
    pub provider: String,

    /// Model used for reasoning, code generation and evaluation
    pub model: String,

    /// Cheaper model for classification-style stages
    #[serde(rename = "fast-model")]
    pub fast_model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Default sampling temperature
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            fast_model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com".to_string(),
            max_tokens: 4096,
            timeout_ms: 120_000,
            temperature: 0.2,
        }
    }
}

impl LlmConfig {
    /// Resolve into the flat form the client constructors take
    pub fn resolve(&self) -> ResolvedLlmConfig {
        debug!(provider = %self.provider, model = %self.model, "LlmConfig::resolve: called");
        ResolvedLlmConfig {
            provider: self.provider.clone(),
            model: self.model.clone(),
            api_key_env: self.api_key_env.clone(),
            base_url: self.base_url.trim_end_matches('/').to_string(),
            max_tokens: self.max_tokens,
            timeout_ms: self.timeout_ms,
        }
    }
}

/// Provider settings with defaults applied
#[derive(Debug, Clone)]
pub struct ResolvedLlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

impl ResolvedLlmConfig {
    /// Read the API key from the configured environment variable
    pub fn get_api_key(&self) -> Result<String> {
        debug!(api_key_env = %self.api_key_env, "ResolvedLlmConfig::get_api_key: called");
        std::env::var(&self.api_key_env).map_err(|_| eyre::eyre!("{} is not set", self.api_key_env))
    }
}

/// Which orchestrator design answers questions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorKind {
    /// Tool-calling loop where the oracle picks the next action
    #[default]
    React,
    /// Fixed stage graph with bounded retries and remediation
    Graph,
}

/// Question complexity presets for the iteration budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Lookups and single aggregations
    Simple,
    /// Hypothesis tests and correlations
    Standard,
    /// Multiple datasets or model fitting
    Complex,
}

impl Complexity {
    /// Iteration budget for this complexity
    pub fn max_iterations(&self) -> u32 {
        match self {
            Complexity::Simple => 5,
            Complexity::Standard => 8,
            Complexity::Complex => 10,
        }
    }
}

/// Orchestrator limits and policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Orchestrator design
    pub orchestrator: OrchestratorKind,

    /// Iteration budget for the tool-calling loop
    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,

    /// Code generation attempts before the graph gives up
    #[serde(rename = "max-code-attempts")]
    pub max_code_attempts: u32,

    /// Alignment checks before the graph explains the gap instead
    #[serde(rename = "max-alignment-iterations")]
    pub max_alignment_iterations: u32,

    /// Remediation rounds before the graph explains what it has
    #[serde(rename = "max-remediations")]
    pub max_remediations: u32,

    /// Tool result characters fed back to the oracle
    #[serde(rename = "tool-result-chars")]
    pub tool_result_chars: usize,

    /// Extra iterations granted by a successful validation
    #[serde(rename = "bonus-iterations")]
    pub bonus_iterations: u32,

    /// Few-shot examples placed in the system prompt
    #[serde(rename = "examples-top-k")]
    pub examples_top_k: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorKind::React,
            max_iterations: 8,
            max_code_attempts: 3,
            max_alignment_iterations: 2,
            max_remediations: 2,
            tool_result_chars: 4000,
            bonus_iterations: 2,
            examples_top_k: 2,
        }
    }
}

/// Code execution sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Python interpreter used to run generated code
    pub python: String,

    /// Wall-clock limit per execution in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Sample rows included in dataset profiles
    #[serde(rename = "sample-rows")]
    pub sample_rows: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            timeout_ms: 30_000,
            sample_rows: 5,
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Directory where execution logs are persisted
    #[serde(rename = "runs-dir")]
    pub runs_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        // XDG data directory (~/.local/share/datasci/runs on Linux)
        let runs_dir = dirs::data_dir()
            .map(|d| d.join("datasci").join("runs"))
            .unwrap_or_else(|| PathBuf::from(".datasci/runs"))
            .to_string_lossy()
            .into_owned();

        Self {
            log_level: None,
            runs_dir,
        }
    }
}
