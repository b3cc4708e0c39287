//! datasci - ask questions about CSV datasets
//!
//! CLI entry point for asking questions, profiling datasets and running code
//! through the sandbox.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use datasci::cli::{AnswerFormat, Cli, Command, load_datasets, progress_line, render_outcome, render_output};
use datasci::config::Config;
use datasci::llm::create_client;
use datasci::logsink::RunLogger;
use datasci::orchestrator::create_orchestrator;
use datasci::prompts::retrieve_examples;
use datasci::sandbox::{CodeRunner, ExecutionMode, PythonSandbox};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("datasci")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("datasci.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Log level comes from the config file before the full load
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!("datasci loaded config: model={}", config.llm.model);

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Ask {
            question,
            data,
            orchestrator,
            max_iterations,
            complexity,
            stream,
            format,
        } => {
            let mut config = config;
            if let Some(kind) = orchestrator {
                config.agent.orchestrator = kind;
            }
            // An explicit budget wins over the complexity preset
            match (max_iterations, complexity) {
                (Some(n), _) => config.agent.max_iterations = n,
                (None, Some(c)) => config.agent.max_iterations = c.max_iterations(),
                (None, None) => {}
            }
            cmd_ask(&config, &question, &data, stream, format).await
        }
        Command::Profile { data } => cmd_profile(&config, &data),
        Command::Examples { question, top_k } => cmd_examples(&config, &question, top_k),
        Command::Exec { code_file, data, mode } => cmd_exec(&config, &code_file, &data, mode).await,
    }
}

async fn cmd_ask(config: &Config, question: &str, data: &[String], stream: bool, format: AnswerFormat) -> Result<()> {
    debug!(%question, stream, ?format, "cmd_ask: called");
    config.validate()?;

    let datasets = Arc::new(load_datasets(data, config.sandbox.sample_rows)?);
    let llm = create_client(&config.llm).context("Failed to create LLM client")?;
    let runner: Arc<dyn CodeRunner> = Arc::new(PythonSandbox::from_config(&config.sandbox));
    let orchestrator = create_orchestrator(config, llm, runner);

    let output = if stream {
        let mut rx = orchestrator.stream(question, datasets);
        let mut final_output = None;
        while let Some(update) = rx.recv().await {
            if let Some(iteration) = &update.iteration {
                eprintln!("{}", progress_line(iteration).dimmed());
            }
            if update.final_output.is_some() {
                final_output = update.final_output;
            }
        }
        final_output.ok_or_else(|| eyre::eyre!("Run ended without a final answer"))?
    } else {
        orchestrator.run(question, datasets).await
    };

    println!("{}", render_output(&output, format)?);

    if let Some(log) = &output.execution_log {
        let logger = RunLogger::new(&config.logging.runs_dir);
        match logger.write(log) {
            Ok(run_dir) => eprintln!("{} {}", "Execution log:".dimmed(), run_dir.display()),
            Err(e) => warn!(error = %e, "cmd_ask: failed to persist execution log"),
        }
    }
    Ok(())
}

fn cmd_profile(config: &Config, data: &[String]) -> Result<()> {
    debug!(count = data.len(), "cmd_profile: called");
    let datasets = load_datasets(data, config.sandbox.sample_rows)?;
    println!("{}", datasets.profiles());
    Ok(())
}

fn cmd_examples(config: &Config, question: &str, top_k: Option<usize>) -> Result<()> {
    let top_k = top_k.unwrap_or(config.agent.examples_top_k);
    debug!(%question, top_k, "cmd_examples: called");
    let examples = retrieve_examples(question, top_k);
    if examples.is_empty() {
        println!("No matching examples");
        return Ok(());
    }
    for example in examples {
        println!("{} {}", example.id.bold(), format!("[{}]", example.tags.join(", ")).dimmed());
        println!("  Q: {}", example.question);
        println!("  Approach: {}", example.approach);
        println!("  Output: {}\n", example.output_var);
    }
    Ok(())
}

async fn cmd_exec(config: &Config, code_file: &PathBuf, data: &[String], mode: ExecutionMode) -> Result<()> {
    debug!(?code_file, %mode, "cmd_exec: called");
    let code = fs::read_to_string(code_file).with_context(|| format!("Failed to read {}", code_file.display()))?;
    let datasets = load_datasets(data, config.sandbox.sample_rows)?;
    let sandbox = PythonSandbox::from_config(&config.sandbox);

    let outcome = sandbox.execute(&code, &datasets, mode).await;
    print!("{}", render_outcome(&outcome));
    if !outcome.success {
        std::process::exit(1);
    }
    Ok(())
}
