//! dossierflow - staged match-dossier synthesis
//!
//! CLI entry point for running the pipeline and inspecting its configuration.

use std::fs;
use std::path::Path;

use clap::{CommandFactory, FromArgMatches};
use eyre::{Context, Result};
use serde_json::{Value, json};
use tracing::{debug, info};

use dossierflow::cli::{Cli, Command, OutputFormat, generate_after_help, get_log_path};
use dossierflow::config::Config;
use dossierflow::pipeline::{Pipeline, Plan};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > INFO
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

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

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
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Log level comes from the config file before the full load
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(model = %config.llm.model, research = %config.research.model, "dossierflow loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Run { request, output }) => cmd_run(&config, &request, output.as_deref()).await,
        Some(Command::Stages { format }) => cmd_stages(format),
        Some(Command::Check) => cmd_check(&config),
        None => {
            Cli::command().after_help(generate_after_help()).print_help()?;
            Ok(())
        }
    }
}

async fn cmd_run(config: &Config, request_path: &Path, output: Option<&Path>) -> Result<()> {
    debug!(?request_path, ?output, "cmd_run: called");
    let text = fs::read_to_string(request_path)
        .with_context(|| format!("Failed to read request file {}", request_path.display()))?;
    let request: Value = serde_json::from_str(&text)
        .with_context(|| format!("Request file {} is not valid JSON", request_path.display()))?;

    config.validate()?;
    let pipeline = Pipeline::from_config(config).context("Failed to build pipeline")?;

    let state = pipeline.run_pipeline(request).await;
    let rendered = serde_json::to_string_pretty(&state).context("Failed to serialize plan state")?;

    match output {
        Some(path) => {
            fs::write(path, rendered).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote plan state to {}", path.display());
        }
        None => println!("{}", rendered),
    }

    if let Some(error) = state.error_message() {
        eprintln!("Pipeline failed: {}", error);
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_stages(format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_stages: called");
    let plan = Plan::standard();
    match format {
        OutputFormat::Text => {
            println!("{:<4} {:<38} AGENT", "#", "STAGE");
            for (i, step) in plan.steps().iter().enumerate() {
                println!("{:<4} {:<38} {}", i + 1, step.stage, step.agent);
            }
        }
        OutputFormat::Json => {
            let steps: Vec<Value> = plan
                .steps()
                .iter()
                .enumerate()
                .map(|(i, step)| json!({"position": i + 1, "stage": step.stage, "agent": step.agent}))
                .collect();
            println!("{}", serde_json::to_string_pretty(&steps)?);
        }
    }
    Ok(())
}

fn cmd_check(config: &Config) -> Result<()> {
    debug!("cmd_check: called");
    for (role, llm) in [("analysis", &config.llm), ("research", &config.research), ("repair", &config.repair)] {
        println!("{:<9} {} / {} (key: ${})", role, llm.provider, llm.model, llm.api_key_env);
    }
    println!("concurrency limit: {}", config.dispatch.concurrency_limit);
    match config.validate() {
        Ok(()) => {
            println!("Configuration OK");
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}
