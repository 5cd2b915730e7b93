//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// dossierflow - staged match-dossier synthesis
#[derive(Parser)]
#[command(
    name = "dossierflow",
    about = "Runs the staged dossier pipeline against resilient LLM backends",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the pipeline for one request and print the resulting state
    Run {
        /// JSON request file with match_id, sport_key, team_a, team_b and optional match_date
        #[arg(value_name = "REQUEST.json")]
        request: PathBuf,

        /// Write the state to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the stages of the standard plan
    Stages {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Load the configuration and verify credentials
    Check,
}

/// Output format for listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use text or json", s)),
        }
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dossierflow")
        .join("logs")
        .join("dossierflow.log")
}

/// Generate the after_help text with config search paths and the log location
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    let user_config = dirs::config_dir()
        .map(|d| d.join("dossierflow").join("dossierflow.yml").display().to_string())
        .unwrap_or_else(|| "(no user config directory)".to_string());

    let mut help = String::new();
    help.push_str("Config search order:\n");
    help.push_str("  --config <PATH>\n");
    help.push_str("  ./.dossierflow.yml\n");
    help.push_str(&format!("  {}\n", user_config));
    help.push_str(&format!("\nLogs are written to: {}", get_log_path().display()));
    help
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_output() {
        let cli = Cli::try_parse_from(["dossierflow", "-l", "debug", "run", "req.json", "--output", "out.json"]).unwrap();

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Some(Command::Run { request, output }) => {
                assert_eq!(request, PathBuf::from("req.json"));
                assert_eq!(output, Some(PathBuf::from("out.json")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_stages_format() {
        let cli = Cli::try_parse_from(["dossierflow", "stages", "--format", "JSON"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Stages { format: OutputFormat::Json })));

        assert!(Cli::try_parse_from(["dossierflow", "stages", "--format", "xml"]).is_err());
    }

    #[test]
    fn test_log_path_is_under_dossierflow() {
        assert!(get_log_path().ends_with("dossierflow/logs/dossierflow.log"));
    }
}
