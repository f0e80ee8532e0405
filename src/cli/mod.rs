//! CLI command implementations

use clap::{Parser, Subcommand};
use std::str::FromStr;

pub mod backup;
pub mod endpoints;
pub mod error;
pub mod validate;

pub use backup::BackupArgs;
pub use endpoints::EndpointsCommand;
pub use error::CliError;
pub use validate::ValidateCommand;

/// IGA Backup CLI
#[derive(Parser, Debug)]
#[command(name = "iga-backup")]
#[command(about = "Back up Identity Governance API data to local sinks", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a backup
    Backup(BackupArgs),

    /// List known endpoints and whether they are enabled
    Endpoints(EndpointsCommand),

    /// Validate configuration files without contacting the API
    Validate(ValidateCommand),
}

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}. Valid options: json, human")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backup_command() {
        let cli = Cli::parse_from([
            "iga-backup",
            "--output-format",
            "json",
            "backup",
            "--config",
            "cfg.json",
            "--only",
            "campaigns,grants",
            "--sink",
            "json",
            "--sink",
            "csv",
            "--test-mode",
        ]);
        assert_eq!(cli.output_format, OutputFormat::Json);
        let Commands::Backup(args) = cli.command else {
            panic!("expected backup command");
        };
        assert_eq!(args.only, vec!["campaigns".to_string(), "grants".to_string()]);
        assert_eq!(args.sinks.len(), 2);
        assert!(args.test_mode);
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}
