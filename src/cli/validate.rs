//! Validation subcommand

use super::{CliError, OutputFormat};
use crate::config::{BackupConfig, EndpointCatalog, EndpointToggles};
use clap::Parser;
use serde_json::json;
use std::path::{Path, PathBuf};

/// Validate command for checking configuration files offline
#[derive(Parser, Debug)]
pub struct ValidateCommand {
    /// What to validate
    #[command(subcommand)]
    pub target: ValidateTarget,
}

/// Target type for validation
#[derive(clap::Subcommand, Debug)]
pub enum ValidateTarget {
    /// Validate a run configuration file (with environment overrides applied)
    Config {
        /// Configuration file
        #[arg(default_value = "configs/config.json")]
        path: PathBuf,
    },
    /// Validate an endpoint enablement file against the catalog
    Endpoints {
        /// Endpoint enablement file
        #[arg(default_value = "configs/endpoints.json")]
        path: PathBuf,
    },
}

impl ValidateCommand {
    /// Execute the validation command
    pub fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        match &self.target {
            ValidateTarget::Config { path } => self.validate_config(path, format),
            ValidateTarget::Endpoints { path } => self.validate_endpoints(path, format),
        }
    }

    fn validate_config(&self, path: &Path, format: OutputFormat) -> Result<(), CliError> {
        let config = BackupConfig::from_file(path)?.with_env_overrides();
        if let Err(e) = config.validate() {
            eprintln!("Invalid configuration {}: {e}", path.display());
            return Err(e.into());
        }

        let auth = if config.auth.api_token.is_some() {
            "api_token"
        } else {
            "oauth_client_credentials"
        };
        match format {
            OutputFormat::Json => println!(
                "{}",
                json!({
                    "valid": true,
                    "base_url": config.base_url(),
                    "auth": auth,
                    "sinks": config.output.sinks,
                    "output_root": config.output.root,
                })
            ),
            OutputFormat::Human => {
                println!("Valid configuration: {}", path.display());
                println!("  Base URL: {}", config.base_url());
                println!("  Auth: {auth}");
                println!("  Output root: {}", config.output.root.display());
                println!("  Requests/minute: {}", config.rate_limit.requests_per_minute);
            }
        }
        Ok(())
    }

    fn validate_endpoints(&self, path: &Path, format: OutputFormat) -> Result<(), CliError> {
        if !path.exists() {
            return Err(CliError::InvalidArgument(format!(
                "{} does not exist",
                path.display()
            )));
        }
        let toggles = EndpointToggles::load(path)?;
        let enabled = match EndpointCatalog::builtin().enabled(&toggles) {
            Ok(enabled) => enabled,
            Err(e) => {
                eprintln!("Invalid endpoint file {}: {e}", path.display());
                return Err(e.into());
            }
        };

        match format {
            OutputFormat::Json => println!(
                "{}",
                json!({
                    "valid": true,
                    "global": enabled.global().iter().map(|s| &s.name).collect::<Vec<_>>(),
                    "resource": enabled.resource().iter().map(|s| &s.name).collect::<Vec<_>>(),
                })
            ),
            OutputFormat::Human => {
                println!("Valid endpoint file: {}", path.display());
                println!("  Global endpoints enabled: {}", enabled.global().len());
                println!("  Resource endpoints enabled: {}", enabled.resource().len());
            }
        }
        Ok(())
    }
}
