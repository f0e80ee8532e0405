//! Backup command implementation

use super::{CliError, OutputFormat};
use crate::backup::{BackupExecutor, RunSummary};
use crate::config::{BackupConfig, EndpointCatalog, EndpointToggles, SinkKind};
use crate::shutdown::SharedShutdown;
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Output root used by `--test-mode` unless `--output-dir` is given
pub const TEST_MODE_OUTPUT_DIR: &str = "test_backup";

/// Arguments for the backup command
#[derive(Parser, Debug)]
pub struct BackupArgs {
    /// Run configuration file (JSON); OKTA_* environment variables override it
    #[arg(long, env = "IGA_BACKUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Endpoint enablement file; when missing every endpoint is enabled
    #[arg(long, default_value = "configs/endpoints.json")]
    pub endpoints_file: PathBuf,

    /// Only back up these endpoints (comma-separated names)
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Root directory for file sinks
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Sinks to write to: json, csv, log (repeatable)
    #[arg(long = "sink", value_delimiter = ',')]
    pub sinks: Vec<SinkKind>,

    /// Overall run deadline in seconds
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,

    /// Also write the run summary as JSON to this file
    #[arg(long)]
    pub summary_file: Option<PathBuf>,

    /// Fetch one object per endpoint and one resource
    #[arg(long, default_value_t = false)]
    pub test_mode: bool,
}

impl BackupArgs {
    /// Resolve the effective configuration: file, then environment, then flags
    pub fn load_config(&self) -> Result<BackupConfig, CliError> {
        let config = match &self.config {
            Some(path) => BackupConfig::from_file(path)?,
            None => BackupConfig::default(),
        };
        let config = self.apply_overrides(config.with_env_overrides());
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&self, mut config: BackupConfig) -> BackupConfig {
        if self.test_mode {
            config.run.objects_per_endpoint = Some(1);
            config.run.resources_limit = Some(1);
            config.output.root = PathBuf::from(TEST_MODE_OUTPUT_DIR);
        }
        if let Some(dir) = &self.output_dir {
            config.output.root = dir.clone();
        }
        if !self.sinks.is_empty() {
            config.output.sinks = self.sinks.clone();
        }
        if let Some(deadline) = self.deadline {
            config.run.deadline_secs = Some(deadline);
        }
        config
    }

    /// Run the backup and report its summary
    pub async fn execute(
        &self,
        format: OutputFormat,
        shutdown: SharedShutdown,
    ) -> Result<RunSummary, CliError> {
        if let Some(addr) = self.metrics_addr {
            crate::metrics::init_metrics(addr).await?;
        }

        let config = self.load_config()?;
        let toggles = EndpointToggles::load(&self.endpoints_file)?;
        let mut endpoints = EndpointCatalog::builtin().enabled(&toggles)?;
        if !self.only.is_empty() {
            endpoints = endpoints.only(&self.only)?;
        }
        if endpoints.is_empty() {
            return Err(CliError::InvalidArgument("no endpoints enabled".to_string()));
        }

        info!(
            mode = if self.test_mode { "test" } else { "full" },
            output = %config.output.root.display(),
            endpoints = endpoints.len(),
            "Starting backup"
        );

        let executor = BackupExecutor::from_config(&config, shutdown)?;
        let summary = executor.run(&endpoints).await;

        report(&summary, format)?;
        if let Some(path) = &self.summary_file {
            write_summary(&summary, path)?;
        }
        Ok(summary)
    }
}

fn report(summary: &RunSummary, format: OutputFormat) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let json = summary
                .to_json_pretty()
                .map_err(|e| CliError::Io(format!("Failed to serialize summary: {e}")))?;
            println!("{json}");
        }
        OutputFormat::Human => print!("{}", summary.render_human()),
    }
    Ok(())
}

fn write_summary(summary: &RunSummary, path: &Path) -> Result<(), CliError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| CliError::Io(format!("Failed to create {}: {e}", parent.display())))?;
    }
    summary
        .write_json(path)
        .map_err(|e| CliError::Io(format!("Failed to write {}: {e}", path.display())))?;
    info!(path = %path.display(), "Summary written");
    Ok(())
}
