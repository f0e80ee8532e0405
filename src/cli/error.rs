//! CLI error types and conversions

use crate::backup::BackupError;
use crate::config::ConfigError;
use crate::metrics::MetricsError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Executor setup error
    #[error("backup error: {0}")]
    Backup(#[from] BackupError),

    /// Metrics exporter error
    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Writing a report failed
    #[error("IO error: {0}")]
    Io(String),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
