//! Sink contract
//!
//! The executor hands every completed endpoint or resource batch to each
//! active [`Sink`] exactly once. Sinks decide how to persist it; the core
//! never branches on the concrete sink type.

use crate::config::{OutputConfig, SinkKind, TenantConfig};
use crate::{EndpointKind, Record, ResourceId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub mod csv;
pub mod json;
pub mod log;
pub mod memory;
pub mod path;

pub use self::csv::CsvSink;
pub use self::json::JsonSink;
pub use self::log::LogSink;
pub use self::memory::MemorySink;
pub use self::path::BackupLayout;

/// Sink errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SinkError {
    /// Filesystem failure
    #[error("IO error at {path}: {message}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        message: String,
    },

    /// Records could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Destination refused the batch
    #[error("sink rejected batch for {target}: {message}")]
    Rejected {
        /// Target description
        target: String,
        /// Reason
        message: String,
    },
}

impl SinkError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: impl fmt::Display) -> Self {
        SinkError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Logical destination of one batch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SinkTarget {
    /// Endpoint name
    pub endpoint: String,
    /// Global or resource endpoint
    pub kind: EndpointKind,
    /// Resource the batch belongs to
    pub resource_id: Option<ResourceId>,
}

impl SinkTarget {
    /// Target for a global endpoint batch
    pub fn global(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            kind: EndpointKind::Global,
            resource_id: None,
        }
    }

    /// Target for one resource's endpoint batch
    pub fn resource(endpoint: impl Into<String>, resource_id: ResourceId) -> Self {
        Self {
            endpoint: endpoint.into(),
            kind: EndpointKind::Resource,
            resource_id: Some(resource_id),
        }
    }
}

impl fmt::Display for SinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource_id {
            Some(rid) => write!(f, "{}@{}", self.endpoint, rid),
            None => f.write_str(&self.endpoint),
        }
    }
}

/// Outcome of one successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    /// Records persisted
    pub records_written: usize,
    /// Where they went, for file sinks
    pub location: Option<PathBuf>,
}

/// Destination for normalized records
///
/// Called once per completed batch. Each call replaces whatever the sink
/// previously stored for the same target.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name used in logs and metrics
    fn name(&self) -> &str;

    /// Persist one batch
    async fn write(&self, records: &[Record], target: &SinkTarget) -> SinkResult<WriteReport>;

    /// Called once after the last batch of a run
    async fn finish(&self) -> SinkResult<()> {
        Ok(())
    }
}

/// Build the sinks selected by configuration
///
/// File sinks share one run directory under `output.root`.
pub fn create_sinks(
    output: &OutputConfig,
    tenant: &TenantConfig,
    started_at: DateTime<Utc>,
) -> Vec<Arc<dyn Sink>> {
    let layout = BackupLayout::new(&output.root, tenant, started_at);
    output
        .sinks
        .iter()
        .map(|kind| -> Arc<dyn Sink> {
            match kind {
                SinkKind::Json => Arc::new(JsonSink::new(layout.clone())),
                SinkKind::Csv => Arc::new(CsvSink::new(layout.clone())),
                SinkKind::Log => Arc::new(LogSink::new()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_display() {
        assert_eq!(SinkTarget::global("campaigns").to_string(), "campaigns");
        let target = SinkTarget::resource("grants", ResourceId::new("0oa1").unwrap());
        assert_eq!(target.to_string(), "grants@0oa1");
        assert_eq!(target.kind, EndpointKind::Resource);
    }

    #[test]
    fn test_create_sinks_follows_config() {
        let output = OutputConfig {
            root: PathBuf::from("out"),
            sinks: vec![SinkKind::Json, SinkKind::Csv, SinkKind::Log],
        };
        let sinks = create_sinks(&output, &TenantConfig::default(), Utc::now());
        let names: Vec<_> = sinks.iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["json", "csv", "log"]);
    }
}
