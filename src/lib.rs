//! # IGA Backup Library
//!
//! Extracts data from a paginated, rate-limited Identity Governance REST API
//! and delivers normalized records to pluggable storage sinks.
//!
//! ## Features
//!
//! - **Two-phase discovery**: global endpoints first, then per-resource endpoints
//!   for every resource ID discovered in phase one
//! - **Rate Governor**: shared token bucket with burst and adaptive throttling
//! - **Retry Policy**: exponential backoff with jitter, `Retry-After` aware
//! - **Bounded concurrency**: independent ceilings for endpoints, API calls,
//!   detail calls and resources
//! - **Partial failure**: one endpoint or resource failing never aborts its siblings
//! - **Pluggable sinks**: JSON files, CSV, log-only, in-memory
//!
//! ## Quick Start
//!
//! ```no_run
//! use iga_backup::backup::BackupExecutor;
//! use iga_backup::config::{BackupConfig, EndpointCatalog, EndpointToggles};
//! use iga_backup::shutdown::ShutdownCoordinator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BackupConfig::from_file("configs/config.json")?.with_env_overrides();
//! config.validate()?;
//!
//! let endpoints = EndpointCatalog::builtin().enabled(&EndpointToggles::all_enabled())?;
//! let executor = BackupExecutor::from_config(&config, ShutdownCoordinator::shared())?;
//! let summary = executor.run(&endpoints).await;
//! println!("{}", summary.render_human());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`config`] - Run configuration and the endpoint catalog
//! - [`fetcher`] - Bounded fetcher: HTTP, authentication, pagination
//! - [`backup`] - Rate governor, retry policy, concurrency ceilings, orchestration
//! - [`normalize`] - Raw payload to [`Record`] mapping
//! - [`output`] - Sink contract and concrete sinks
//! - [`shutdown`] - Run-level cancellation

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Backup orchestration
pub mod backup;

/// CLI command implementations
pub mod cli;

/// Run configuration and endpoint catalog
pub mod config;

/// API fetchers
pub mod fetcher;

/// Observability metrics
pub mod metrics;

/// Record normalization
pub mod normalize;

/// Sink contract and implementations
pub mod output;

/// Run-level cancellation shared across modules
pub mod shutdown;

pub use backup::{BackupExecutor, RunSummary};
pub use config::{BackupConfig, EndpointSpec};
pub use output::Sink;

/// Whether an endpoint is global or scoped to a discovered resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// Collection not scoped to a resource (e.g. campaigns)
    Global,
    /// Collection scoped to a resource ID discovered in phase one (e.g. grants)
    Resource,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Global => write!(f, "global"),
            EndpointKind::Resource => write!(f, "resource"),
        }
    }
}

/// Identifier of a resource discovered from phase-one payloads
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a resource ID, rejecting empty or whitespace-only values
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized unit handed to sinks
///
/// Produced by [`normalize::Normalizer`]; the external ID is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Endpoint name the record came from (e.g. "campaigns")
    pub object_type: String,
    /// Identifier assigned by the source API
    pub external_id: String,
    /// Human-readable name
    pub display_name: String,
    /// Raw payload, untouched
    pub payload: serde_json::Value,
    /// Creation timestamp, when the payload carries one
    pub created_at: Option<DateTime<Utc>>,
    /// Last-update timestamp, when the payload carries one
    pub updated_at: Option<DateTime<Utc>>,
    /// Resource the record belongs to (resource endpoints only)
    pub parent_resource_id: Option<ResourceId>,
}

impl Record {
    /// Validate record integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.object_type.is_empty() {
            return Err("Object type cannot be empty".to_string());
        }
        if self.external_id.trim().is_empty() {
            return Err(format!(
                "External ID cannot be empty (object type {})",
                self.object_type
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record() -> Record {
        Record {
            object_type: "campaigns".to_string(),
            external_id: "camp-1".to_string(),
            display_name: "Quarterly review".to_string(),
            payload: json!({"id": "camp-1"}),
            created_at: None,
            updated_at: None,
            parent_resource_id: None,
        }
    }

    #[test]
    fn test_resource_id_rejects_blank() {
        assert!(ResourceId::new("").is_none());
        assert!(ResourceId::new("   ").is_none());
        assert_eq!(ResourceId::new(" app-1 ").unwrap().as_str(), "app-1");
    }

    #[test]
    fn test_record_validate() {
        let mut record = sample_record();
        assert!(record.validate().is_ok());

        record.external_id = " ".to_string();
        assert!(record.validate().is_err());

        record.external_id = "camp-1".to_string();
        record.object_type = String::new();
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_endpoint_kind_display() {
        assert_eq!(EndpointKind::Global.to_string(), "global");
        assert_eq!(EndpointKind::Resource.to_string(), "resource");
    }

    #[test]
    fn test_resource_id_serializes_transparently() {
        let id = ResourceId::new("0oa123").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"0oa123\"");
    }
}
