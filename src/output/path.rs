//! Backup directory layout
//!
//! File sinks write under one run directory:
//!
//! ```text
//! {root}/{environment}/tenant_{tenant_id}_customer_{customer_id}/backup_{YYYYmmdd_HHMMSS}/
//!     campaigns.json
//!     resources/{resource_id}/grants.json
//! ```
//!
//! Path components coming from API data are sanitized so a resource ID can
//! never escape the run directory.

use super::SinkTarget;
use crate::config::TenantConfig;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Directory holding per-resource subdirectories
pub const RESOURCES_DIR: &str = "resources";

/// Resolves file locations for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupLayout {
    run_dir: PathBuf,
}

impl BackupLayout {
    /// Layout for a run started at `started_at`
    pub fn new(root: &Path, tenant: &TenantConfig, started_at: DateTime<Utc>) -> Self {
        let run_dir = root
            .join(sanitize_component(&tenant.environment))
            .join(format!(
                "tenant_{}_customer_{}",
                tenant.tenant_id,
                sanitize_component(&tenant.customer_id)
            ))
            .join(format!("backup_{}", started_at.format("%Y%m%d_%H%M%S")));
        Self { run_dir }
    }

    /// Layout rooted directly at `run_dir`
    pub fn at(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    /// Run directory
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// File for `target` with the given extension
    pub fn target_path(&self, target: &SinkTarget, extension: &str) -> PathBuf {
        let file = format!("{}.{extension}", sanitize_component(&target.endpoint));
        match &target.resource_id {
            Some(rid) => self
                .run_dir
                .join(RESOURCES_DIR)
                .join(sanitize_component(rid.as_str()))
                .join(file),
            None => self.run_dir.join(file),
        }
    }
}

/// Replace anything outside `[A-Za-z0-9._-]` with `_`; never returns `.` or `..`
pub fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => cleaned.replace('.', "_") + "_",
        _ => cleaned,
    }
}
