//! CLI command for listing the endpoint catalog

use super::{CliError, OutputFormat};
use crate::config::{EndpointCatalog, EndpointSpec, EndpointToggles};
use clap::Args;
use serde_json::{json, Value};
use std::path::PathBuf;

/// Endpoints subcommand
#[derive(Debug, Args)]
pub struct EndpointsCommand {
    /// Endpoint enablement file; when missing every endpoint is enabled
    #[arg(long, default_value = "configs/endpoints.json")]
    pub endpoints_file: PathBuf,

    /// Hide disabled endpoints
    #[arg(long, default_value_t = false)]
    pub enabled_only: bool,
}

impl EndpointsCommand {
    /// Execute the endpoints command
    pub fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        let catalog = EndpointCatalog::builtin();
        let toggles = EndpointToggles::load(&self.endpoints_file)?;
        // Rejects toggles naming endpoints the catalog does not know.
        catalog.enabled(&toggles)?;

        let rows: Vec<Value> = catalog
            .global
            .iter()
            .chain(catalog.resource.iter())
            .map(|spec| describe(spec, spec.enabled && toggles.is_enabled(spec.kind, &spec.name)))
            .filter(|row| !self.enabled_only || row["enabled"] == Value::Bool(true))
            .collect();

        match format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&rows)
                    .map_err(|e| CliError::Io(format!("Failed to serialize endpoints: {e}")))?;
                println!("{json}");
            }
            OutputFormat::Human => {
                println!("{} endpoints:\n", rows.len());
                for row in &rows {
                    println!(
                        "{:<9} {:<28} {:<8} {}",
                        row["kind"].as_str().unwrap_or_default(),
                        row["name"].as_str().unwrap_or_default(),
                        if row["enabled"] == Value::Bool(true) { "enabled" } else { "disabled" },
                        row["path"].as_str().unwrap_or_default(),
                    );
                }
            }
        }
        Ok(())
    }
}

fn describe(spec: &EndpointSpec, enabled: bool) -> Value {
    json!({
        "name": spec.name,
        "kind": spec.kind.to_string(),
        "path": spec.path,
        "paginated": spec.pagination.is_paginated(),
        "detail": spec.detail_template(),
        "enabled": enabled,
    })
}
