//! Endpoint definitions
//!
//! An [`EndpointSpec`] describes one collection of the governance API: where
//! to list it, how it paginates, whether items are enriched with a detail
//! call, and how a raw item maps onto a [`crate::Record`]. Specs are loaded
//! once and frozen into [`EnabledEndpoints`] before a run starts.

use super::ConfigError;
use crate::EndpointKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Placeholder substituted with a discovered resource ID
pub const RESOURCE_ID_PLACEHOLDER: &str = "{resourceId}";
/// Placeholder substituted with a list item's ID in detail templates
pub const ITEM_ID_PLACEHOLDER: &str = "{id}";

/// How an endpoint exposes its continuation cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum PaginationStyle {
    /// Single response, no cursor
    None,
    /// `Link: <...?after=X>; rel="next"` header
    LinkHeader,
    /// Cursor carried in a top-level body field
    BodyCursor {
        /// Field holding the next cursor
        field: String,
    },
}

impl PaginationStyle {
    /// Whether the endpoint paginates at all
    pub fn is_paginated(&self) -> bool {
        !matches!(self, PaginationStyle::None)
    }
}

/// How a record's display name is derived from its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum DisplayNameRule {
    /// First present, non-empty field among `paths`
    First {
        /// Dotted paths tried in order
        paths: Vec<String>,
    },
    /// All `paths` joined with `separator`
    Join {
        /// Dotted paths, every one required
        paths: Vec<String>,
        /// Separator between parts
        separator: String,
    },
    /// Reuse the external ID
    ExternalId,
}

impl DisplayNameRule {
    fn first(paths: &[&str]) -> Self {
        DisplayNameRule::First {
            paths: paths.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Field extraction for the normalizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFields {
    /// Dotted path of the external ID; `None` marks a singleton keyed by its
    /// parent resource (or by the endpoint name for global singletons)
    #[serde(default = "default_id_path")]
    pub id_path: Option<String>,

    /// Display name derivation
    #[serde(default = "default_display_name")]
    pub display_name: DisplayNameRule,

    /// Dotted path of the creation timestamp
    #[serde(default = "default_created_path")]
    pub created_path: Option<String>,

    /// Dotted path of the last-update timestamp
    #[serde(default = "default_updated_path")]
    pub updated_path: Option<String>,
}

impl Default for RecordFields {
    fn default() -> Self {
        Self {
            id_path: default_id_path(),
            display_name: default_display_name(),
            created_path: default_created_path(),
            updated_path: default_updated_path(),
        }
    }
}

impl RecordFields {
    fn named(display_name: DisplayNameRule) -> Self {
        Self {
            display_name,
            ..Self::default()
        }
    }
}

fn default_id_path() -> Option<String> {
    Some("id".to_string())
}

fn default_display_name() -> DisplayNameRule {
    DisplayNameRule::first(&["name"])
}

fn default_created_path() -> Option<String> {
    Some("created".to_string())
}

fn default_updated_path() -> Option<String> {
    Some("lastUpdated".to_string())
}

/// One global or resource endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// Stable endpoint name, also the record object type
    pub name: String,

    /// Global or resource-scoped
    pub kind: EndpointKind,

    /// List path; resource endpoints may carry `{resourceId}`
    pub path: String,

    /// `filter` query template; resource endpoints may carry `{resourceId}`
    #[serde(default)]
    pub filter: Option<String>,

    /// Pagination style
    #[serde(default = "default_pagination")]
    pub pagination: PaginationStyle,

    /// Detail path template carrying `{id}`
    #[serde(default)]
    pub detail: Option<String>,

    /// Skip detail calls even when a template exists
    #[serde(default)]
    pub list_only: bool,

    /// Whether the endpoint takes part in the run
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Normalizer field mapping
    #[serde(default)]
    pub fields: RecordFields,
}

fn default_pagination() -> PaginationStyle {
    PaginationStyle::LinkHeader
}

fn default_enabled() -> bool {
    true
}

impl EndpointSpec {
    /// Paginated global endpoint with a detail template
    pub fn global(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: EndpointKind::Global,
            path: path.to_string(),
            filter: None,
            pagination: PaginationStyle::LinkHeader,
            detail: None,
            list_only: false,
            enabled: true,
            fields: RecordFields::default(),
        }
    }

    /// Resource endpoint with `{resourceId}` in its path
    pub fn resource_path(name: &str, path: &str) -> Self {
        Self {
            kind: EndpointKind::Resource,
            ..Self::global(name, path)
        }
    }

    /// Resource endpoint with `{resourceId}` in its `filter` query
    pub fn resource_filter(name: &str, path: &str, filter: &str) -> Self {
        Self {
            kind: EndpointKind::Resource,
            filter: Some(filter.to_string()),
            ..Self::global(name, path)
        }
    }

    /// Set the detail template
    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }

    /// Set the pagination style
    pub fn with_pagination(mut self, pagination: PaginationStyle) -> Self {
        self.pagination = pagination;
        self
    }

    /// Mark as list-only
    pub fn list_only(mut self) -> Self {
        self.list_only = true;
        self
    }

    /// Set the normalizer field mapping
    pub fn with_fields(mut self, fields: RecordFields) -> Self {
        self.fields = fields;
        self
    }

    /// Whether a resource ID must be supplied before fetching
    pub fn requires_resource_id(&self) -> bool {
        self.kind == EndpointKind::Resource
    }

    /// Detail template to use, honoring `list_only`
    pub fn detail_template(&self) -> Option<&str> {
        if self.list_only {
            None
        } else {
            self.detail.as_deref()
        }
    }

    /// Check that placeholders match the endpoint kind
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint name cannot be empty".to_string()));
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "endpoint {}: path must start with '/': {}",
                self.name, self.path
            )));
        }

        let in_path = self.path.contains(RESOURCE_ID_PLACEHOLDER);
        let in_filter = self
            .filter
            .as_deref()
            .is_some_and(|f| f.contains(RESOURCE_ID_PLACEHOLDER));

        match self.kind {
            EndpointKind::Resource if !in_path && !in_filter => {
                return Err(ConfigError::Invalid(format!(
                    "resource endpoint {} has no {RESOURCE_ID_PLACEHOLDER} in its path or filter",
                    self.name
                )));
            }
            EndpointKind::Global if in_path || in_filter => {
                return Err(ConfigError::Invalid(format!(
                    "global endpoint {} must not reference {RESOURCE_ID_PLACEHOLDER}",
                    self.name
                )));
            }
            _ => {}
        }

        if let Some(detail) = &self.detail {
            if !detail.contains(ITEM_ID_PLACEHOLDER) {
                return Err(ConfigError::Invalid(format!(
                    "endpoint {}: detail template lacks {ITEM_ID_PLACEHOLDER}: {detail}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// All known endpoints, global and resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointCatalog {
    /// Phase-one endpoints
    pub global: Vec<EndpointSpec>,
    /// Phase-two endpoints
    pub resource: Vec<EndpointSpec>,
}

impl EndpointCatalog {
    /// The governance API endpoints backed up by default
    pub fn builtin() -> Self {
        let named_or_title = || RecordFields::named(DisplayNameRule::first(&["name", "title"]));
        let display_name = || RecordFields::named(DisplayNameRule::first(&["displayName"]));
        let v1 = |p: &str| format!("/governance/api/v1/{p}");
        let v2 = |p: &str| format!("/governance/api/v2/{p}");
        let app_filter = |target: &str| {
            format!("{target}.externalId eq \"{RESOURCE_ID_PLACEHOLDER}\" AND {target}.type eq \"APPLICATION\"")
        };

        let global = vec![
            EndpointSpec::global("campaigns", &v1("campaigns"))
                .with_detail(&v1("campaigns/{id}"))
                .with_fields(named_or_title()),
            EndpointSpec::global("reviews", &v1("reviews"))
                .with_detail(&v1("reviews/{id}"))
                .with_fields(named_or_title()),
            EndpointSpec::global("request_types", &v1("request-types"))
                .with_detail(&v1("request-types/{id}")),
            EndpointSpec::global("requests_v1", &v1("requests"))
                .with_detail(&v1("requests/{id}"))
                .with_fields(RecordFields::named(DisplayNameRule::ExternalId)),
            EndpointSpec::global("requests_v2", &v2("requests"))
                .with_detail(&v2("requests/{id}"))
                .with_fields(RecordFields::named(DisplayNameRule::ExternalId)),
            EndpointSpec::global("request_settings_global", &v2("request-settings"))
                .with_pagination(PaginationStyle::None)
                .with_fields(RecordFields {
                    id_path: None,
                    display_name: DisplayNameRule::ExternalId,
                    ..RecordFields::default()
                }),
            EndpointSpec::global("entitlement_bundles", &v1("entitlement-bundles"))
                .with_detail(&v1("entitlement-bundles/{id}")),
            EndpointSpec::global("collections", &v1("collections"))
                .with_detail(&v1("collections/{id}")),
            EndpointSpec::global("risk_rules", &v1("risk-rules"))
                .with_detail(&v1("risk-rules/{id}")),
            EndpointSpec::global("delegates", &v1("delegates"))
                .with_detail(&v1("delegates/{id}"))
                .with_fields(RecordFields::named(DisplayNameRule::ExternalId)),
        ];

        let resource = vec![
            EndpointSpec::resource_filter("grants", &v1("grants"), &app_filter("target"))
                .with_detail(&v1("grants/{id}"))
                .list_only()
                .with_fields(RecordFields::named(DisplayNameRule::Join {
                    paths: vec!["principalName".to_string(), "entitlementName".to_string()],
                    separator: " -> ".to_string(),
                })),
            EndpointSpec::resource_filter("entitlements", &v1("entitlements"), &app_filter("target"))
                .with_detail(&v1("entitlements/{id}"))
                .with_fields(RecordFields::named(DisplayNameRule::first(&["name", "displayName"]))),
            EndpointSpec::resource_path(
                "request_conditions",
                &v2("resources/{resourceId}/request-conditions"),
            )
            .with_detail(&v2("request-conditions/{id}"))
            .with_fields(named_or_title()),
            EndpointSpec::resource_path("request_settings", &v2("resources/{resourceId}/request-settings"))
                .with_pagination(PaginationStyle::None)
                .with_fields(RecordFields {
                    id_path: None,
                    display_name: DisplayNameRule::ExternalId,
                    ..RecordFields::default()
                }),
            EndpointSpec::resource_path(
                "request_sequences",
                &v2("resources/{resourceId}/request-sequences"),
            )
            .with_detail(&v2("request-sequences/{id}"))
            .list_only(),
            EndpointSpec::resource_filter(
                "principal_entitlements",
                &v1("principal-entitlements"),
                &app_filter("resource"),
            )
            .with_fields(display_name()),
            EndpointSpec::resource_filter("principal_access", &v1("principal-access"), &app_filter("resource"))
                .with_fields(display_name()),
        ];

        Self { global, resource }
    }

    /// Look up an endpoint of either kind by name
    pub fn find(&self, name: &str) -> Option<&EndpointSpec> {
        self.global
            .iter()
            .chain(self.resource.iter())
            .find(|spec| spec.name == name)
    }

    /// Validate every spec in the catalog
    pub fn validate(&self) -> Result<(), ConfigError> {
        for spec in &self.global {
            if spec.kind != EndpointKind::Global {
                return Err(ConfigError::Invalid(format!(
                    "endpoint {} listed as global but declared {}",
                    spec.name, spec.kind
                )));
            }
            spec.validate()?;
        }
        for spec in &self.resource {
            if spec.kind != EndpointKind::Resource {
                return Err(ConfigError::Invalid(format!(
                    "endpoint {} listed as resource but declared {}",
                    spec.name, spec.kind
                )));
            }
            spec.validate()?;
        }
        Ok(())
    }

    /// Apply toggles and freeze the enabled subset
    pub fn enabled(&self, toggles: &EndpointToggles) -> Result<EnabledEndpoints, ConfigError> {
        self.validate()?;
        toggles.check_known(self)?;

        let pick = |specs: &[EndpointSpec], kind: EndpointKind| -> Vec<EndpointSpec> {
            specs
                .iter()
                .filter(|spec| spec.enabled && toggles.is_enabled(kind, &spec.name))
                .cloned()
                .collect()
        };

        let enabled = EnabledEndpoints {
            global: pick(&self.global, EndpointKind::Global),
            resource: pick(&self.resource, EndpointKind::Resource),
        };
        info!(
            global = enabled.global.len(),
            resource = enabled.resource.len(),
            "Endpoint set frozen"
        );
        Ok(enabled)
    }
}

/// One entry of the enablement file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointToggle {
    /// Whether the endpoint runs
    #[serde(default)]
    pub enabled: bool,
}

/// Endpoint enablement file contents
///
/// Endpoints not named in a loaded file are disabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointToggles {
    /// Global endpoint toggles by name
    #[serde(default)]
    pub global_endpoints: BTreeMap<String, EndpointToggle>,

    /// Resource endpoint toggles by name
    #[serde(default)]
    pub resource_endpoints: BTreeMap<String, EndpointToggle>,

    #[serde(skip)]
    enable_all: bool,
}

impl EndpointToggles {
    /// Every catalog endpoint enabled
    pub fn all_enabled() -> Self {
        Self {
            enable_all: true,
            ..Self::default()
        }
    }

    /// Load toggles; a missing file enables everything
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Endpoint config file not found - all endpoints enabled");
            return Ok(Self::all_enabled());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let toggles: Self =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        info!(path = %path.display(), "Loaded endpoint configuration");
        Ok(toggles)
    }

    /// Whether `name` of `kind` is enabled
    pub fn is_enabled(&self, kind: EndpointKind, name: &str) -> bool {
        if self.enable_all {
            return true;
        }
        let table = match kind {
            EndpointKind::Global => &self.global_endpoints,
            EndpointKind::Resource => &self.resource_endpoints,
        };
        table.get(name).is_some_and(|t| t.enabled)
    }

    fn check_known(&self, catalog: &EndpointCatalog) -> Result<(), ConfigError> {
        let tables = [
            (EndpointKind::Global, &self.global_endpoints, &catalog.global),
            (EndpointKind::Resource, &self.resource_endpoints, &catalog.resource),
        ];
        for (kind, toggles, specs) in tables {
            if let Some(name) = toggles.keys().find(|n| !specs.iter().any(|s| &s.name == *n)) {
                return Err(ConfigError::UnknownEndpoint {
                    kind: kind.to_string(),
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Frozen, validated set of endpoints for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnabledEndpoints {
    global: Vec<EndpointSpec>,
    resource: Vec<EndpointSpec>,
}

impl EnabledEndpoints {
    /// Build directly from spec lists (validated)
    pub fn new(global: Vec<EndpointSpec>, resource: Vec<EndpointSpec>) -> Result<Self, ConfigError> {
        EndpointCatalog { global, resource }.enabled(&EndpointToggles::all_enabled())
    }

    /// Enabled global endpoints, in configuration order
    pub fn global(&self) -> &[EndpointSpec] {
        &self.global
    }

    /// Enabled resource endpoints, in configuration order
    pub fn resource(&self) -> &[EndpointSpec] {
        &self.resource
    }

    /// Keep only the named endpoints; unknown names are an error
    pub fn only(self, names: &[String]) -> Result<Self, ConfigError> {
        if let Some(unknown) = names
            .iter()
            .find(|n| !self.global.iter().chain(self.resource.iter()).any(|s| &s.name == *n))
        {
            return Err(ConfigError::UnknownEndpoint {
                kind: "enabled".to_string(),
                name: unknown.clone(),
            });
        }
        let keep = |specs: Vec<EndpointSpec>| -> Vec<EndpointSpec> {
            specs.into_iter().filter(|s| names.contains(&s.name)).collect()
        };
        Ok(Self {
            global: keep(self.global),
            resource: keep(self.resource),
        })
    }

    /// Total enabled endpoints
    pub fn len(&self) -> usize {
        self.global.len() + self.resource.len()
    }

    /// Whether nothing is enabled
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
