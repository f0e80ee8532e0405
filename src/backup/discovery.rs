//! Resource discovery
//!
//! Phase-one records are scanned with [`ResourceIdRule`]s to build the set of
//! resource IDs that drive phase two. The set is frozen before any phase-two
//! fetch starts; IDs that turn up afterwards, or that fall beyond the
//! configured resource cap, are reported as skipped rather than dropped.

use crate::{Record, ResourceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use tracing::{debug, info};

/// Where to find resource IDs in one phase-one endpoint's payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIdRule {
    /// Endpoint whose records are scanned
    pub source_endpoint: String,
    /// Dotted path; a `[]` suffix on a segment walks every array element
    pub path: String,
}

impl ResourceIdRule {
    /// Create a rule
    pub fn new(source_endpoint: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            source_endpoint: source_endpoint.into(),
            path: path.into(),
        }
    }

    /// Campaign target resources and review resources
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("campaigns", "resourceSettings.targetResources[].resourceId"),
            Self::new("reviews", "resourceId"),
        ]
    }

    /// Every non-blank ID the path yields in `payload`, in document order
    pub fn extract(&self, payload: &Value) -> Vec<ResourceId> {
        let mut current = vec![payload];
        for segment in self.path.split('.') {
            let (field, spread) = match segment.strip_suffix("[]") {
                Some(field) => (field, true),
                None => (segment, false),
            };
            let mut next = Vec::new();
            for value in current {
                let Some(child) = value.get(field) else { continue };
                match (spread, child) {
                    (true, Value::Array(items)) => next.extend(items.iter()),
                    (true, _) => {}
                    (false, child) => next.push(child),
                }
            }
            current = next;
        }

        current
            .into_iter()
            .filter_map(|value| match value {
                Value::String(s) => ResourceId::new(s.as_str()),
                Value::Number(n) => ResourceId::new(n.to_string()),
                _ => None,
            })
            .collect()
    }
}

/// The same resource ID surfaced by a second endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateResource {
    /// The resource ID
    pub resource_id: ResourceId,
    /// Endpoint that discovered it first (kept)
    pub first_endpoint: String,
    /// Endpoint that reported it again
    pub duplicate_endpoint: String,
}

/// Why a discovered resource ID was not fanned out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Seen only after the ID set was frozen
    DiscoveredAfterFreeze,
    /// Beyond the configured resource cap
    OverLimit,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::DiscoveredAfterFreeze => f.write_str("discovered after freeze"),
            SkipReason::OverLimit => f.write_str("over resource limit"),
        }
    }
}

/// A resource ID excluded from phase two
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedResource {
    /// The resource ID
    pub resource_id: ResourceId,
    /// Endpoint it came from
    pub source_endpoint: String,
    /// Why it was skipped
    pub reason: SkipReason,
}

/// Growing set of resource IDs, first discovery wins
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    order: Vec<ResourceId>,
    origin: HashMap<ResourceId, String>,
    duplicates: Vec<DuplicateResource>,
    reported: HashSet<(ResourceId, String)>,
    limit: Option<usize>,
}

impl ResourceRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap on the IDs fanned out in phase two
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Record an ID seen in `endpoint`'s payloads
    pub fn observe(&mut self, endpoint: &str, resource_id: ResourceId) {
        match self.origin.get(&resource_id) {
            None => {
                debug!(endpoint, resource_id = %resource_id, "Discovered resource");
                self.origin.insert(resource_id.clone(), endpoint.to_string());
                self.order.push(resource_id);
            }
            Some(first) if first != endpoint => {
                let key = (resource_id.clone(), endpoint.to_string());
                if self.reported.insert(key) {
                    self.duplicates.push(DuplicateResource {
                        resource_id,
                        first_endpoint: first.clone(),
                        duplicate_endpoint: endpoint.to_string(),
                    });
                }
            }
            Some(_) => {}
        }
    }

    /// Apply every rule sourcing from `endpoint` to its records
    pub fn observe_records(&mut self, rules: &[ResourceIdRule], endpoint: &str, records: &[Record]) {
        for rule in rules.iter().filter(|r| r.source_endpoint == endpoint) {
            for record in records {
                for id in rule.extract(&record.payload) {
                    self.observe(endpoint, id);
                }
            }
        }
    }

    /// IDs discovered so far, in discovery order
    pub fn discovered(&self) -> &[ResourceId] {
        &self.order
    }

    /// Freeze the set for phase two
    pub fn freeze(self, rules: Vec<ResourceIdRule>) -> FrozenResources {
        let mut ids = self.order;
        let mut skipped = Vec::new();
        if let Some(limit) = self.limit {
            if ids.len() > limit {
                for resource_id in ids.split_off(limit) {
                    let source_endpoint = self.origin.get(&resource_id).cloned().unwrap_or_default();
                    skipped.push(SkippedResource {
                        resource_id,
                        source_endpoint,
                        reason: SkipReason::OverLimit,
                    });
                }
            }
        }

        info!(
            resources = ids.len(),
            duplicates = self.duplicates.len(),
            over_limit = skipped.len(),
            "Resource set frozen"
        );

        let known = self.origin.into_keys().collect();
        FrozenResources {
            ids,
            duplicates: self.duplicates,
            rules,
            known,
            skipped: Mutex::new(skipped),
        }
    }
}

/// Scan phase-one results in rule order
pub fn discover_resource_ids(
    phase1: &BTreeMap<String, Vec<Record>>,
    rules: &[ResourceIdRule],
) -> ResourceRegistry {
    let mut registry = ResourceRegistry::new();
    let mut seen_sources = HashSet::new();
    for rule in rules {
        if !seen_sources.insert(rule.source_endpoint.as_str()) {
            continue;
        }
        if let Some(records) = phase1.get(&rule.source_endpoint) {
            registry.observe_records(rules, &rule.source_endpoint, records);
        }
    }
    registry
}

/// The fixed phase-two resource set
#[derive(Debug)]
pub struct FrozenResources {
    ids: Vec<ResourceId>,
    duplicates: Vec<DuplicateResource>,
    rules: Vec<ResourceIdRule>,
    known: HashSet<ResourceId>,
    skipped: Mutex<Vec<SkippedResource>>,
}

impl FrozenResources {
    /// Frozen set built directly from IDs
    pub fn from_ids(ids: impl IntoIterator<Item = ResourceId>) -> Self {
        let mut registry = ResourceRegistry::new();
        for id in ids {
            registry.observe("", id);
        }
        registry.freeze(Vec::new())
    }

    /// IDs to fan out, in discovery order
    pub fn ids(&self) -> &[ResourceId] {
        &self.ids
    }

    /// Number of IDs to fan out
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether there is nothing to fan out
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Cross-endpoint duplicates seen before the freeze
    pub fn duplicates(&self) -> &[DuplicateResource] {
        &self.duplicates
    }

    /// Report IDs surfacing in phase-two records; unknown ones become skipped
    pub fn report_late(&self, endpoint: &str, records: &[Record]) -> usize {
        let mut late = Vec::new();
        for rule in self.rules.iter().filter(|r| r.source_endpoint == endpoint) {
            for record in records {
                late.extend(
                    rule.extract(&record.payload)
                        .into_iter()
                        .filter(|id| !self.known.contains(id)),
                );
            }
        }
        if late.is_empty() {
            return 0;
        }

        let mut skipped = self.skipped.lock().unwrap_or_else(|p| p.into_inner());
        let mut added = 0;
        for resource_id in late {
            let already = skipped.iter().any(|s| {
                s.resource_id == resource_id && s.reason == SkipReason::DiscoveredAfterFreeze
            });
            if !already {
                info!(endpoint, resource_id = %resource_id, "Resource discovered after freeze - skipped");
                skipped.push(SkippedResource {
                    resource_id,
                    source_endpoint: endpoint.to_string(),
                    reason: SkipReason::DiscoveredAfterFreeze,
                });
                added += 1;
            }
        }
        added
    }

    /// Skipped IDs: over the cap, plus any reported late
    pub fn skipped(&self) -> Vec<SkippedResource> {
        self.skipped.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}
