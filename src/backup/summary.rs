//! Run summary
//!
//! Fetch tasks report into a [`SummaryCollector`] as they finish; the
//! executor turns the collected [`SummaryFragment`] into the final
//! [`RunSummary`] handed back to the caller.

use super::discovery::{DuplicateResource, SkippedResource};
use crate::shutdown::ShutdownReason;
use crate::{EndpointKind, ResourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

/// Failure categories reported in the summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Credentials rejected after a refresh
    Auth,
    /// Rate budget wait would pass the deadline
    RateTimeout,
    /// Retries exhausted on network errors, 5xx or 429
    TransientFetch,
    /// Non-retryable 4xx
    PermanentFetch,
    /// Payload lacked the declared ID or name fields
    MalformedRecord,
    /// Sink rejected a batch
    Sink,
    /// Pagination stopped early (page cap or repeated cursor)
    PageLimit,
    /// Work abandoned because the run was cancelled
    Cancelled,
    /// Resource endpoint issued without a resource ID
    MissingResourceId,
    /// Response body could not be interpreted
    InvalidResponse,
}

impl FailureKind {
    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Auth => "auth",
            FailureKind::RateTimeout => "rate_timeout",
            FailureKind::TransientFetch => "transient_fetch",
            FailureKind::PermanentFetch => "permanent_fetch",
            FailureKind::MalformedRecord => "malformed_record",
            FailureKind::Sink => "sink",
            FailureKind::PageLimit => "page_limit",
            FailureKind::Cancelled => "cancelled",
            FailureKind::MissingResourceId => "missing_resource_id",
            FailureKind::InvalidResponse => "invalid_response",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failure, with enough context to re-run the failed slice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Endpoint name
    pub endpoint: String,
    /// Resource ID for resource endpoints
    pub resource_id: Option<ResourceId>,
    /// Item ID for detail calls or malformed records
    pub item_id: Option<String>,
    /// Failure category
    pub kind: FailureKind,
    /// Error message
    pub message: String,
    /// Retries spent before giving up
    pub retries: u32,
}

impl FailureRecord {
    /// Create a failure for an endpoint
    pub fn new(endpoint: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            resource_id: None,
            item_id: None,
            kind,
            message: message.into(),
            retries: 0,
        }
    }

    /// Attach a resource ID
    pub fn with_resource(mut self, resource_id: Option<&ResourceId>) -> Self {
        self.resource_id = resource_id.cloned();
        self
    }

    /// Attach an item ID
    pub fn with_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    /// Attach a retry count
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// Counters for one endpoint batch (one endpoint, or one endpoint × resource)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Endpoint name
    pub endpoint: String,
    /// Global or resource
    pub kind: EndpointKind,
    /// Resource ID for resource endpoints
    pub resource_id: Option<ResourceId>,
    /// Records handed to sinks
    pub records: usize,
    /// List pages fetched
    pub pages: usize,
    /// Detail calls issued
    pub detail_calls: usize,
    /// HTTP attempts issued, retries included
    pub requests: u64,
    /// Retries spent
    pub retries: u64,
}

impl BatchStats {
    /// Empty stats for an endpoint batch
    pub fn new(endpoint: impl Into<String>, kind: EndpointKind, resource_id: Option<&ResourceId>) -> Self {
        Self {
            endpoint: endpoint.into(),
            kind,
            resource_id: resource_id.cloned(),
            records: 0,
            pages: 0,
            detail_calls: 0,
            requests: 0,
            retries: 0,
        }
    }
}

/// Partial summary produced by one phase or one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryFragment {
    /// Completed batches
    pub batches: Vec<BatchStats>,
    /// Recorded failures
    pub failures: Vec<FailureRecord>,
}

impl SummaryFragment {
    /// Fold `other` into `self`
    pub fn merge(&mut self, other: SummaryFragment) {
        self.batches.extend(other.batches);
        self.failures.extend(other.failures);
    }

    /// Records across all batches
    pub fn total_records(&self) -> usize {
        self.batches.iter().map(|b| b.records).sum()
    }
}

/// Lock-protected accumulation point shared by concurrent tasks
#[derive(Debug, Default)]
pub struct SummaryCollector {
    inner: Mutex<SummaryFragment>,
}

impl SummaryCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished batch
    pub fn record_batch(&self, stats: BatchStats) {
        self.with_inner(|inner| inner.batches.push(stats));
    }

    /// Record a failure
    pub fn record_failure(&self, failure: FailureRecord) {
        crate::metrics::record_failure(&failure.endpoint, failure.kind.as_str());
        warn!(
            endpoint = %failure.endpoint,
            resource_id = failure.resource_id.as_ref().map(|r| r.as_str()).unwrap_or("-"),
            item_id = failure.item_id.as_deref().unwrap_or("-"),
            kind = %failure.kind,
            retries = failure.retries,
            "{}",
            failure.message
        );
        self.with_inner(|inner| inner.failures.push(failure));
    }

    /// Merge a whole fragment
    pub fn merge(&self, fragment: SummaryFragment) {
        for failure in &fragment.failures {
            crate::metrics::record_failure(&failure.endpoint, failure.kind.as_str());
        }
        self.with_inner(|inner| inner.merge(fragment));
    }

    /// Take everything collected so far
    pub fn take(&self) -> SummaryFragment {
        self.with_inner(std::mem::take)
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut SummaryFragment) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }
}

/// Final status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every batch succeeded
    Completed,
    /// The run finished but some slices failed
    CompletedWithFailures,
    /// The run stopped early
    Aborted {
        /// Why it stopped
        reason: ShutdownReason,
    },
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => f.write_str("completed"),
            RunOutcome::CompletedWithFailures => f.write_str("completed with failures"),
            RunOutcome::Aborted { reason } => write!(f, "aborted ({reason})"),
        }
    }
}

/// Aggregate report returned at the end of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run start (wall clock)
    pub started_at: DateTime<Utc>,
    /// Run end (wall clock)
    pub finished_at: DateTime<Utc>,
    /// Elapsed time in milliseconds
    pub elapsed_ms: u64,
    /// Final status
    pub outcome: RunOutcome,
    /// Per-batch counters
    pub batches: Vec<BatchStats>,
    /// Records per endpoint name, summed over resources
    pub records_per_endpoint: BTreeMap<String, usize>,
    /// Every failure recorded during the run
    pub failures: Vec<FailureRecord>,
    /// Distinct resource IDs used in phase two
    pub resources_processed: usize,
    /// Resource IDs seen from more than one endpoint
    pub duplicate_resources: Vec<DuplicateResource>,
    /// Resource IDs not fanned out
    pub skipped_resources: Vec<SkippedResource>,
    /// Records across all batches
    pub total_records: usize,
    /// HTTP attempts sent to the API, failed fetches and retries included
    pub total_requests: u64,
    /// Retries spent
    pub total_retries: u64,
    /// Throttling responses reported to the rate governor
    pub throttle_events: u64,
}

/// Inputs gathered by the executor to build a [`RunSummary`]
#[derive(Debug, Default)]
pub struct SummaryInputs {
    /// Collected batches and failures
    pub fragment: SummaryFragment,
    /// Distinct resource IDs used in phase two
    pub resources_processed: usize,
    /// Duplicate resource reports
    pub duplicate_resources: Vec<DuplicateResource>,
    /// Skipped resource reports
    pub skipped_resources: Vec<SkippedResource>,
    /// HTTP attempts sent during the run
    pub total_requests: u64,
    /// Throttling responses
    pub throttle_events: u64,
    /// Abort reason, if the run stopped early
    pub aborted: Option<ShutdownReason>,
}

impl RunSummary {
    /// Build the final summary
    pub fn finalize(started_at: DateTime<Utc>, elapsed: Duration, inputs: SummaryInputs) -> Self {
        let SummaryInputs {
            fragment,
            resources_processed,
            duplicate_resources,
            skipped_resources,
            total_requests,
            throttle_events,
            aborted,
        } = inputs;

        let outcome = match aborted {
            Some(reason) => RunOutcome::Aborted { reason },
            None if fragment.failures.is_empty() => RunOutcome::Completed,
            None => RunOutcome::CompletedWithFailures,
        };

        let mut records_per_endpoint = BTreeMap::new();
        for batch in &fragment.batches {
            *records_per_endpoint.entry(batch.endpoint.clone()).or_insert(0) += batch.records;
        }

        Self {
            started_at,
            finished_at: Utc::now(),
            elapsed_ms: elapsed.as_millis() as u64,
            outcome,
            total_records: fragment.total_records(),
            total_requests,
            total_retries: fragment.batches.iter().map(|b| b.retries).sum::<u64>()
                + fragment.failures.iter().map(|f| u64::from(f.retries)).sum::<u64>(),
            batches: fragment.batches,
            records_per_endpoint,
            failures: fragment.failures,
            resources_processed,
            duplicate_resources,
            skipped_resources,
            throttle_events,
        }
    }

    /// Whether the run completed without failures
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    /// Records collected for `endpoint`
    pub fn records_for(&self, endpoint: &str) -> usize {
        self.records_per_endpoint.get(endpoint).copied().unwrap_or(0)
    }

    /// Failures recorded for `endpoint`
    pub fn failures_for<'a>(&'a self, endpoint: &'a str) -> impl Iterator<Item = &'a FailureRecord> + 'a {
        self.failures.iter().filter(move |f| f.endpoint == endpoint)
    }

    /// Pretty JSON rendering
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write the JSON rendering to `path`
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = self.to_json_pretty().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Multi-line human-readable report
    pub fn render_human(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Backup {}", self.outcome);
        let _ = writeln!(
            out,
            "  elapsed: {:.1}s  records: {}  requests: {}  retries: {}  throttled: {}",
            self.elapsed_ms as f64 / 1000.0,
            self.total_records,
            self.total_requests,
            self.total_retries,
            self.throttle_events
        );

        if !self.records_per_endpoint.is_empty() {
            let _ = writeln!(out, "  endpoints:");
            for (endpoint, count) in &self.records_per_endpoint {
                let _ = writeln!(out, "    {endpoint:<28} {count:>8}");
            }
        }

        let _ = writeln!(out, "  resources processed: {}", self.resources_processed);
        if !self.duplicate_resources.is_empty() {
            let _ = writeln!(
                out,
                "  duplicate resource IDs: {} (first discovery kept)",
                self.duplicate_resources.len()
            );
        }
        if !self.skipped_resources.is_empty() {
            let _ = writeln!(out, "  skipped resource IDs: {}", self.skipped_resources.len());
            for skipped in &self.skipped_resources {
                let _ = writeln!(
                    out,
                    "    {} from {} ({})",
                    skipped.resource_id, skipped.source_endpoint, skipped.reason
                );
            }
        }

        if !self.failures.is_empty() {
            let _ = writeln!(out, "  failures: {}", self.failures.len());
            for failure in &self.failures {
                let scope = match (&failure.resource_id, &failure.item_id) {
                    (Some(r), Some(i)) => format!("{} [{r}] #{i}", failure.endpoint),
                    (Some(r), None) => format!("{} [{r}]", failure.endpoint),
                    (None, Some(i)) => format!("{} #{i}", failure.endpoint),
                    (None, None) => failure.endpoint.clone(),
                };
                let _ = writeln!(
                    out,
                    "    {scope}: {} after {} retries - {}",
                    failure.kind, failure.retries, failure.message
                );
            }
        }
        out
    }
}
