//! Backup executor
//!
//! Drives a full run: global phase, resource discovery, resource phase, sink
//! finalization. Every endpoint or resource batch is independent; a failed
//! batch is recorded and its siblings carry on.

use super::discovery::{discover_resource_ids, FrozenResources, ResourceIdRule};
use super::limits::{acquire_or_cancel, ConcurrencyLimits};
use super::rate_limit::RateGovernor;
use super::retry::RetryPolicy;
use super::summary::{
    BatchStats, FailureKind, FailureRecord, RunSummary, SummaryCollector, SummaryFragment,
    SummaryInputs,
};
use super::BackupError;
use crate::config::{BackupConfig, EnabledEndpoints, EndpointSpec};
use crate::fetcher::auth::{provider_from_config, TokenProvider};
use crate::fetcher::http::build_http_client;
use crate::fetcher::{BoundedFetcher, FetchTask, FetcherError, IgaHttpClient, RequestStats};
use crate::metrics::record_records_written;
use crate::normalize::{value_at, Normalizer};
use crate::output::{create_sinks, Sink, SinkTarget};
use crate::shutdown::{Cancelled, SharedShutdown, ShutdownReason};
use crate::{Record, ResourceId};
use chrono::Utc;
use futures::future::join_all;
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Output of the global phase
#[derive(Debug, Default)]
pub struct GlobalPhase {
    /// Records per endpoint, in source order
    pub records: BTreeMap<String, Vec<Record>>,
    /// Batches and failures
    pub fragment: SummaryFragment,
}

/// Output of the resource phase
#[derive(Debug, Default)]
pub struct ResourcePhase {
    /// Records per `(resource, endpoint)`
    pub records: BTreeMap<(ResourceId, String), Vec<Record>>,
    /// Batches and failures
    pub fragment: SummaryFragment,
    /// Resources whose work started
    pub resources_processed: usize,
}

/// Runs backups against one tenant
pub struct BackupExecutor {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
    governor: Arc<RateGovernor>,
    auth: Arc<dyn TokenProvider>,
    max_pages: usize,
    fetcher: BoundedFetcher,
    limits: ConcurrencyLimits,
    sinks: Vec<Arc<dyn Sink>>,
    shutdown: SharedShutdown,
    rules: Vec<ResourceIdRule>,
    page_size: u32,
    objects_per_endpoint: Option<usize>,
    resources_limit: Option<usize>,
    deadline: Option<Instant>,
}

impl BackupExecutor {
    /// Build an executor from validated configuration
    ///
    /// The run deadline, when configured, is measured from this call.
    pub fn from_config(config: &BackupConfig, shutdown: SharedShutdown) -> Result<Self, BackupError> {
        config.validate()?;

        let client =
            build_http_client(&config.http).map_err(|e| BackupError::HttpClient(e.to_string()))?;
        let base_url = config.base_url();
        let auth = provider_from_config(&config.auth, &base_url, client.clone())?;

        let deadline = config.run.deadline().map(|d| Instant::now() + d);
        let mut governor =
            RateGovernor::from_config(&config.rate_limit).with_shutdown(Arc::clone(&shutdown));
        if let Some(deadline) = deadline {
            governor = governor.with_deadline(deadline);
        }
        let governor = Arc::new(governor);
        let retry = RetryPolicy::from_config(&config.retry);
        let max_pages = config.pagination.max_pages;

        let fetcher = Self::build_fetcher(
            &client,
            &base_url,
            &governor,
            &retry,
            &auth,
            &shutdown,
            max_pages,
        );

        info!(
            base_url = %base_url,
            endpoints_ceiling = config.concurrency.max_concurrent_endpoints,
            api_ceiling = config.concurrency.max_concurrent_api_calls,
            detail_ceiling = config.concurrency.max_detail_calls_per_endpoint,
            resource_ceiling = config.concurrency.max_concurrent_resources,
            requests_per_minute = config.rate_limit.requests_per_minute,
            burst = config.rate_limit.burst_size,
            "Backup executor configured"
        );

        Ok(Self {
            client,
            base_url,
            retry,
            governor,
            auth,
            max_pages,
            fetcher,
            limits: ConcurrencyLimits::from_config(&config.concurrency),
            sinks: create_sinks(&config.output, &config.tenant, Utc::now()),
            shutdown,
            rules: config.discovery.clone(),
            page_size: config.pagination.page_size,
            objects_per_endpoint: config.run.objects_per_endpoint,
            resources_limit: config.run.resources_limit,
            deadline,
        })
    }

    fn build_fetcher(
        client: &Client,
        base_url: &str,
        governor: &Arc<RateGovernor>,
        retry: &RetryPolicy,
        auth: &Arc<dyn TokenProvider>,
        shutdown: &SharedShutdown,
        max_pages: usize,
    ) -> BoundedFetcher {
        let http = IgaHttpClient::new(
            client.clone(),
            base_url,
            Arc::clone(governor),
            retry.clone(),
            Arc::clone(auth),
            Arc::clone(shutdown),
        );
        BoundedFetcher::new(http, max_pages)
    }

    fn rebuild_fetcher(mut self) -> Self {
        self.fetcher = Self::build_fetcher(
            &self.client,
            &self.base_url,
            &self.governor,
            &self.retry,
            &self.auth,
            &self.shutdown,
            self.max_pages,
        );
        self
    }

    /// Replace the configured sinks
    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn Sink>>) -> Self {
        self.sinks = sinks;
        self
    }

    /// Replace the token provider
    pub fn with_token_provider(mut self, auth: Arc<dyn TokenProvider>) -> Self {
        self.auth = auth;
        self.rebuild_fetcher()
    }

    /// Replace the rate governor
    pub fn with_rate_governor(mut self, governor: Arc<RateGovernor>) -> Self {
        self.governor = governor;
        self.rebuild_fetcher()
    }

    /// Replace the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self.rebuild_fetcher()
    }

    /// Run-wide rate governor
    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    /// Cancellation handle of this executor
    pub fn shutdown(&self) -> &SharedShutdown {
        &self.shutdown
    }

    /// Execute a complete backup
    ///
    /// Always returns a summary; authentication failures, cancellation and
    /// the run deadline end the run early with an aborted outcome.
    pub async fn run(&self, endpoints: &EnabledEndpoints) -> RunSummary {
        let started_at = Utc::now();
        let started = Instant::now();
        let requests_before = self.fetcher.http().requests_issued();
        let deadline_timer = self
            .deadline
            .map(|at| self.shutdown.arm_deadline(at.saturating_duration_since(Instant::now())));

        info!(
            global = endpoints.global().len(),
            resource = endpoints.resource().len(),
            sinks = self.sinks.len(),
            "Backup started"
        );

        let global = self.run_global_phase(endpoints.global()).await;
        let mut fragment = global.fragment;

        let frozen = discover_resource_ids(&global.records, &self.rules)
            .with_limit(self.resources_limit)
            .freeze(self.rules.clone());

        let mut resources_processed = 0;
        if let Some(reason) = self.shutdown.reason() {
            warn!(reason = %reason, "Run stopped during global phase - skipping resource phase");
        } else if endpoints.resource().is_empty() || frozen.is_empty() {
            info!(
                resources = frozen.len(),
                endpoints = endpoints.resource().len(),
                "Nothing to fetch in resource phase"
            );
        } else {
            let phase = self.run_resource_phase(&frozen, endpoints.resource()).await;
            fragment.merge(phase.fragment);
            resources_processed = phase.resources_processed;
        }

        let finish_failures = SummaryCollector::new();
        for sink in &self.sinks {
            if let Err(e) = sink.finish().await {
                finish_failures.record_failure(FailureRecord::new(
                    sink.name(),
                    FailureKind::Sink,
                    format!("finish failed: {e}"),
                ));
            }
        }
        fragment.merge(finish_failures.take());

        if let Some(timer) = deadline_timer {
            timer.abort();
        }

        let summary = RunSummary::finalize(
            started_at,
            started.elapsed(),
            SummaryInputs {
                fragment,
                resources_processed,
                duplicate_resources: frozen.duplicates().to_vec(),
                skipped_resources: frozen.skipped(),
                total_requests: self.fetcher.http().requests_issued() - requests_before,
                throttle_events: self.governor.throttle_events(),
                aborted: self.shutdown.reason(),
            },
        );

        info!(
            outcome = %summary.outcome,
            records = summary.total_records,
            failures = summary.failures.len(),
            requests = summary.total_requests,
            elapsed_ms = summary.elapsed_ms,
            "Backup finished"
        );
        summary
    }

    /// Fetch every global endpoint under the endpoint ceiling
    pub async fn run_global_phase(&self, specs: &[EndpointSpec]) -> GlobalPhase {
        info!(endpoints = specs.len(), "Starting global phase");
        let collector = SummaryCollector::new();

        let jobs = specs.iter().map(|spec| {
            let collector = &collector;
            async move {
                let _permit = match acquire_or_cancel(self.limits.endpoints(), &self.shutdown).await {
                    Ok(permit) => permit,
                    Err(Cancelled(reason)) => {
                        collector.record_failure(not_started(spec, None, reason));
                        return None;
                    }
                };
                self.fetch_batch(spec, None, collector)
                    .await
                    .map(|records| (spec.name.clone(), records))
            }
        });
        let records = join_all(jobs).await.into_iter().flatten().collect();

        GlobalPhase {
            records,
            fragment: collector.take(),
        }
    }

    /// Fetch every `(resource, endpoint)` pair under the resource ceiling
    pub async fn run_resource_phase(
        &self,
        resources: &FrozenResources,
        specs: &[EndpointSpec],
    ) -> ResourcePhase {
        info!(
            resources = resources.len(),
            endpoints = specs.len(),
            "Starting resource phase"
        );
        let collector = SummaryCollector::new();
        let processed = AtomicUsize::new(0);

        let jobs = resources.ids().iter().map(|rid| {
            let collector = &collector;
            let processed = &processed;
            async move {
                let _permit = match acquire_or_cancel(self.limits.resources(), &self.shutdown).await {
                    Ok(permit) => permit,
                    Err(Cancelled(reason)) => {
                        for spec in specs {
                            collector.record_failure(not_started(spec, Some(rid), reason));
                        }
                        return Vec::new();
                    }
                };
                processed.fetch_add(1, Ordering::Relaxed);
                debug!(resource_id = %rid, "Processing resource");

                let ceiling = self.limits.resource_endpoints();
                let per_endpoint = specs.iter().map(|spec| {
                    let ceiling = &ceiling;
                    async move {
                        let _permit = match acquire_or_cancel(ceiling, &self.shutdown).await {
                            Ok(permit) => permit,
                            Err(Cancelled(reason)) => {
                                collector.record_failure(not_started(spec, Some(rid), reason));
                                return None;
                            }
                        };
                        let records = self.fetch_batch(spec, Some(rid), collector).await?;
                        resources.report_late(&spec.name, &records);
                        Some(((rid.clone(), spec.name.clone()), records))
                    }
                });
                join_all(per_endpoint).await.into_iter().flatten().collect::<Vec<_>>()
            }
        });
        let records = join_all(jobs).await.into_iter().flatten().collect();

        ResourcePhase {
            records,
            fragment: collector.take(),
            resources_processed: processed.into_inner(),
        }
    }

    /// List, enrich, normalize and write one batch
    ///
    /// Returns the batch's records, or `None` when the list fetch failed.
    async fn fetch_batch(
        &self,
        spec: &EndpointSpec,
        resource_id: Option<&ResourceId>,
        collector: &SummaryCollector,
    ) -> Option<Vec<Record>> {
        if let Some(reason) = self.shutdown.reason() {
            collector.record_failure(not_started(spec, resource_id, reason));
            return None;
        }

        let listed = match FetchTask::list(spec, resource_id, self.page_size) {
            Ok(task) => self.fetcher.fetch_list(&task, &self.limits.list_scope()).await,
            Err(e) => Err(e),
        };
        let listed = match listed {
            Ok(listed) => listed,
            Err(e) => {
                self.record_fetch_error(collector, spec, resource_id, None, &e);
                return None;
            }
        };

        let mut stats = BatchStats::new(&spec.name, spec.kind, resource_id);
        stats.pages = listed.pages;
        stats.requests = listed.stats.requests;
        stats.retries = listed.stats.retries;

        if let Some(truncation) = &listed.truncation {
            collector.record_failure(
                FailureRecord::new(&spec.name, FailureKind::PageLimit, truncation.to_string())
                    .with_resource(resource_id),
            );
        }

        let mut items = listed.items;
        if let Some(cap) = self.objects_per_endpoint {
            if items.len() > cap {
                debug!(endpoint = %spec.name, fetched = items.len(), cap, "Applying per-endpoint object cap");
                items.truncate(cap);
            }
        }

        if spec.detail_template().is_some() && !items.is_empty() {
            let (enriched, detail_stats, calls) =
                self.enrich(spec, resource_id, items, collector).await;
            items = enriched;
            stats.detail_calls = calls;
            stats.requests += detail_stats.requests;
            stats.retries += detail_stats.retries;
        }

        let (records, errors) = Normalizer::normalize_all(&items, spec, resource_id);
        for e in errors {
            collector.record_failure(
                FailureRecord::new(&spec.name, FailureKind::MalformedRecord, e.to_string())
                    .with_resource(resource_id),
            );
        }
        stats.records = records.len();

        let target = match resource_id {
            Some(rid) => SinkTarget::resource(&spec.name, rid.clone()),
            None => SinkTarget::global(&spec.name),
        };
        self.write_batch(&records, &target, collector).await;

        info!(
            endpoint = %spec.name,
            resource_id = resource_id.map(|r| r.as_str()).unwrap_or("-"),
            records = stats.records,
            pages = stats.pages,
            detail_calls = stats.detail_calls,
            "Batch completed"
        );
        collector.record_batch(stats);
        Some(records)
    }

    /// Issue one detail call per item under a fresh detail ceiling
    ///
    /// Item order is preserved. A failed detail call keeps the list item.
    async fn enrich(
        &self,
        spec: &EndpointSpec,
        resource_id: Option<&ResourceId>,
        items: Vec<Value>,
        collector: &SummaryCollector,
    ) -> (Vec<Value>, RequestStats, usize) {
        let scope = self.limits.detail_scope();
        let id_path = spec.fields.id_path.as_deref().unwrap_or("id");
        let cancelled = AtomicUsize::new(0);

        let calls = items.into_iter().map(|item| {
            let scope = &scope;
            let cancelled = &cancelled;
            async move {
                let task = item_id(&item, id_path)
                    .and_then(|id| FetchTask::detail(spec, &id, resource_id));
                let Some(task) = task else {
                    return (item, RequestStats::default(), false);
                };
                match self.fetcher.fetch_object(&task, scope).await {
                    Ok(detail) => (merge_detail(item, detail.value), detail.stats, true),
                    Err(FetcherError::Cancelled(_)) => {
                        cancelled.fetch_add(1, Ordering::Relaxed);
                        (item, RequestStats::default(), true)
                    }
                    Err(e) => {
                        self.record_fetch_error(collector, spec, resource_id, task.item_id.as_deref(), &e);
                        (item, RequestStats::default(), true)
                    }
                }
            }
        });

        let mut stats = RequestStats::default();
        let mut issued = 0;
        let mut enriched = Vec::new();
        for (item, item_stats, called) in join_all(calls).await {
            stats.add(item_stats);
            issued += usize::from(called);
            enriched.push(item);
        }

        let cancelled = cancelled.into_inner();
        if cancelled > 0 {
            let reason = self.shutdown.reason().unwrap_or(ShutdownReason::Interrupted);
            collector.record_failure(
                FailureRecord::new(
                    &spec.name,
                    FailureKind::Cancelled,
                    format!("{cancelled} detail calls cancelled: {reason}"),
                )
                .with_resource(resource_id),
            );
        }
        (enriched, stats, issued)
    }

    async fn write_batch(&self, records: &[Record], target: &SinkTarget, collector: &SummaryCollector) {
        for sink in &self.sinks {
            match sink.write(records, target).await {
                Ok(report) => {
                    record_records_written(sink.name(), &target.endpoint, report.records_written);
                }
                Err(e) => collector.record_failure(
                    FailureRecord::new(
                        &target.endpoint,
                        FailureKind::Sink,
                        format!("{} sink: {e}", sink.name()),
                    )
                    .with_resource(target.resource_id.as_ref()),
                ),
            }
        }
    }

    fn record_fetch_error(
        &self,
        collector: &SummaryCollector,
        spec: &EndpointSpec,
        resource_id: Option<&ResourceId>,
        item_id: Option<&str>,
        error: &FetcherError,
    ) {
        if error.is_fatal() {
            match error {
                FetcherError::Auth(auth) => {
                    error!(endpoint = %spec.name, error = %auth, "Authentication failed - stopping run");
                    self.shutdown
                        .request_shutdown_with(ShutdownReason::AuthenticationFailed);
                }
                other => debug!(endpoint = %spec.name, error = %other, "Fetch stopped by run cancellation"),
            }
        }

        let mut failure = FailureRecord::new(&spec.name, error.failure_kind(), error.to_string())
            .with_resource(resource_id)
            .with_retries(error.retries());
        if let Some(item_id) = item_id {
            failure = failure.with_item(item_id);
        }
        collector.record_failure(failure);
    }
}

fn not_started(spec: &EndpointSpec, resource_id: Option<&ResourceId>, reason: ShutdownReason) -> FailureRecord {
    FailureRecord::new(&spec.name, FailureKind::Cancelled, format!("not started: {reason}"))
        .with_resource(resource_id)
}

fn item_id(item: &Value, path: &str) -> Option<String> {
    match value_at(item, path)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Shallow merge: detail keys win; non-object details leave the item as is
fn merge_detail(item: Value, detail: Value) -> Value {
    match (item, detail) {
        (Value::Object(mut base), Value::Object(extra)) => {
            base.extend(extra);
            Value::Object(base)
        }
        (item, _) => item,
    }
}
