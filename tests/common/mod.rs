//! Shared fixtures for integration tests

#![allow(dead_code)]

use iga_backup::backup::BackupExecutor;
use iga_backup::config::BackupConfig;
use iga_backup::output::{MemorySink, Sink};
use iga_backup::shutdown::{SharedShutdown, ShutdownCoordinator};
use serde_json::{json, Value};
use std::sync::Arc;

/// SSWS token used by every mock tenant
pub const TEST_TOKEN: &str = "test-token";

/// Configuration pointing at a mock server, tuned so tests never wait
pub fn test_config(base_url: &str) -> BackupConfig {
    let mut config = BackupConfig::default();
    config.tenant.base_url = base_url.to_string();
    config.auth.api_token = Some(TEST_TOKEN.to_string());
    config.rate_limit.requests_per_minute = 600_000;
    config.rate_limit.burst_size = 1_000;
    config.retry.max_retries = 2;
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.retry.jitter_ms = 0;
    config.retry.max_throttle_delay_secs = 0;
    config.pagination.page_size = 2;
    config.http.request_timeout_secs = 5;
    config
}

/// Executor writing into a fresh in-memory sink
pub fn executor_with_memory(config: &BackupConfig) -> (BackupExecutor, Arc<MemorySink>) {
    executor_with_sink(config, MemorySink::new(), ShutdownCoordinator::shared())
}

/// Executor writing into `sink`, cancelled through `shutdown`
pub fn executor_with_sink(
    config: &BackupConfig,
    sink: MemorySink,
    shutdown: SharedShutdown,
) -> (BackupExecutor, Arc<MemorySink>) {
    let sink = Arc::new(sink);
    let executor = BackupExecutor::from_config(config, shutdown)
        .unwrap()
        .with_sinks(vec![Arc::clone(&sink) as Arc<dyn Sink>]);
    (executor, sink)
}

/// List items `{id, name}` for the given IDs
pub fn items(ids: &[&str]) -> Value {
    Value::Array(ids.iter().map(|id| json!({"id": id, "name": format!("name-{id}")})).collect())
}

/// `Link` header pointing at the next page of `path`
pub fn next_link(base_url: &str, path: &str, cursor: &str) -> String {
    format!("<{base_url}{path}?limit=2&after={cursor}>; rel=\"next\"")
}

/// External IDs of `records`, in order
pub fn ids(records: &[iga_backup::Record]) -> Vec<String> {
    records.iter().map(|r| r.external_id.clone()).collect()
}
