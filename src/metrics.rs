//! Observability metrics for backup runs
//!
//! Request, retry, throttling and sink counters are emitted through the
//! `metrics` facade. Without an installed recorder every call is a no-op, so
//! library code records unconditionally; the binary installs a Prometheus
//! exporter only when `--metrics-addr` is given.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Metrics setup errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Prometheus exporter could not be installed
    #[error("failed to install Prometheus exporter on {addr}: {message}")]
    Install {
        /// Requested listen address
        addr: SocketAddr,
        /// Underlying error
        message: String,
    },
}

/// Initialize metrics with a Prometheus scrape endpoint
///
/// Idempotent: later calls are ignored.
pub async fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install {
            addr,
            message: e.to_string(),
        })?;

    describe_counter!(
        "iga_http_requests_total",
        Unit::Count,
        "HTTP requests issued to the governance API"
    );
    describe_counter!(
        "iga_http_retries_total",
        Unit::Count,
        "Retry attempts scheduled by the retry policy"
    );
    describe_counter!(
        "iga_http_throttled_total",
        Unit::Count,
        "429 responses received"
    );
    describe_counter!(
        "iga_records_written_total",
        Unit::Count,
        "Records accepted by sinks"
    );
    describe_counter!(
        "iga_fetch_failures_total",
        Unit::Count,
        "Failures recorded in the run summary"
    );
    describe_histogram!(
        "iga_rate_wait_seconds",
        Unit::Seconds,
        "Time spent waiting on the rate governor"
    );
    describe_histogram!(
        "iga_http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let n = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{n:08x}")
}

/// Timing and outcome of one HTTP attempt
pub struct HttpRequestMetrics {
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl HttpRequestMetrics {
    /// Start recording a new HTTP attempt
    pub fn start(endpoint: impl Into<String>, attempt: u32) -> Self {
        let endpoint = endpoint.into();
        let correlation_id = generate_correlation_id();

        debug!(
            correlation_id = %correlation_id,
            endpoint = %endpoint,
            attempt = attempt,
            "Starting HTTP request"
        );

        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
            attempt,
        }
    }

    /// Record completion with a status code
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "iga_http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => status_code.to_string(),
        )
        .increment(1);

        histogram!(
            "iga_http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        if status_code == 429 {
            counter!(
                "iga_http_throttled_total",
                "endpoint" => self.endpoint.clone(),
            )
            .increment(1);

            warn!(
                correlation_id = %self.correlation_id,
                endpoint = %self.endpoint,
                attempt = self.attempt,
                duration_ms = duration.as_millis(),
                "Rate limit response (429) received"
            );
        }

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            status = status_code,
            duration_ms = duration.as_millis(),
            "HTTP request completed"
        );
    }

    /// Record a transport error (no status code)
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "iga_http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => "network_error",
        )
        .increment(1);

        histogram!(
            "iga_http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        warn!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            attempt = self.attempt,
            duration_ms = duration.as_millis(),
            "Network error recorded"
        );
    }

    /// Correlation ID of this attempt
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record a scheduled retry
pub fn record_retry(endpoint: &str, delay: Duration) {
    counter!(
        "iga_http_retries_total",
        "endpoint" => endpoint.to_string(),
    )
    .increment(1);

    debug!(
        endpoint = %endpoint,
        backoff_ms = delay.as_millis(),
        "Retry backoff recorded"
    );
}

/// Record time spent waiting for rate tokens
pub fn record_rate_wait(wait: Duration) {
    histogram!("iga_rate_wait_seconds").record(wait.as_secs_f64());
}

/// Record records accepted by a sink
pub fn record_records_written(sink: &str, endpoint: &str, count: usize) {
    counter!(
        "iga_records_written_total",
        "sink" => sink.to_string(),
        "endpoint" => endpoint.to_string(),
    )
    .increment(count as u64);
}

/// Record a failure entered into the run summary
pub fn record_failure(endpoint: &str, kind: &str) {
    counter!(
        "iga_fetch_failures_total",
        "endpoint" => endpoint.to_string(),
        "kind" => kind.to_string(),
    )
    .increment(1);
}

/// Check if the exporter has been installed
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}
