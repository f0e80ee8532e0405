//! Governance API HTTP client
//!
//! Executes one logical request with retries:
//! - each attempt takes a concurrency slot, a rate token and an auth token
//! - 401 invalidates the cached token and retries once without counting
//! - other failures go through the retry policy, including token endpoint
//!   outages; every API 429 throttles the rate governor
//! - waits, token requests and in-flight calls are abandoned when the run is
//!   cancelled

use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, LINK, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::auth::{AuthError, AuthToken, TokenProvider};
use super::pagination::next_cursor_from_link;
use super::retry_formatter::{extract_error_type, RetryContext, RetryErrorType};
use super::{FetchTask, FetcherError, FetcherResult, RequestStats, CURSOR_PARAM};
use crate::backup::limits::ConcurrencyScope;
use crate::backup::rate_limit::{RateGovernor, RateLimitError};
use crate::backup::retry::{FailureOutcome, RetryDecision, RetryPolicy};
use crate::config::HttpConfig;
use crate::metrics::{record_retry, HttpRequestMetrics};
use crate::shutdown::{Cancelled, SharedShutdown};

const ERROR_BODY_LIMIT: usize = 512;

/// Build the shared reqwest client from configuration
pub fn build_http_client(config: &HttpConfig) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .pool_max_idle_per_host(config.pool_size)
        .user_agent(concat!("iga-backup/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Successful response of one logical request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Parsed JSON body (`Null` for an empty body)
    pub body: Value,
    /// Cursor from a `Link: rel="next"` header
    pub link_cursor: Option<String>,
    /// Attempts and retries spent
    pub stats: RequestStats,
}

/// HTTP client bound to one tenant
pub struct IgaHttpClient {
    client: Client,
    base_url: String,
    governor: Arc<RateGovernor>,
    retry: RetryPolicy,
    auth: Arc<dyn TokenProvider>,
    shutdown: SharedShutdown,
    requests_issued: AtomicU64,
}

enum Attempt {
    Success(HttpResponse),
    Unauthorized,
    Failed {
        outcome: FailureOutcome,
        error_type: RetryErrorType,
        message: String,
    },
}

impl IgaHttpClient {
    /// Create a client
    ///
    /// # Arguments
    /// * `client` - Shared reqwest client
    /// * `base_url` - Tenant base URL (e.g. "https://example.okta.com")
    /// * `governor` - Run-wide rate governor
    /// * `retry` - Retry policy
    /// * `auth` - Token provider
    /// * `shutdown` - Run cancellation signal
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        governor: Arc<RateGovernor>,
        retry: RetryPolicy,
        auth: Arc<dyn TokenProvider>,
        shutdown: SharedShutdown,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            governor,
            retry,
            auth,
            shutdown,
            requests_issued: AtomicU64::new(0),
        }
    }

    /// Base URL requests are issued against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run-wide rate governor
    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    /// HTTP attempts sent to the API so far, failed ones included
    pub fn requests_issued(&self) -> u64 {
        self.requests_issued.load(Ordering::Relaxed)
    }

    /// Execute `task` (optionally at `cursor`) until success or give-up
    pub async fn get(
        &self,
        task: &FetchTask,
        cursor: Option<&str>,
        scope: &ConcurrencyScope,
    ) -> FetcherResult<HttpResponse> {
        let url = format!("{}{}", self.base_url, task.path);
        let mut stats = RequestStats::default();
        let mut failures: u32 = 0;
        let mut reauthenticated = false;

        loop {
            if let Some(reason) = self.shutdown.reason() {
                return Err(FetcherError::Cancelled(reason));
            }

            let attempt = {
                let _slot = scope
                    .acquire(&self.shutdown)
                    .await
                    .map_err(|Cancelled(reason)| FetcherError::Cancelled(reason))?;
                self.governor
                    .acquire(1)
                    .await
                    .map_err(|e| rate_error(e, failures))?;
                match self.token().await? {
                    Ok(token) => {
                        stats.requests += 1;
                        self.requests_issued.fetch_add(1, Ordering::Relaxed);
                        self.attempt(task, &url, cursor, &token.header_value(), failures + 1)
                            .await?
                    }
                    Err(unavailable) => unavailable,
                }
            };

            let (outcome, error_type, message) = match attempt {
                Attempt::Success(mut response) => {
                    if failures > 0 {
                        let context = self.context(task, failures + 1, RetryErrorType::NetworkGeneric, Duration::ZERO, "");
                        info!("{}", context.format_success());
                    }
                    stats.retries = u64::from(failures);
                    response.stats = stats;
                    return Ok(response);
                }
                Attempt::Unauthorized if !reauthenticated => {
                    warn!(endpoint = %task.endpoint, "HTTP 401 - refreshing credentials and retrying once");
                    self.auth.invalidate();
                    reauthenticated = true;
                    continue;
                }
                Attempt::Unauthorized => {
                    return Err(FetcherError::Auth(AuthError::Rejected { status: 401 }));
                }
                Attempt::Failed {
                    outcome,
                    error_type,
                    message,
                } => (outcome, error_type, message),
            };

            failures += 1;
            match self.retry.decide(&outcome, failures) {
                RetryDecision::Retry { after, throttled } => {
                    record_retry(&task.endpoint, after);
                    let context = self.context(task, failures, error_type, after, &message);
                    warn!(
                        endpoint = %task.endpoint,
                        attempt = failures,
                        backoff_ms = after.as_millis(),
                        throttled,
                        "{}",
                        context.format_retry()
                    );
                    self.shutdown
                        .run_until_shutdown(tokio::time::sleep(after))
                        .await
                        .map_err(|Cancelled(reason)| FetcherError::Cancelled(reason))?;
                }
                RetryDecision::GiveUp(reason) => {
                    let context = self.context(task, failures, error_type, Duration::ZERO, &message);
                    warn!(endpoint = %task.endpoint, give_up = %reason, "{}", context.format_failure());
                    let retries = failures - 1;
                    return Err(match outcome {
                        FailureOutcome::Http { status, .. }
                            if (400..500).contains(&status) && status != 429 =>
                        {
                            FetcherError::Permanent {
                                status,
                                message,
                                retries,
                            }
                        }
                        _ => FetcherError::Transient { message, retries },
                    });
                }
            }
        }
    }

    /// Current auth token, or a retryable failed attempt when the token
    /// endpoint is unavailable
    async fn token(&self) -> FetcherResult<Result<AuthToken, Attempt>> {
        let token = self
            .shutdown
            .run_until_shutdown(self.auth.token())
            .await
            .map_err(|Cancelled(reason)| FetcherError::Cancelled(reason))?;

        match token {
            Ok(token) => Ok(Ok(token)),
            Err(AuthError::TokenUnavailable { status, message }) => {
                let error_type = extract_error_type(status.and_then(|s| StatusCode::from_u16(s).ok()), None);
                let outcome = match status {
                    Some(status) => FailureOutcome::Http {
                        status,
                        retry_after: None,
                    },
                    None => FailureOutcome::Network {
                        message: message.clone(),
                    },
                };
                Ok(Err(Attempt::Failed {
                    outcome,
                    error_type,
                    message: format!("token endpoint unavailable: {message}"),
                }))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn attempt(
        &self,
        task: &FetchTask,
        url: &str,
        cursor: Option<&str>,
        authorization: &str,
        attempt: u32,
    ) -> FetcherResult<Attempt> {
        let mut request = self
            .client
            .request(task.method.clone(), url)
            .header(AUTHORIZATION, authorization)
            .header(ACCEPT, "application/json")
            .query(&task.query);
        if let Some(cursor) = cursor {
            request = request.query(&[(CURSOR_PARAM, cursor)]);
        }

        debug!(endpoint = %task.endpoint, url, cursor, attempt, "Sending request");
        let metrics = HttpRequestMetrics::start(&task.endpoint, attempt);

        let sent = self
            .shutdown
            .run_until_shutdown(request.send())
            .await
            .map_err(|Cancelled(reason)| FetcherError::Cancelled(reason))?;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                metrics.record_network_error();
                return Ok(Attempt::Failed {
                    error_type: extract_error_type(None, Some(&e)),
                    message: e.to_string(),
                    outcome: FailureOutcome::Network {
                        message: e.to_string(),
                    },
                });
            }
        };

        let status = response.status();
        metrics.record_complete(status.as_u16());

        if status == StatusCode::UNAUTHORIZED {
            return Ok(Attempt::Unauthorized);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.governor.report_throttled();
        }

        let headers = response.headers().clone();
        let body = self
            .shutdown
            .run_until_shutdown(response.bytes())
            .await
            .map_err(|Cancelled(reason)| FetcherError::Cancelled(reason))?;
        let body = match body {
            Ok(body) => body,
            Err(e) => {
                return Ok(Attempt::Failed {
                    error_type: extract_error_type(None, Some(&e)),
                    message: format!("failed to read response body: {e}"),
                    outcome: FailureOutcome::Network {
                        message: e.to_string(),
                    },
                });
            }
        };

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            let excerpt: String = text.chars().take(ERROR_BODY_LIMIT).collect();
            debug!(
                correlation_id = %metrics.correlation_id(),
                endpoint = %task.endpoint,
                status = status.as_u16(),
                "Error response received"
            );
            return Ok(Attempt::Failed {
                error_type: extract_error_type(Some(status), None),
                message: format!("HTTP {}: {}", status.as_u16(), excerpt.trim()),
                outcome: FailureOutcome::Http {
                    status: status.as_u16(),
                    retry_after: retry_after(&headers),
                },
            });
        }

        let body = if body.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(&body).map_err(|e| {
                FetcherError::InvalidResponse(format!("{} returned invalid JSON: {e}", task.path))
            })?
        };

        Ok(Attempt::Success(HttpResponse {
            body,
            link_cursor: link_cursor(&headers),
            stats: RequestStats::default(),
        }))
    }

    fn context(
        &self,
        task: &FetchTask,
        attempt: u32,
        error_type: RetryErrorType,
        backoff: Duration,
        message: &str,
    ) -> RetryContext {
        RetryContext::new(
            attempt as usize,
            self.retry.max_retries() as usize + 1,
            error_type,
            backoff,
            task.endpoint.clone(),
            task.resource_id.as_ref().map(|r| r.to_string()),
            message,
            task.path.clone(),
        )
    }
}

fn rate_error(error: RateLimitError, retries: u32) -> FetcherError {
    match error {
        RateLimitError::RateTimeout { wait } => FetcherError::RateTimeout { wait, retries },
        RateLimitError::Cancelled(reason) => FetcherError::Cancelled(reason),
        other => FetcherError::Transient {
            message: other.to_string(),
            retries,
        },
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()
        .and_then(crate::backup::retry::parse_retry_after)
}

fn link_cursor(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(next_cursor_from_link)
}
