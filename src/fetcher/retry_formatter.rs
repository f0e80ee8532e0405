//! Retry message formatting.
//!
//! Classifies failed attempts and renders consistent retry and failure log
//! lines carrying the endpoint and resource being fetched.

use reqwest::{Error as ReqwestError, StatusCode};
use std::time::Duration;

/// Classification of retry errors for user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Network timeout or connection stalled long enough to trigger a timeout
    NetworkTimeout,
    /// Connection refused, DNS failure, or other offline scenarios
    NetworkOffline,
    /// HTTP 429 rate limit exceeded
    RateLimit,
    /// HTTP 5xx server error
    ServerError(u16),
    /// HTTP 400 invalid request
    InvalidRequest,
    /// Authentication failures (401/403)
    AuthFailed(u16),
    /// Other client errors (4xx, except 429)
    ClientError(u16),
    /// Generic fallback when no better classification fits
    NetworkGeneric,
}

impl RetryErrorType {
    /// User-friendly description used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::InvalidRequest => "invalid request",
            Self::AuthFailed(code) => match code {
                401 => "authentication failed (401)",
                403 => "permission denied (403)",
                _ => "authentication failed",
            },
            Self::ClientError(code) => match code {
                404 => "resource not found",
                405 => "method not allowed",
                _ => "client error",
            },
            Self::NetworkGeneric => "network error",
        }
    }

    /// Suggested remediation shown after a final failure.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check network connectivity or raise http.request_timeout_secs",
            Self::NetworkOffline => "Verify the tenant domain and DNS resolution",
            Self::RateLimit => "Lower rate_limit.requests_per_minute or concurrency ceilings",
            Self::ServerError(_) => "The governance API may be degraded, try again later",
            Self::InvalidRequest => "Check the endpoint filter template and query parameters",
            Self::AuthFailed(_) => "Verify the API token or OAuth client scopes for governance APIs",
            Self::ClientError(_) => "The endpoint may not be available on this tenant; disable it in the endpoint config",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Whether the error type is typically retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RetryErrorType::InvalidRequest
                | RetryErrorType::AuthFailed(_)
                | RetryErrorType::ClientError(_)
        )
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: usize,
    /// Maximum number of attempts configured
    pub max_attempts: usize,
    /// Type of error that triggered retry
    pub error_type: RetryErrorType,
    /// Backoff duration until next attempt
    pub backoff_duration: Duration,
    /// Endpoint name (e.g. "campaigns")
    pub endpoint: String,
    /// Resource ID for resource endpoints
    pub resource_id: Option<String>,
    /// Original error message for details
    pub error_message: String,
    /// Request path that failed
    pub path: String,
}

impl RetryContext {
    /// Convenience constructor used throughout the retry logic.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        attempt: usize,
        max_attempts: usize,
        error_type: RetryErrorType,
        backoff_duration: Duration,
        endpoint: impl Into<String>,
        resource_id: Option<String>,
        error_message: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type,
            backoff_duration,
            endpoint: endpoint.into(),
            resource_id,
            error_message: error_message.into(),
            path: path.into(),
        }
    }

    /// Standardized retry message with attempt counters and context.
    pub fn format_retry(&self) -> String {
        let mut message = format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.attempt,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64()
        );
        append_scope(&mut message, &self.endpoint, self.resource_id.as_deref());
        message
    }

    /// Message for a request that succeeded after earlier failures.
    pub fn format_success(&self) -> String {
        let mut message = format!(
            "Retry attempt {}/{} succeeded",
            self.attempt, self.max_attempts
        );
        append_scope(&mut message, &self.endpoint, self.resource_id.as_deref());
        message
    }

    /// Final failure summary with actionable suggestions.
    pub fn format_failure(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "[FAILED] Request failed after {} attempts",
            self.attempt
        ));
        lines.push(format!("  Last error: {}", self.error_message));
        lines.push(format!("  Endpoint: {}", self.endpoint));
        if let Some(resource_id) = &self.resource_id {
            lines.push(format!("  Resource: {resource_id}"));
        }
        lines.push(format!("  Path: {}", self.path));
        lines.push("  Suggestions:".to_string());

        for suggestion in self.format_suggestions() {
            lines.push(format!("    - {suggestion}"));
        }

        lines.join("\n")
    }

    /// Suggestions tailored to the current retry context.
    pub fn format_suggestions(&self) -> Vec<String> {
        let mut suggestions = vec![self.error_type.suggestion().to_string()];
        if self.error_type.is_retryable() {
            suggestions.push(format!(
                "Try increasing retry.max_retries (current: {})",
                self.max_attempts.saturating_sub(1)
            ));
        }
        suggestions
    }
}

/// Extract a [`RetryErrorType`] from an HTTP status or reqwest error.
pub fn extract_error_type(
    status: Option<StatusCode>,
    err: Option<&ReqwestError>,
) -> RetryErrorType {
    if let Some(status) = status {
        match status.as_u16() {
            400 => return RetryErrorType::InvalidRequest,
            401 | 403 => return RetryErrorType::AuthFailed(status.as_u16()),
            429 => return RetryErrorType::RateLimit,
            _ => {}
        }

        if status.is_server_error() {
            return RetryErrorType::ServerError(status.as_u16());
        }

        if status.is_client_error() {
            return RetryErrorType::ClientError(status.as_u16());
        }
    }

    if let Some(err) = err {
        if err.is_timeout() {
            return RetryErrorType::NetworkTimeout;
        }

        if err.is_connect() {
            return RetryErrorType::NetworkOffline;
        }
    }

    RetryErrorType::NetworkGeneric
}

fn append_scope(buffer: &mut String, endpoint: &str, resource_id: Option<&str>) {
    if endpoint.is_empty() {
        return;
    }
    buffer.push_str(" (");
    buffer.push_str(endpoint);
    if let Some(resource_id) = resource_id {
        buffer.push_str(" @ ");
        buffer.push_str(resource_id);
    }
    buffer.push(')');
}
