//! Retry and backoff policy
//!
//! Pure decision logic: given the outcome of a failed attempt and how many
//! failures the request has seen, decide whether to try again and how long
//! to wait. The caller performs the wait and, for throttled retries, informs
//! the rate governor.

use crate::config::RetryConfig;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::fmt;
use std::time::Duration;

/// Outcome of a failed HTTP attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Transport-level failure (connect, timeout, reset, body read)
    Network {
        /// Error text
        message: String,
    },
    /// Non-success HTTP status
    Http {
        /// Status code
        status: u16,
        /// Parsed `Retry-After` hint
        retry_after: Option<Duration>,
    },
}

impl FailureOutcome {
    /// HTTP status, when the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            FailureOutcome::Http { status, .. } => Some(*status),
            FailureOutcome::Network { .. } => None,
        }
    }
}

impl fmt::Display for FailureOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureOutcome::Network { message } => write!(f, "network error: {message}"),
            FailureOutcome::Http { status, .. } => write!(f, "HTTP {status}"),
        }
    }
}

/// Why the policy stopped retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// Retryable failure, but the retry budget is spent
    Exhausted {
        /// Failures seen, including the last one
        attempts: u32,
    },
    /// Status that retrying cannot fix
    NonRetryable {
        /// Status code
        status: u16,
    },
}

impl fmt::Display for GiveUpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GiveUpReason::Exhausted { attempts } => {
                write!(f, "retries exhausted after {attempts} failed attempts")
            }
            GiveUpReason::NonRetryable { status } => write!(f, "non-retryable status {status}"),
        }
    }
}

/// Decision returned for a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `after`, then re-issue the request
    Retry {
        /// Delay before the next attempt
        after: Duration,
        /// Server throttling caused this retry
        throttled: bool,
    },
    /// Surface the failure
    GiveUp(GiveUpReason),
}

/// Exponential backoff with jitter, `Retry-After` aware
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: Duration,
    max_throttle_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Create a policy from configuration
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
            max_throttle_delay: Duration::from_secs(config.max_throttle_delay_secs),
        }
    }

    /// Override the jitter bound
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Override the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override base and cap of the exponential delay
    pub fn with_delays(mut self, base: Duration, cap: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = cap.max(base);
        self
    }

    /// Retries allowed after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decide what to do after the `failures`-th failed attempt (1-based)
    pub fn decide(&self, outcome: &FailureOutcome, failures: u32) -> RetryDecision {
        let throttled = match outcome {
            FailureOutcome::Network { .. } => false,
            FailureOutcome::Http { status: 429, .. } => true,
            FailureOutcome::Http { status, .. } if (500..=599).contains(status) => false,
            FailureOutcome::Http { status, .. } => {
                return RetryDecision::GiveUp(GiveUpReason::NonRetryable { status: *status });
            }
        };

        if failures > self.max_retries {
            return RetryDecision::GiveUp(GiveUpReason::Exhausted { attempts: failures });
        }

        let mut after = self.backoff_delay(failures);
        if let FailureOutcome::Http {
            retry_after: Some(hint),
            ..
        } = outcome
        {
            after = after.max((*hint).min(self.max_throttle_delay));
        }

        RetryDecision::Retry {
            after: after + self.jitter_sample(),
            throttled,
        }
    }

    /// Delay before the retry following the `failures`-th failure, without jitter
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn jitter_sample(&self) -> Duration {
        let bound = self.jitter.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=bound))
    }
}

/// Parse a `Retry-After` header value (delta-seconds or HTTP date)
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - Utc::now()).to_std().ok().or(Some(Duration::ZERO))
}
