//! Backup orchestration
//!
//! A run has two phases:
//!
//! 1. **Global phase**: every enabled global endpoint is listed (and
//!    optionally enriched with detail calls) under the endpoint ceiling.
//! 2. **Resource phase**: resource IDs discovered in phase one are frozen,
//!    then every `(resource, resource endpoint)` pair is fetched under the
//!    resource ceiling.
//!
//! All fetches share one [`rate_limit::RateGovernor`] and the global API-call
//! ceiling. Failures below endpoint granularity are recorded in the
//! [`RunSummary`]; only authentication failures and cancellation stop a run.

use crate::config::ConfigError;
use crate::fetcher::AuthError;

pub mod discovery;
pub mod executor;
pub mod limits;
pub mod rate_limit;
pub mod retry;
pub mod summary;

pub use discovery::{FrozenResources, ResourceIdRule, ResourceRegistry};
pub use executor::BackupExecutor;
pub use limits::{ConcurrencyLimits, ConcurrencyScope, ConcurrencySlot};
pub use rate_limit::{RateGovernor, RateLimitError};
pub use retry::{RetryDecision, RetryPolicy};
pub use summary::{FailureKind, FailureRecord, RunOutcome, RunSummary};

/// Errors raised while setting up a run
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Configuration rejected
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No usable credentials
    #[error("authentication setup failed: {0}")]
    Auth(#[from] AuthError),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    HttpClient(String),
}
