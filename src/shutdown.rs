//! Run-level cancellation.
//!
//! A [`ShutdownCoordinator`] is shared by every task of a backup run. Ctrl+C,
//! the run deadline and fatal authentication failures all resolve to the same
//! signal; the first reason recorded wins and is reported in the run summary.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Why a run was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    /// Ctrl+C or an explicit abort from the caller
    Interrupted,
    /// The configured run deadline elapsed
    DeadlineExceeded,
    /// Credentials were rejected even after a token refresh
    AuthenticationFailed,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShutdownReason::Interrupted => "interrupted",
            ShutdownReason::DeadlineExceeded => "run deadline exceeded",
            ShutdownReason::AuthenticationFailed => "authentication failed",
        };
        f.write_str(s)
    }
}

/// Returned by [`ShutdownCoordinator::run_until_shutdown`] when the signal wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled(pub ShutdownReason);

/// Coordinates cancellation across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    reason: OnceCell<ShutdownReason>,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self {
            is_shutdown: AtomicBool::new(false),
            reason: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown as an interruption.
    pub fn request_shutdown(&self) {
        self.request_shutdown_with(ShutdownReason::Interrupted);
    }

    /// Request shutdown with an explicit reason. Only the first call has any effect.
    pub fn request_shutdown_with(&self, reason: ShutdownReason) {
        let _ = self.reason.set(reason);
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// The reason recorded by the first shutdown request, if any.
    pub fn reason(&self) -> Option<ShutdownReason> {
        if self.is_shutdown_requested() {
            self.reason.get().copied()
        } else {
            None
        }
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        // Register interest before checking the flag so a request landing in
        // between is not missed.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }

    /// Drive `fut` to completion unless shutdown is requested first.
    pub async fn run_until_shutdown<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        if let Some(reason) = self.reason() {
            return Err(Cancelled(reason));
        }
        tokio::select! {
            biased;
            _ = self.wait_for_shutdown() => {
                Err(Cancelled(self.reason().unwrap_or(ShutdownReason::Interrupted)))
            }
            output = fut => Ok(output),
        }
    }

    /// Arm a timer that requests shutdown with [`ShutdownReason::DeadlineExceeded`].
    ///
    /// The returned handle can be aborted once the run finishes.
    pub fn arm_deadline(self: &Arc<Self>, after: Duration) -> JoinHandle<()> {
        let handle = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => {
                    tracing::warn!(deadline_secs = after.as_secs(), "Run deadline reached - cancelling outstanding work");
                    handle.request_shutdown_with(ShutdownReason::DeadlineExceeded);
                }
                _ = handle.wait_for_shutdown() => {}
            }
        })
    }
}
