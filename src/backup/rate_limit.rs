//! Rate governor
//!
//! A single token bucket shared by every fetch of a run. Tokens refill
//! continuously at `requests_per_minute / 60` per second up to `burst_size`.
//! A throttling signal from the server halves (by default) the refill rate
//! for a cool-down window; repeated signals extend the window without
//! compounding the penalty.

use crate::config::RateLimitConfig;
use crate::shutdown::{SharedShutdown, ShutdownReason};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

const TOKEN_EPSILON: f64 = 1e-9;

/// Rate governor errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RateLimitError {
    /// Waiting for tokens would run past the run deadline
    #[error("rate budget wait of {wait:?} exceeds the run deadline")]
    RateTimeout {
        /// Wait that would have been needed
        wait: Duration,
    },

    /// Run was cancelled while waiting
    #[error("rate governor wait cancelled: {0}")]
    Cancelled(ShutdownReason),

    /// Requested weight can never be satisfied
    #[error("weight {weight} exceeds burst size {burst}")]
    WeightExceedsBurst {
        /// Requested weight
        weight: u32,
        /// Configured bucket capacity
        burst: u32,
    },
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    penalty_until: Option<Instant>,
}

/// Shared token-bucket limiter with adaptive throttling
#[derive(Debug)]
pub struct RateGovernor {
    rate_per_sec: f64,
    burst: u32,
    penalty: f64,
    cooldown: Duration,
    state: Mutex<BucketState>,
    throttle_events: AtomicU64,
    deadline: Option<Instant>,
    shutdown: Option<SharedShutdown>,
}

impl RateGovernor {
    /// Create a governor with a full bucket
    ///
    /// # Arguments
    /// * `requests_per_minute` - Baseline refill rate
    /// * `burst` - Bucket capacity
    pub fn new(requests_per_minute: u32, burst: u32) -> Self {
        Self {
            rate_per_sec: f64::from(requests_per_minute.max(1)) / 60.0,
            burst: burst.max(1),
            penalty: 0.5,
            cooldown: Duration::from_secs(60),
            state: Mutex::new(BucketState {
                tokens: f64::from(burst.max(1)),
                last_refill: Instant::now(),
                penalty_until: None,
            }),
            throttle_events: AtomicU64::new(0),
            deadline: None,
            shutdown: None,
        }
    }

    /// Create a governor from configuration
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_minute, config.burst_size)
            .with_throttle_penalty(config.throttle_penalty, config.throttle_cooldown())
    }

    /// Set the throttling multiplier and cool-down window
    pub fn with_throttle_penalty(mut self, penalty: f64, cooldown: Duration) -> Self {
        self.penalty = penalty.clamp(f64::MIN_POSITIVE, 1.0);
        self.cooldown = cooldown;
        self
    }

    /// Refuse waits that would end after `deadline`
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Abort waits when the run is cancelled
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Wait until `weight` tokens are available, then debit them
    pub async fn acquire(&self, weight: u32) -> Result<(), RateLimitError> {
        if weight > self.burst {
            return Err(RateLimitError::WeightExceedsBurst {
                weight,
                burst: self.burst,
            });
        }

        let started = Instant::now();
        let needed = f64::from(weight);
        loop {
            if let Some(reason) = self.shutdown.as_ref().and_then(|s| s.reason()) {
                return Err(RateLimitError::Cancelled(reason));
            }

            let wait = {
                let mut state = self.lock_state();
                let now = Instant::now();
                self.refill(&mut state, now);
                if state.tokens + TOKEN_EPSILON >= needed {
                    state.tokens = (state.tokens - needed).max(0.0);
                    None
                } else {
                    Some(self.time_to_accrue(&state, needed - state.tokens, now))
                }
            };

            let Some(wait) = wait else {
                let waited = started.elapsed();
                if waited > Duration::ZERO {
                    crate::metrics::record_rate_wait(waited);
                }
                return Ok(());
            };

            if let Some(deadline) = self.deadline {
                if Instant::now() + wait > deadline {
                    return Err(RateLimitError::RateTimeout { wait });
                }
            }

            debug!(weight, wait_ms = wait.as_millis(), "Waiting for rate budget");
            match &self.shutdown {
                Some(shutdown) => {
                    tokio::select! {
                        _ = sleep(wait) => {}
                        _ = shutdown.wait_for_shutdown() => {
                            let reason = shutdown.reason().unwrap_or(ShutdownReason::Interrupted);
                            return Err(RateLimitError::Cancelled(reason));
                        }
                    }
                }
                None => sleep(wait).await,
            }
        }
    }

    /// Signal that the server answered with a throttling response
    pub fn report_throttled(&self) {
        let mut state = self.lock_state();
        let now = Instant::now();
        self.refill(&mut state, now);
        state.penalty_until = Some(now + self.cooldown);
        let events = self.throttle_events.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            penalty = self.penalty,
            cooldown_secs = self.cooldown.as_secs(),
            events,
            "Server throttling reported - reducing request rate"
        );
    }

    /// Current refill rate in requests per minute
    pub fn effective_rate_per_minute(&self) -> f64 {
        let state = self.lock_state();
        let now = Instant::now();
        self.rate_at(&state, now) * 60.0
    }

    /// Tokens available right now
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.lock_state();
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    /// Throttling signals received so far
    pub fn throttle_events(&self) -> u64 {
        self.throttle_events.load(Ordering::Relaxed)
    }

    /// Configured bucket capacity
    pub fn burst(&self) -> u32 {
        self.burst
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BucketState> {
        // A poisoned lock only means another holder panicked mid-update; the
        // bucket fields are still plain numbers.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn rate_at(&self, state: &BucketState, now: Instant) -> f64 {
        match state.penalty_until {
            Some(until) if now < until => self.rate_per_sec * self.penalty,
            _ => self.rate_per_sec,
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        if now <= state.last_refill {
            return;
        }
        let full = self.rate_per_sec;
        let reduced = self.rate_per_sec * self.penalty;

        let gained = match state.penalty_until {
            Some(until) if now <= until => (now - state.last_refill).as_secs_f64() * reduced,
            Some(until) if state.last_refill < until => {
                state.penalty_until = None;
                (until - state.last_refill).as_secs_f64() * reduced
                    + (now - until).as_secs_f64() * full
            }
            Some(_) => {
                state.penalty_until = None;
                (now - state.last_refill).as_secs_f64() * full
            }
            None => (now - state.last_refill).as_secs_f64() * full,
        };

        state.tokens = (state.tokens + gained).min(f64::from(self.burst));
        state.last_refill = now;
    }

    fn time_to_accrue(&self, state: &BucketState, deficit: f64, now: Instant) -> Duration {
        let full = self.rate_per_sec;
        let reduced = self.rate_per_sec * self.penalty;

        let secs = match state.penalty_until {
            Some(until) if now < until => {
                let window = (until - now).as_secs_f64();
                let during_penalty = window * reduced;
                if during_penalty >= deficit {
                    deficit / reduced
                } else {
                    window + (deficit - during_penalty) / full
                }
            }
            _ => deficit / full,
        };
        Duration::from_secs_f64(secs.max(0.0))
    }
}
