//! Bounded retry and polling helpers.
//!
//! Two shapes are used against the fiscal backend:
//! - `RetryPolicy`: idempotent reads, each attempt bounded by its own
//!   exponentially growing timeout
//! - `poll_until`: fixed-interval confirmation polling (shift opened, receipt
//!   signed, shift closed) that returns an explicit outcome instead of failing
//!   from inside the loop

use std::future::Future;
use std::time::Duration;

use crate::core::config;

/// Per-attempt timeout schedule for idempotent reads.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts (not retries)
    pub max_attempts: u32,
    /// Timeout of the first attempt
    pub initial_timeout: Duration,
    /// Growth factor of the timeout per attempt
    pub backoff_multiplier: f64,
    /// Pause between failed attempts
    pub pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_timeout: Duration::from_millis(500),
            backoff_multiplier: 1.5,
            pause: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the total number of attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the timeout of the first attempt.
    #[must_use]
    pub fn initial_timeout(mut self, timeout: Duration) -> Self {
        self.initial_timeout = timeout;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the pause between attempts.
    #[must_use]
    pub fn pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Timeout for a zero-based attempt number: `initial × multiplier^attempt`.
    pub fn timeout_for_attempt(&self, attempt: u32) -> Duration {
        let secs = self.initial_timeout.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(secs)
    }
}

/// Outcome of a bounded polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T, S> {
    /// The predicate accepted a probe result
    Ready(T),
    /// Attempts exhausted; carries the last observed state, if any
    TimedOut { attempts: u32, last: Option<S> },
}

/// What a single probe observed.
#[derive(Debug)]
pub enum Probe<T, S> {
    /// Terminal state reached
    Done(T),
    /// Not there yet; keep the observation for diagnostics
    Pending(S),
    /// Probe failed or returned garbage; try again
    Unknown,
}

/// Fixed-interval polling schedule.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub attempts: u32,
    pub interval: Duration,
}

impl PollConfig {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Shift open/close confirmation: 60 × 1s.
    pub fn shift() -> Self {
        Self::new(config::polling::SHIFT_ATTEMPTS, config::polling::interval())
    }

    /// Receipt signing confirmation: 10 × 1s.
    pub fn receipt() -> Self {
        Self::new(config::polling::RECEIPT_ATTEMPTS, config::polling::interval())
    }
}

/// Calls `probe` until it reports `Done` or the attempts run out.
///
/// Sleeps `interval` between unsuccessful probes.
pub async fn poll_until<F, Fut, T, S>(config: PollConfig, mut probe: F) -> PollOutcome<T, S>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe<T, S>>,
{
    let mut last = None;

    for attempt in 1..=config.attempts {
        match probe().await {
            Probe::Done(value) => return PollOutcome::Ready(value),
            Probe::Pending(state) => last = Some(state),
            Probe::Unknown => {}
        }

        if attempt < config.attempts {
            tokio::time::sleep(config.interval).await;
        }
    }

    PollOutcome::TimedOut {
        attempts: config.attempts,
        last,
    }
}
