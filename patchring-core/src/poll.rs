//! Cooperative wait loop used by every "wait until ..." step.
//!
//! Time is behind the [`Clock`] trait so tests can run the loops without
//! sleeping. The default [`PollPolicy`] polls at a fixed interval forever;
//! the optional `[Polling]` settings bound the number of attempts, grow
//! the interval and make a remote `Failed` status terminal.

use crate::error::{ApiError, PollError};

use async_trait::async_trait;
use patchring_config::{DEFAULT_MAX_BACKOFF_INTERVAL, PollingConfig};
use std::{
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{debug, info};

/// Interval between scan / deployment completion polls.
pub const COMPLETION_POLL_INTERVAL: Duration = Duration::from_secs(30);
/// Interval between polls waiting for a deployment to become inspectable.
pub const READY_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Interval between SQL endpoint probes before powering servers on.
pub const SQL_PROBE_INTERVAL: Duration = Duration::from_secs(15);

/// Source of delays for the wait loops.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Wait for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Real time, via `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Test utility: a clock that returns immediately and remembers every
/// requested sleep.
///
/// Lets the wait loops be driven to completion without real delays, then
/// asserts on the intervals they asked for. Not meant for production runs.
#[derive(Debug, Default, Clone)]
pub struct RecordingClock {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingClock {
    /// Clock with no sleeps recorded yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every duration passed to [`Clock::sleep`] so far, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }
}

/// How a single wait paces and bounds its polls.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Delay after the first unsuccessful poll.
    pub interval: Duration,
    /// `None` polls until the terminal condition is observed.
    pub max_attempts: Option<u32>,
    /// Growth of the delay per attempt; 1.0 keeps it fixed.
    pub backoff_factor: f64,
    /// Upper bound on the delay.
    pub max_interval: Option<Duration>,
    /// End the wait when the probe reports [`Probe::Failed`].
    pub stop_on_failure: bool,
}

impl PollPolicy {
    /// Poll forever every `interval`.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            backoff_factor: 1.0,
            max_interval: None,
            stop_on_failure: false,
        }
    }

    /// Apply the `[Polling]` overrides on top of a fixed interval.
    pub fn with_settings(mut self, settings: &PollingConfig) -> Self {
        self.max_attempts = settings.max_attempts;
        self.backoff_factor = settings.backoff_factor;
        self.max_interval = settings.max_interval;
        self.stop_on_failure = settings.stop_on_failure;
        self
    }

    /// Delay after the `attempt`-th unsuccessful poll (1-based).
    ///
    /// A growing delay is always bounded: by `max_interval` when set,
    /// otherwise by [`DEFAULT_MAX_BACKOFF_INTERVAL`].
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.backoff_factor <= 1.0 {
            return self.max_interval.map_or(self.interval, |cap| self.interval.min(cap));
        }
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.interval.as_secs_f64() * self.backoff_factor.powi(exponent);
        let delay = Duration::try_from_secs_f64(scaled).unwrap_or(Duration::MAX);
        delay.min(self.max_interval.unwrap_or(DEFAULT_MAX_BACKOFF_INTERVAL))
    }
}

/// Result of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// The awaited condition holds.
    Done,
    /// Not there yet; poll again.
    Pending,
    /// The remote operation reported failure.
    Failed,
}

/// Runs a probe under a [`PollPolicy`], sleeping on a [`Clock`].
pub struct Poller<'a> {
    clock: &'a dyn Clock,
    policy: PollPolicy,
}

impl<'a> Poller<'a> {
    /// Poller sleeping on `clock` between attempts.
    pub fn new(clock: &'a dyn Clock, policy: PollPolicy) -> Self {
        Self { clock, policy }
    }

    /// Policy this poller applies.
    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Call `probe` until it reports [`Probe::Done`], sleeping between
    /// attempts. Returns the number of polls made.
    ///
    /// `label` only names the wait in logs and errors.
    pub async fn run<F, Fut>(&self, label: &str, mut probe: F) -> Result<u32, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe, ApiError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match probe().await? {
                Probe::Done => {
                    info!(label, attempts = attempt, "wait finished");
                    return Ok(attempt);
                }
                Probe::Failed if self.policy.stop_on_failure => {
                    return Err(PollError::OperationFailed {
                        label: label.to_string(),
                    });
                }
                Probe::Failed | Probe::Pending => {}
            }

            if let Some(max) = self.policy.max_attempts
                && attempt >= max
            {
                return Err(PollError::Exhausted {
                    label: label.to_string(),
                    attempts: attempt,
                });
            }

            let delay = self.policy.delay_after(attempt);
            debug!(label, attempt, "not finished yet");
            self.clock.sleep(delay).await;
            info!(
                label,
                waited_secs = delay.as_secs(),
                "waited before checking again whether the operation finished"
            );
        }
    }
}

impl std::fmt::Debug for Poller<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
