//! Bounded waits and politeness delays.
//!
//! Every point in the pipeline that waits on something external goes through
//! one of two primitives: [`WaitPolicy::poll_until`] for "poll until a probe
//! reports ready" and [`DelayRange::sample`] for jittered sleeps between
//! requests. Nothing in the crate waits unboundedly.

use std::future::Future;
use std::time::Duration;

/// A cooldown window plus a retry ceiling. The building block for every
/// bounded wait: total time never exceeds roughly `cooldown * max_retries`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Length of one polling window.
    pub cooldown: Duration,
    /// Maximum number of windows before giving up.
    pub max_retries: u32,
}

impl WaitPolicy {
    pub const fn new(cooldown: Duration, max_retries: u32) -> Self {
        Self {
            cooldown,
            max_retries,
        }
    }

    /// Upper bound on the total time a wait under this policy can take.
    pub fn budget(&self) -> Duration {
        self.cooldown * self.max_retries
    }

    /// Runs `probe` up to `max_retries` times with one cooldown between
    /// attempts. Returns true as soon as the probe does, false once the
    /// ceiling is hit.
    pub async fn poll_until<F, Fut>(&self, mut probe: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for attempt in 1..=self.max_retries {
            if probe().await {
                return true;
            }
            if attempt < self.max_retries {
                tokio::time::sleep(self.cooldown).await;
            }
        }
        false
    }
}

/// Uniformly sampled delay range, in whole seconds at the ends but with
/// sub-second jitter in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl DelayRange {
    pub const fn new(min_secs: u64, max_secs: u64) -> Self {
        Self { min_secs, max_secs }
    }

    pub fn sample(&self) -> Duration {
        if self.max_secs <= self.min_secs {
            return Duration::from_secs(self.min_secs);
        }
        let span = (self.max_secs - self.min_secs) as f64;
        Duration::from_secs_f64(self.min_secs as f64 + fastrand::f64() * span)
    }
}

/// Politeness schedule for the crawl loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Sampled before each unit of work.
    pub unit_delay: DelayRange,
    /// Take an extended break after this many completed units; 0 disables.
    pub break_every: usize,
    /// Length of the extended break.
    pub break_delay: DelayRange,
}

impl Pacing {
    /// No delays at all, for tests and dry runs.
    pub const fn none() -> Self {
        Self {
            unit_delay: DelayRange::new(0, 0),
            break_every: 0,
            break_delay: DelayRange::new(0, 0),
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            unit_delay: DelayRange::new(30, 90),
            break_every: 10,
            break_delay: DelayRange::new(180, 300),
        }
    }
}
