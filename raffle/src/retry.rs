//! Bounded polling.
//!
//! Every wait in the controller goes through [`wait_until`]: a condition is
//! polled on a schedule described by a [`RetryPolicy`] and the wait gives
//! up after `max_attempts` polls.

use tokio::time::{Duration, sleep};
use tracing::trace;

/// Polling schedule with a declared attempt bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of polls.
    pub max_attempts: u32,
    /// Delay after the first failed poll.
    pub interval: Duration,
    /// Multiplier applied to the delay after every failed poll.
    pub backoff_multiplier: f64,
    /// Upper bound for a single delay.
    pub max_interval: Duration,
}

impl RetryPolicy {
    /// Fixed interval polling.
    #[must_use]
    pub const fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            interval,
            backoff_multiplier: 1.0,
            max_interval: interval,
        }
    }

    /// Grow the delay by `multiplier` after every poll, capped at `max_interval`.
    #[must_use]
    pub const fn with_backoff(mut self, multiplier: f64, max_interval: Duration) -> Self {
        self.backoff_multiplier = multiplier;
        self.max_interval = max_interval;
        self
    }

    /// Delay after poll number `attempt` (0-indexed) failed.
    #[must_use]
    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        self.interval.mul_f64(factor).min(self.max_interval)
    }

    /// Worst-case total time spent sleeping.
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }
}

/// The condition never held within the policy bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("condition not met after {attempts} attempts")]
pub struct WaitTimeout {
    /// Polls made.
    pub attempts: u32,
}

/// Poll `ready` until it returns `true` or the policy is exhausted.
///
/// Returns the number of polls it took.
pub async fn wait_until<F>(policy: &RetryPolicy, mut ready: F) -> Result<u32, WaitTimeout>
where
    F: FnMut() -> bool,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 0..attempts {
        if ready() {
            return Ok(attempt + 1);
        }
        if attempt + 1 < attempts {
            let delay = policy.delay_for_attempt(attempt);
            trace!(attempt, ?delay, "condition not met, polling again");
            sleep(delay).await;
        }
    }
    Err(WaitTimeout { attempts })
}
