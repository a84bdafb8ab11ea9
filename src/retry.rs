//! Retry policies.
//!
//! A retryer is cloned per invocation so its attempt counter is per-call.
//! On each retryable failure the pipeline asks it to continue (yielding the
//! interval to sleep) or to propagate the error.

use std::time::{Duration, SystemTime};

use crate::error::Error;

/// Per-invocation retry state machine.
pub trait Retryer: Send + Sync {
    /// Decide whether to retry after `error`.
    ///
    /// Returns the interval to sleep before the next attempt, or the error
    /// itself (propagated) when the policy is exhausted.
    ///
    /// # Errors
    /// The original `error` once attempts are used up.
    fn continue_or_propagate(&mut self, error: Error) -> Result<Duration, Error>;

    /// Fresh copy with reset per-call state.
    fn clone_boxed(&self) -> Box<dyn Retryer>;
}

/// Exponential backoff: `period * 1.5^(attempt - 1)` clamped to the maximum
/// period, unless the error carries an explicit retry deadline.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    period: Duration,
    max_period: Duration,
    max_attempts: u32,
    attempt: u32,
    slept_for: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(1), 5)
    }
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(period: Duration, max_period: Duration, max_attempts: u32) -> Self {
        Self {
            period,
            max_period,
            max_attempts,
            attempt: 1,
            slept_for: Duration::ZERO,
        }
    }

    /// The attempt about to run (starts at 1).
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Total time spent sleeping between attempts.
    #[must_use]
    pub fn slept_for(&self) -> Duration {
        self.slept_for
    }

    fn next_interval(&self) -> Duration {
        let millis = self.period.as_millis() as f64 * 1.5f64.powi(self.attempt as i32 - 1);
        Duration::from_millis(millis as u64).min(self.max_period)
    }

    fn interval_until(&self, deadline: SystemTime) -> Duration {
        deadline
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
            .min(self.max_period)
    }
}

impl Retryer for ExponentialBackoff {
    fn continue_or_propagate(&mut self, error: Error) -> Result<Duration, Error> {
        if self.attempt >= self.max_attempts {
            return Err(error);
        }
        // the interval formula reads the incremented attempt number
        self.attempt += 1;

        let retry_after = match &error {
            Error::Retryable(retryable) => retryable.retry_after(),
            _ => None,
        };
        let interval = match retry_after {
            Some(deadline) => self.interval_until(deadline),
            None => self.next_interval(),
        };

        self.slept_for += interval;
        Ok(interval)
    }

    fn clone_boxed(&self) -> Box<dyn Retryer> {
        Box::new(Self::new(self.period, self.max_period, self.max_attempts))
    }
}

/// Policy that never retries; a zero-state singleton.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl Retryer for NeverRetry {
    fn continue_or_propagate(&mut self, error: Error) -> Result<Duration, Error> {
        Err(error)
    }

    fn clone_boxed(&self) -> Box<dyn Retryer> {
        Box::new(Self)
    }
}
