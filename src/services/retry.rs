//! Retry policy for transient handler failures.
//!
//! Backoff doubles with each retry, starting at `initial_backoff` and capped
//! at `max_backoff`. No jitter is applied, so delays are reproducible.

use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::Duration;

use crate::domain::errors::HandlerError;
use crate::domain::models::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    /// `max_attempts` counts every attempt, the first one included. Zero is
    /// treated as one.
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    /// Single attempt, never retried.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether attempt number `attempt` (1-based) may be followed by another.
    pub fn should_retry(&self, error: &HandlerError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }

    /// Fresh delay schedule for one command.
    pub fn schedule(&self) -> BackoffSchedule {
        BackoffSchedule {
            inner: ExponentialBackoffBuilder::new()
                .with_initial_interval(self.initial_backoff)
                .with_max_interval(self.max_backoff)
                .with_multiplier(2.0)
                .with_randomization_factor(0.0)
                .with_max_elapsed_time(None)
                .build(),
            max_backoff: self.max_backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Successive retry delays for one command.
#[derive(Debug)]
pub struct BackoffSchedule {
    inner: ExponentialBackoff,
    max_backoff: Duration,
}

impl BackoffSchedule {
    pub fn next_delay(&mut self) -> Duration {
        self.inner.next_backoff().unwrap_or(self.max_backoff)
    }
}
