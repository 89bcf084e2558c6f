//! # Retry Policy
//!
//! Exponential backoff between handler attempts. Attempt `n` (zero-based,
//! the context's `retry_count`) that fails is followed by a wait of
//! `initial_backoff * multiplier^n`, capped at `max_backoff`.

use std::time::Duration;

/// Per-handler retry budget and backoff curve.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. A handler runs at most `max_retries + 1` times.
    pub max_retries: u32,
    /// Wait after the first failed attempt.
    pub initial_backoff: Duration,
    /// Growth factor per further attempt.
    pub multiplier: f64,
    /// Upper bound for any single wait.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Default number of retries.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Policy with a fixed retry count and no meaningful wait, for tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            multiplier: 1.0,
            max_backoff: Duration::from_millis(1),
        }
    }

    /// Whether a failed attempt with this `retry_count` gets another try.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Wait after the attempt with this `retry_count` failed.
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_backoff
        }
    }

    /// Total attempts a handler can receive for one delivery.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Self::DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(5),
        }
    }
}
