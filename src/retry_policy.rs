//! Retry policy for failed deliveries.
//!
//! Implements exponential backoff with configurable parameters.

use std::time::Duration;

use crate::config::PubSubSettings;
use crate::notifications::NotificationError;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Cap for exponential growth, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: f64,
}

impl RetryPolicy {
    pub fn new(settings: &PubSubSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay_ms: settings.base_delay_ms,
            max_delay_ms: settings.max_delay_ms,
            backoff_factor: settings.backoff_factor,
        }
    }

    /// Fixed delay between retries.
    pub fn fixed(max_retries: u32, delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            backoff_factor: 1.0,
        }
    }

    /// Backoff before retry number `retry_count` (0-based):
    /// `base_delay * factor^retry_count`, capped at `max_delay_ms`.
    pub fn backoff_ms(&self, retry_count: u32) -> u64 {
        let backoff = self.base_delay_ms as f64 * self.backoff_factor.powi(retry_count as i32);
        backoff.min(self.max_delay_ms as f64) as u64
    }

    pub fn backoff(&self, retry_count: u32) -> Duration {
        Duration::from_millis(self.backoff_ms(retry_count))
    }

    /// Check if an error should be retried given the number of retries already made.
    pub fn should_retry(&self, error: &NotificationError, retry_count: u32) -> bool {
        error.is_retryable() && retry_count < self.max_retries
    }

    /// Total attempts allowed, first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&PubSubSettings::default())
    }
}
