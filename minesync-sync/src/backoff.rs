//! Exponential retry delay, tracked per user.

use crate::config::SyncConfig;
use std::time::Duration;

/// Multiplicative backoff that grows on each failure and resets on success.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    failures: u32,
    initial_ms: u64,
    max_ms: u64,
    multiplier: f64,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let initial_ms = initial.as_millis() as u64;
        Self {
            failures: 0,
            initial_ms,
            max_ms: (max.as_millis() as u64).max(initial_ms),
            multiplier: if multiplier.is_finite() && multiplier >= 1.0 {
                multiplier
            } else {
                1.0
            },
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            config.backoff_multiplier,
        )
    }

    /// Counts a failure and returns the wait before the next retry.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.current()
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn current(&self) -> Duration {
        self.delay_for(self.failures)
    }

    /// Delay before retry `n` (1-based) starting from a reset state:
    /// `min(initial * multiplier^n, max)`.
    pub fn delay_for(&self, n: u32) -> Duration {
        let exponent = i32::try_from(n).unwrap_or(i32::MAX);
        let grown = self.initial_ms as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(grown.min(self.max_ms as f64) as u64)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
