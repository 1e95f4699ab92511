//! # Exponential Backoff
//!
//! Per-item exponential backoff used by [`WorkQueue::add_rate_limited`](crate::WorkQueue::add_rate_limited).
//!
//! The delay doubles with every requeue of the same key and is capped at an
//! upper bound. Sequence with the default settings:
//! 5ms, 10ms, 20ms, 40ms, ... 1000s (max).

use std::time::Duration;

/// Default delay for the first requeue of a key.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Default upper bound for any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Exponential backoff calculator
///
/// Stateless: the requeue count is tracked per key by the queue, this type only
/// maps a count to a delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// Delay for requeue count 0
    base: Duration,
    /// Cap applied to every delay
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given base delay and cap.
    ///
    /// # Arguments
    ///
    /// * `base` - Delay returned for the first requeue (count 0)
    /// * `max` - Maximum delay; later requeues never wait longer than this
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Base delay
    #[must_use]
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Maximum delay
    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Calculate the delay for a key that has already been requeued `requeues` times.
    ///
    /// Returns `base * 2^requeues`, capped at `max`. Overflow saturates to `max`.
    #[must_use]
    pub fn delay_for(&self, requeues: u32) -> Duration {
        2u32.checked_pow(requeues)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}
