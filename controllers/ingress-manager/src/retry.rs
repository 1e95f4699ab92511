//! Retry policy for failed syncs.
//!
//! A failed key is requeued with exponential backoff while its requeue count is
//! within the bound. Past the bound it is reported and forgotten: nothing
//! retries it again until a new watch event enqueues it.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use std::sync::Arc;
use tracing::{error, warn};
use workqueue::WorkQueue;

/// Default retry bound
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Sink for keys the controller gives up on.
pub trait ErrorReporter: Send + Sync {
    /// Called once when `key` is dropped because of `error`.
    fn report(&self, key: &str, error: &ControllerError);
}

/// Reports dropped keys to the log and the `abandoned_total` counter.
pub struct TracingErrorReporter {
    metrics: Metrics,
}

impl TracingErrorReporter {
    /// Creates a reporter counting into `metrics`.
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }
}

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, key: &str, error: &ControllerError) {
        self.metrics.abandoned.inc();
        error!("Dropping {} out of the queue: {}", key, error);
    }
}

/// What the policy did with a failed key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeued with backoff
    Requeued,
    /// Retry bound exceeded; reported and forgotten
    Abandoned,
    /// Not retryable; reported and forgotten
    Dropped,
}

/// Bounded exponential-backoff retry.
pub struct RetryPolicy {
    max_retries: u32,
    reporter: Arc<dyn ErrorReporter>,
}

impl RetryPolicy {
    /// Creates a policy allowing `max_retries` requeues beyond the first failure.
    pub fn new(max_retries: u32, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            max_retries,
            reporter,
        }
    }

    /// Retry bound
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Handles a failed sync of `key`.
    pub fn handle_error(&self, queue: &WorkQueue, key: &str, err: &ControllerError) -> RetryDecision {
        if err.is_malformed_key() {
            self.reporter.report(key, err);
            queue.forget(key);
            return RetryDecision::Dropped;
        }

        let requeues = queue.num_requeues(key);
        if requeues <= self.max_retries {
            warn!("Error syncing {} (attempt {}): {}", key, requeues + 1, err);
            queue.add_rate_limited(key);
            return RetryDecision::Requeued;
        }

        self.reporter.report(key, err);
        queue.forget(key);
        RetryDecision::Abandoned
    }
}
