//! Worker pool.
//!
//! A fixed number of workers drain the work queue. A sync that panics is
//! handled like any other failed sync and goes through the retry policy. Each
//! worker loop runs in its own task under a supervisor that restarts it after
//! a cool-down if it ends for any other reason, until the stop signal is raised.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::SyncHandler;
use crate::retry::{RetryDecision, RetryPolicy};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use workqueue::WorkQueue;

/// Default number of workers
pub const DEFAULT_WORKERS: usize = 5;

/// Default cool-down before a worker loop is restarted
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(60);

/// Waits until `stop` is raised or its sender is dropped.
pub async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Calls `done` for a key when dropped, including during unwinding.
struct InFlight<'a> {
    queue: &'a WorkQueue,
    key: &'a str,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.queue.done(self.key);
    }
}

/// One queue consumer. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Worker {
    queue: WorkQueue,
    handler: Arc<dyn SyncHandler>,
    retry: Arc<RetryPolicy>,
    metrics: Metrics,
}

impl Worker {
    /// Creates a worker.
    pub fn new(
        queue: WorkQueue,
        handler: Arc<dyn SyncHandler>,
        retry: Arc<RetryPolicy>,
        metrics: Metrics,
    ) -> Self {
        Self {
            queue,
            handler,
            retry,
            metrics,
        }
    }

    /// Processes keys until the queue shuts down.
    pub async fn run(&self) {
        while self.process_next_item().await {}
    }

    /// Takes one key from the queue and syncs it.
    ///
    /// Returns `false` once the queue has shut down.
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        self.metrics.set_queue_depth(self.queue.len());
        {
            let _in_flight = InFlight {
                queue: &self.queue,
                key: &key,
            };
            self.process(&key).await;
        }
        // `done` may have requeued the key
        self.metrics.set_queue_depth(self.queue.len());
        true
    }

    async fn process(&self, key: &str) {
        let timer = self.metrics.reconcile_duration.start_timer();
        let result = AssertUnwindSafe(self.handler.sync(key))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(ControllerError::Panicked(panic_message(payload.as_ref()))));
        timer.observe_duration();

        match result {
            Ok(outcome) => {
                debug!("Synced {} ({})", key, outcome);
                self.metrics
                    .reconciliations
                    .with_label_values(&[outcome.as_str()])
                    .inc();
                self.queue.forget(key);
            }
            Err(e) => {
                self.metrics.reconciliations.with_label_values(&["error"]).inc();
                if self.retry.handle_error(&self.queue, key, &e) == RetryDecision::Requeued {
                    self.metrics.requeues.inc();
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Fixed-size pool of supervised workers.
pub struct WorkerPool {
    worker: Worker,
    workers: usize,
    restart_delay: Duration,
}

impl WorkerPool {
    /// Creates a pool of `workers` copies of `worker`.
    pub fn new(worker: Worker, workers: usize, restart_delay: Duration) -> Self {
        Self {
            worker,
            workers,
            restart_delay,
        }
    }

    /// Runs the workers until `stop` is raised, then shuts the queue down and
    /// waits for in-flight syncs to finish.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        info!("Starting {} workers", self.workers);
        let supervisors: Vec<_> = (0..self.workers)
            .map(|id| {
                tokio::spawn(supervise(
                    id,
                    self.worker.clone(),
                    self.restart_delay,
                    stop.clone(),
                ))
            })
            .collect();

        wait_for_stop(&mut stop).await;
        info!("Shutting down workers");
        self.worker.queue.shut_down();

        for result in join_all(supervisors).await {
            if let Err(e) = result {
                error!("Worker supervisor failed: {}", e);
            }
        }
        info!("All workers stopped");
    }
}

/// Keeps one worker loop running until `stop` is raised.
async fn supervise(
    id: usize,
    worker: Worker,
    restart_delay: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let run = worker.clone();
        match tokio::spawn(async move { run.run().await }).await {
            Ok(()) => debug!("Worker {} loop exited", id),
            Err(e) if e.is_panic() => error!("Worker {} panicked: {}", id, e),
            Err(e) => warn!("Worker {} loop cancelled: {}", id, e),
        }

        if *stop.borrow() {
            return;
        }
        tokio::select! {
            () = wait_for_stop(&mut stop) => return,
            () = tokio::time::sleep(restart_delay) => {
                info!("Restarting worker {}", id);
            }
        }
    }
}
