//! Rate-limited work queue.
//!
//! State lives behind a single mutex; waiting consumers are woken through a
//! [`Notify`]. Delayed keys are kept in a key -> next-eligible-time map and
//! promoted into the FIFO by whichever consumer next calls [`WorkQueue::get`].

use crate::backoff::ExponentialBackoff;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct State {
    /// Keys ready to be handed out, in order
    queue: VecDeque<String>,
    /// Keys that need processing (queued, or re-added while in flight)
    dirty: HashSet<String>,
    /// Keys currently handed out to a consumer
    processing: HashSet<String>,
    /// Delayed keys and the instant they become eligible
    waiting: HashMap<String, Instant>,
    /// Requeue count per key, drives the backoff
    requeues: HashMap<String, u32>,
    shutting_down: bool,
}

impl State {
    /// Marks `key` dirty and queues it unless it is already pending or in flight.
    ///
    /// Returns `true` when the key was pushed onto the FIFO.
    fn insert(&mut self, key: String) -> bool {
        if self.dirty.contains(&key) {
            return false;
        }
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            return false;
        }
        self.queue.push_back(key);
        true
    }

    fn promote_ready(&mut self, now: Instant) {
        let mut ready: Vec<(Instant, String)> = self
            .waiting
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, deadline)| (*deadline, key.clone()))
            .collect();
        if ready.is_empty() {
            return;
        }
        ready.sort();
        for (_, key) in ready {
            self.waiting.remove(&key);
            self.insert(key);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.waiting.values().min().copied()
    }
}

struct Inner {
    name: String,
    backoff: ExponentialBackoff,
    state: Mutex<State>,
    notify: Notify,
}

/// Deduplicating, delay-capable, rate-limited queue of string keys.
///
/// Cloning is cheap; all clones share the same queue.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl WorkQueue {
    /// Creates a queue with the default backoff (5ms doubling, capped at 1000s).
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_backoff(name, ExponentialBackoff::default())
    }

    /// Creates a queue with a custom backoff.
    pub fn with_backoff(name: impl Into<String>, backoff: ExponentialBackoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                backoff,
                state: Mutex::new(State::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Queue name, used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // State transitions never leave the maps half-updated, so a poisoned
        // lock is still consistent.
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a key. Duplicates of a pending key are collapsed; a key that is in
    /// flight is re-queued once `done` is called for it. Ignored after shutdown.
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let queued = {
            let mut state = self.lock();
            if state.shutting_down {
                trace!(queue = %self.inner.name, key = %key, "Ignoring add after shutdown");
                return;
            }
            state.waiting.remove(&key);
            state.insert(key)
        };
        if queued {
            self.inner.notify.notify_one();
        }
    }

    /// Adds a key once `delay` has elapsed.
    ///
    /// If the key is already waiting, the earlier of the two deadlines wins.
    pub fn add_after(&self, key: impl Into<String>, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let key = key.into();
        {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            let deadline = Instant::now() + delay;
            state
                .waiting
                .entry(key)
                .and_modify(|existing| *existing = (*existing).min(deadline))
                .or_insert(deadline);
        }
        // Sleeping consumers may be waiting on a later deadline.
        self.inner.notify.notify_waiters();
    }

    /// Re-adds a key after its backoff delay and bumps its requeue count.
    pub fn add_rate_limited(&self, key: impl Into<String>) {
        let key = key.into();
        let delay = {
            let mut state = self.lock();
            let requeues = state.requeues.entry(key.clone()).or_insert(0);
            let delay = self.inner.backoff.delay_for(*requeues);
            *requeues = requeues.saturating_add(1);
            delay
        };
        debug!(queue = %self.inner.name, key = %key, delay_ms = delay.as_millis(), "Requeueing with backoff");
        self.add_after(key, delay);
    }

    /// Number of times `key` has been requeued through `add_rate_limited`.
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.lock().requeues.get(key).copied().unwrap_or(0)
    }

    /// Resets the requeue count of `key`.
    pub fn forget(&self, key: &str) {
        self.lock().requeues.remove(key);
    }

    /// Waits for the next key.
    ///
    /// Returns `None` once the queue has been shut down and every queued key
    /// has been handed out.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.lock();
                state.promote_ready(Instant::now());
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
                state.next_deadline()
            };

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        () = notified.as_mut() => {}
                        () = time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Marks `key` as processed. Must be called exactly once per key returned by `get`.
    pub fn done(&self, key: &str) {
        let requeued = {
            let mut state = self.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) {
                state.queue.push_back(key.to_owned());
                true
            } else {
                false
            }
        };
        if requeued {
            self.inner.notify.notify_one();
        }
    }

    /// Stops accepting new keys and discards delayed ones. Queued keys still drain.
    pub fn shut_down(&self) {
        {
            let mut state = self.lock();
            state.shutting_down = true;
            state.waiting.clear();
        }
        debug!(queue = %self.inner.name, "Work queue shutting down");
        self.inner.notify.notify_waiters();
    }

    /// Whether `shut_down` has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of keys ready to be handed out.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether no key is ready to be handed out.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_queue() -> WorkQueue {
        WorkQueue::with_backoff(
            "test",
            ExponentialBackoff::new(Duration::from_millis(10), Duration::from_secs(1)),
        )
    }

    #[tokio::test]
    async fn test_add_collapses_duplicates() {
        let queue = fast_queue();
        queue.add("default/a");
        queue.add("default/a");
        queue.add("default/b");

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await.as_deref(), Some("default/a"));
        assert_eq!(queue.get().await.as_deref(), Some("default/b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_add_while_processing_is_replayed_on_done() {
        let queue = fast_queue();
        queue.add("default/a");
        let key = queue.get().await.expect("key");

        // In flight: re-adds collapse and are not handed out yet
        queue.add("default/a");
        queue.add("default/a");
        assert!(queue.is_empty());

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("default/a"));
        queue.done("default/a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_done_without_readd_does_not_requeue() {
        let queue = fast_queue();
        queue.add("default/a");
        let key = queue.get().await.expect("key");
        queue.done(&key);

        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_get_blocks_until_add() {
        let queue = fast_queue();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.add("default/late");

        assert_eq!(consumer.await.expect("join").as_deref(), Some("default/late"));
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_reports_closed() {
        let queue = fast_queue();
        queue.add("default/a");
        queue.add("default/b");
        queue.shut_down();

        // Adds after shutdown are ignored
        queue.add("default/c");

        assert_eq!(queue.get().await.as_deref(), Some("default/a"));
        assert_eq!(queue.get().await.as_deref(), Some("default/b"));
        assert_eq!(queue.get().await, None);
        assert!(queue.is_shutting_down());
    }

    #[tokio::test]
    async fn test_shutdown_wakes_blocked_consumers() {
        let queue = fast_queue();
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.get().await })
            })
            .collect();
        tokio::task::yield_now().await;
        queue.shut_down();

        for consumer in consumers {
            assert_eq!(consumer.await.expect("join"), None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_delays_key() {
        let queue = fast_queue();
        let start = Instant::now();
        queue.add_after("default/a", Duration::from_secs(5));
        assert!(queue.is_empty());

        assert_eq!(queue.get().await.as_deref(), Some("default/a"));
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_keeps_earliest_deadline() {
        let queue = fast_queue();
        let start = Instant::now();
        queue.add_after("default/a", Duration::from_secs(30));
        queue.add_after("default/a", Duration::from_secs(2));

        assert_eq!(queue.get().await.as_deref(), Some("default/a"));
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(2));
        assert!(waited < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_delayed_key_wakes_sleeping_consumer() {
        let queue = fast_queue();
        queue.add_after("default/slow", Duration::from_secs(60));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.add_after("default/fast", Duration::from_secs(1));

        assert_eq!(consumer.await.expect("join").as_deref(), Some("default/fast"));
    }

    #[tokio::test]
    async fn test_direct_add_supersedes_delayed_add() {
        let queue = fast_queue();
        queue.add_after("default/a", Duration::from_secs(3600));
        queue.add("default/a");

        assert_eq!(queue.get().await.as_deref(), Some("default/a"));
        queue.done("default/a");
        queue.shut_down();
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn test_shutdown_discards_delayed_keys() {
        let queue = fast_queue();
        queue.add_after("default/a", Duration::from_secs(3600));
        queue.shut_down();

        assert_eq!(queue.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_counts_and_forget() {
        let queue = fast_queue();
        assert_eq!(queue.num_requeues("default/a"), 0);

        queue.add_rate_limited("default/a");
        queue.add_rate_limited("default/a");
        assert_eq!(queue.num_requeues("default/a"), 2);
        assert_eq!(queue.num_requeues("default/b"), 0);

        assert_eq!(queue.get().await.as_deref(), Some("default/a"));
        queue.forget("default/a");
        assert_eq!(queue.num_requeues("default/a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_delay_doubles() {
        let queue = fast_queue();

        for (requeues, expected) in [(0u32, 10u64), (1, 20), (2, 40)] {
            assert_eq!(queue.num_requeues("default/a"), requeues);
            let start = Instant::now();
            queue.add_rate_limited("default/a");
            let key = queue.get().await.expect("key");
            assert!(start.elapsed() >= Duration::from_millis(expected));
            queue.done(&key);
        }
    }
}
