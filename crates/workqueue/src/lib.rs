//! Controller Work Queue
//!
//! A deduplicating, delay-capable, rate-limited queue of reconciliation keys
//! for Kubernetes controllers.
//!
//! # Example
//!
//! ```no_run
//! use workqueue::WorkQueue;
//!
//! # async fn example() {
//! let queue = WorkQueue::new("ingress-manager");
//! queue.add("default/web");
//!
//! while let Some(key) = queue.get().await {
//!     // reconcile `key` ...
//!     queue.forget(&key);
//!     queue.done(&key);
//! }
//! # }
//! ```
//!
//! # Guarantees
//!
//! - **Deduplication**: a key is pending at most once
//! - **Per-key exclusion**: a key handed out by `get` is not handed out again
//!   until `done` is called for it; re-adds in the meantime are collapsed and
//!   replayed on `done`
//! - **Backoff**: `add_rate_limited` delays a key exponentially in its requeue count
//! - **Cooperative shutdown**: `get` drains queued keys, then returns `None`

pub mod backoff;
pub mod queue;

pub use backoff::ExponentialBackoff;
pub use queue::WorkQueue;
