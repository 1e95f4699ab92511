//! Kubernetes resource watchers.
//!
//! Each watched kind gets one pump task that reads the kube watch stream,
//! keeps a reflector store current and turns raw watch events into
//! [`Change`]s for the [`EventHandler`].
//!
//! The raw stream only says "this object now looks like X". Whether that is
//! an add or an update, and which objects vanished while the watch was
//! disconnected, is worked out here by comparing against the store before
//! the event is applied to it.

use crate::error::ControllerError;
use crate::events::{Change, EventHandler, ResourceEvent};
use futures::StreamExt;
use kube::{Api, Resource};
use kube_runtime::reflector::{self, ObjectRef, Store, store::Writer};
use kube_runtime::watcher;
use kube_runtime::WatchStreamExt;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Whether a cache has completed its initial list. Clones share the flag.
#[derive(Clone, Debug)]
pub struct SyncStatus {
    synced: Arc<watch::Sender<bool>>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStatus {
    /// Creates an unsynced status.
    pub fn new() -> Self {
        Self {
            synced: Arc::new(watch::Sender::new(false)),
        }
    }

    /// Marks the cache as synced. Idempotent.
    pub fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    /// Whether the initial list has completed.
    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Waits until the initial list has completed.
    pub async fn wait_synced(&self) {
        let mut rx = self.synced.subscribe();
        // The sender lives in `self`, so this cannot fail
        let _ = rx.wait_for(|synced| *synced).await;
    }
}

/// Objects seen during an in-progress re-list
struct Relist<K: Resource>
where
    K::DynamicType: Eq + Hash,
{
    seen: HashSet<ObjectRef<K>>,
    changes: Vec<Change<K>>,
}

impl<K: Resource> Default for Relist<K>
where
    K::DynamicType: Eq + Hash,
{
    fn default() -> Self {
        Self {
            seen: HashSet::new(),
            changes: Vec::new(),
        }
    }
}

/// Maintains a reflector store and classifies watch events against it.
pub struct ChangeTracker<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    store: Store<K>,
    writer: Writer<K>,
    relist: Option<Relist<K>>,
}

impl<K> Default for ChangeTracker<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> ChangeTracker<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    /// Creates a tracker with an empty store.
    pub fn new() -> Self {
        let (store, writer) = reflector::store();
        Self {
            store,
            writer,
            relist: None,
        }
    }

    /// Read handle to the store this tracker writes.
    pub fn store(&self) -> Store<K> {
        self.store.clone()
    }

    /// Applies `event` to the store and returns the changes it represents.
    ///
    /// The store is updated before this returns, so a key enqueued from a
    /// returned change is never synced against a stale cache. Changes seen
    /// during a re-list are held back until the re-list completes, then
    /// reported together with deletions of objects the re-list no longer
    /// contains.
    pub fn observe(&mut self, event: &watcher::Event<K>) -> Vec<Change<K>> {
        let changes = match event {
            watcher::Event::Apply(obj) => vec![self.classify(obj)],
            watcher::Event::Delete(obj) => {
                let last = self
                    .store
                    .get(&ObjectRef::from_obj(obj))
                    .unwrap_or_else(|| Arc::new(obj.clone()));
                vec![Change::Deleted(last)]
            }
            watcher::Event::Init => {
                self.relist = Some(Relist::default());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                let change = self.classify(obj);
                let relist = self.relist.get_or_insert_with(Relist::default);
                relist.seen.insert(ObjectRef::from_obj(obj));
                relist.changes.push(change);
                Vec::new()
            }
            watcher::Event::InitDone => {
                let relist = self.relist.take().unwrap_or_default();
                let mut changes = relist.changes;
                changes.extend(
                    self.store
                        .state()
                        .into_iter()
                        .filter(|cached| !relist.seen.contains(&ObjectRef::from_obj(cached.as_ref())))
                        .map(Change::Deleted),
                );
                changes
            }
        };
        self.writer.apply_watcher_event(event);
        changes
    }

    fn classify(&self, obj: &K) -> Change<K> {
        let new = Arc::new(obj.clone());
        match self.store.get(&ObjectRef::from_obj(obj)) {
            Some(old) => Change::Updated { old, new },
            None => Change::Added(new),
        }
    }
}

/// Pumps one watch stream into `handler` until the stream ends.
///
/// Watch errors are retried with the kube-runtime default backoff; the stream
/// only ends if the watcher gives up, which is reported as an error.
pub async fn run_pump<K>(
    api: Api<K>,
    mut tracker: ChangeTracker<K>,
    handler: Arc<EventHandler>,
    status: SyncStatus,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
    ResourceEvent: From<Change<K>>,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    info!("Starting {} watcher", kind);

    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => {
                for change in tracker.observe(&event) {
                    handler.handle(&change.into());
                }
                if matches!(event, watcher::Event::InitDone) {
                    if !status.is_synced() {
                        info!("{} cache synced", kind);
                    } else {
                        debug!("{} cache re-listed", kind);
                    }
                    status.mark_synced();
                }
            }
            Err(e) => warn!("{} watch error: {}", kind, e),
        }
    }

    Err(ControllerError::Watch(format!("{} watch stream ended", kind)))
}
