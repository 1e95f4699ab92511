//! Event normalization.
//!
//! Watch notifications are resolved into [`ResourceEvent`] once, at the watch
//! boundary. [`EventHandler`] decides which of them enqueue a Service key:
//!
//! - Service added: always
//! - Service updated: when the [`UpdatePredicate`] says the change matters
//! - Ingress deleted: the owning Service, if the Ingress has a Service controller reference
//!
//! Everything else is ignored; Ingress content drift is not watched for.

use crate::cache::ObjectKey;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use workqueue::WorkQueue;

/// Kind recorded in the owner reference of Ingresses we manage
pub const OWNER_KIND: &str = "Service";
/// API version of the owning kind (core group)
pub const OWNER_API_VERSION: &str = "v1";

/// A change to one cached object
#[derive(Debug, Clone)]
pub enum Change<K> {
    /// Object appeared
    Added(Arc<K>),
    /// Object changed; `old` is the previous cached snapshot
    Updated {
        /// Previous snapshot
        old: Arc<K>,
        /// Current snapshot
        new: Arc<K>,
    },
    /// Object disappeared; carries the last known snapshot
    Deleted(Arc<K>),
}

/// A change to either watched kind
#[derive(Debug, Clone)]
pub enum ResourceEvent {
    /// Service change
    Service(Change<Service>),
    /// Ingress change
    Ingress(Change<Ingress>),
}

impl ResourceEvent {
    /// Label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Service(Change::Added(_)) => "service_added",
            Self::Service(Change::Updated { .. }) => "service_updated",
            Self::Service(Change::Deleted(_)) => "service_deleted",
            Self::Ingress(Change::Added(_)) => "ingress_added",
            Self::Ingress(Change::Updated { .. }) => "ingress_updated",
            Self::Ingress(Change::Deleted(_)) => "ingress_deleted",
        }
    }
}

impl From<Change<Service>> for ResourceEvent {
    fn from(change: Change<Service>) -> Self {
        Self::Service(change)
    }
}

impl From<Change<Ingress>> for ResourceEvent {
    fn from(change: Change<Ingress>) -> Self {
        Self::Ingress(change)
    }
}

/// Decides whether a Service update triggers a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePredicate {
    /// Re-sync only when the annotation set changed (the only input to intent)
    #[default]
    Annotations,
    /// Re-sync on any structural difference between the snapshots
    FullObject,
}

impl UpdatePredicate {
    /// Whether the update from `old` to `new` should enqueue the Service.
    pub fn should_resync(self, old: &Service, new: &Service) -> bool {
        match self {
            Self::Annotations => old.annotations() != new.annotations(),
            Self::FullObject => old != new,
        }
    }
}

impl FromStr for UpdatePredicate {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "annotations" => Ok(Self::Annotations),
            "full" | "full-object" => Ok(Self::FullObject),
            other => Err(ControllerError::InvalidConfig(format!(
                "unknown update predicate {:?} (expected \"annotations\" or \"full\")",
                other
            ))),
        }
    }
}

/// Translates resource events into work queue adds.
pub struct EventHandler {
    queue: WorkQueue,
    predicate: UpdatePredicate,
    metrics: Metrics,
}

impl EventHandler {
    /// Creates a new handler feeding `queue`.
    pub fn new(queue: WorkQueue, predicate: UpdatePredicate, metrics: Metrics) -> Self {
        Self {
            queue,
            predicate,
            metrics,
        }
    }

    /// Handles one event. Returns the key that was enqueued, if any.
    pub fn handle(&self, event: &ResourceEvent) -> Option<String> {
        self.metrics.events.with_label_values(&[event.label()]).inc();

        let key = match event {
            ResourceEvent::Service(Change::Added(service)) => Self::service_key(service),
            ResourceEvent::Service(Change::Updated { old, new }) => {
                if self.predicate.should_resync(old, new) {
                    Self::service_key(new)
                } else {
                    trace!("Service {} update ignored by {:?} predicate", new.name_any(), self.predicate);
                    None
                }
            }
            ResourceEvent::Ingress(Change::Deleted(ingress)) => Self::owner_key(ingress),
            _ => None,
        }?;

        debug!("Enqueueing {} ({})", key, event.label());
        self.queue.add(key.clone());
        self.metrics.set_queue_depth(self.queue.len());
        Some(key)
    }

    fn service_key(service: &Service) -> Option<String> {
        let key = ObjectKey::for_object(service);
        if key.is_none() {
            warn!("Ignoring Service event without name or namespace");
        }
        key.map(|key| key.to_string())
    }

    /// Key of the Service controlling `ingress`, if any.
    fn owner_key(ingress: &Ingress) -> Option<String> {
        let owner = ingress
            .owner_references()
            .iter()
            .find(|owner| owner.controller == Some(true))?;
        if owner.kind != OWNER_KIND || owner.api_version != OWNER_API_VERSION {
            trace!(
                "Ingress {} is controlled by {}/{} {}, ignoring",
                ingress.name_any(),
                owner.api_version,
                owner.kind,
                owner.name
            );
            return None;
        }
        let namespace = ingress.namespace()?;
        Some(ObjectKey::new(namespace, owner.name.clone()).to_string())
    }
}
