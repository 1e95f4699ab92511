//! Watch cache access.
//!
//! The reconciler reads Services and Ingresses from the reflector stores fed by
//! the watchers, never from the API server. This module defines the lookup seam
//! and the work queue key format.

use crate::error::ControllerError;
use kube::Resource;
use kube_runtime::reflector::{ObjectRef, Store};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Point lookups against a local mirror of cluster state.
pub trait ObjectCache<K>: Send + Sync {
    /// Returns the cached object, `Ok(None)` if it is not in the cache.
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<K>>, ControllerError>;
}

impl<K> ObjectCache<K> for Store<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<K>>, ControllerError> {
        Ok(Store::get(self, &ObjectRef::new(name).within(namespace)))
    }
}

/// Work queue key for a namespaced object: `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Object namespace
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Creates a key from its parts.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a cached object. `None` if the object has no name or namespace.
    pub fn for_object<K: Resource>(obj: &K) -> Option<Self> {
        let meta = obj.meta();
        Some(Self::new(meta.namespace.clone()?, meta.name.clone()?))
    }

    /// Splits `namespace/name`.
    ///
    /// # Errors
    ///
    /// `MalformedKey` unless the key has exactly one `/` with non-empty parts.
    pub fn parse(key: &str) -> Result<Self, ControllerError> {
        match key.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => Err(ControllerError::MalformedKey(format!(
                "expected namespace/name, got {:?}",
                key
            ))),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
