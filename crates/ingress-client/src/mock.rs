//! Mock IngressClient for unit testing
//!
//! This module provides a mock implementation of `IngressClientTrait` that can
//! be used in unit tests without requiring a running API server.

use crate::error::IngressError;
use crate::ingress_trait::IngressClientTrait;
use k8s_openapi::api::networking::v1::Ingress;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// A call recorded by the mock
#[derive(Debug, Clone, PartialEq)]
pub enum IngressCall {
    /// `create_ingress(namespace, ingress)`
    Create {
        /// Namespace passed to the call
        namespace: String,
        /// Ingress passed to the call
        ingress: Ingress,
    },
    /// `delete_ingress(namespace, name)`
    Delete {
        /// Namespace passed to the call
        namespace: String,
        /// Name passed to the call
        name: String,
    },
}

/// Mock IngressClient for testing
///
/// Stores Ingresses in memory with API-server semantics for create/delete
/// (`AlreadyExists` / `NotFound`), records every call, and can be told to fail.
#[derive(Clone, Default)]
pub struct MockIngressClient {
    // Keyed by (namespace, name)
    ingresses: Arc<Mutex<BTreeMap<(String, String), Ingress>>>,
    calls: Arc<Mutex<Vec<IngressCall>>>,
    // None: never fail; Some(n): fail the next n calls (u32::MAX means always)
    failures: Arc<Mutex<Option<(u32, String)>>>,
}

impl MockIngressClient {
    /// Create a new, empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an Ingress to the mock store without recording a call (for test setup)
    pub fn insert(&self, ingress: Ingress) {
        let key = (
            ingress.metadata.namespace.clone().unwrap_or_default(),
            ingress.metadata.name.clone().unwrap_or_default(),
        );
        self.ingresses.lock().unwrap().insert(key, ingress);
    }

    /// Remove an Ingress without recording a call (simulates out-of-band deletion)
    pub fn remove(&self, namespace: &str, name: &str) -> Option<Ingress> {
        self.ingresses
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()))
    }

    /// Look up a stored Ingress
    pub fn get(&self, namespace: &str, name: &str) -> Option<Ingress> {
        self.ingresses
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// All stored Ingresses, ordered by namespace and name
    pub fn ingresses(&self) -> Vec<Ingress> {
        self.ingresses.lock().unwrap().values().cloned().collect()
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<IngressCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of `create_ingress` calls
    pub fn create_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, IngressCall::Create { .. }))
            .count()
    }

    /// Number of `delete_ingress` calls
    pub fn delete_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, IngressCall::Delete { .. }))
            .count()
    }

    /// Clear the call log
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Fail the next `times` calls with `IngressError::InvalidRequest(message)`
    pub fn fail_times(&self, times: u32, message: impl Into<String>) {
        *self.failures.lock().unwrap() = Some((times, message.into()));
    }

    /// Fail every call from now on
    pub fn fail_always(&self, message: impl Into<String>) {
        self.fail_times(u32::MAX, message);
    }

    /// Stop injecting failures
    pub fn heal(&self) {
        *self.failures.lock().unwrap() = None;
    }

    fn injected_failure(&self) -> Option<IngressError> {
        let mut failures = self.failures.lock().unwrap();
        let (remaining, message) = failures.as_mut()?;
        let err = IngressError::InvalidRequest(message.clone());
        if *remaining != u32::MAX {
            *remaining -= 1;
        }
        if *remaining == 0 {
            *failures = None;
        }
        Some(err)
    }
}

#[async_trait::async_trait]
impl IngressClientTrait for MockIngressClient {
    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<Ingress, IngressError> {
        self.calls.lock().unwrap().push(IngressCall::Create {
            namespace: namespace.to_string(),
            ingress: ingress.clone(),
        });
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }

        let name = ingress
            .metadata
            .name
            .clone()
            .ok_or_else(|| IngressError::InvalidRequest("Ingress metadata.name is required".to_string()))?;
        let mut ingresses = self.ingresses.lock().unwrap();
        let key = (namespace.to_string(), name.clone());
        if ingresses.contains_key(&key) {
            return Err(IngressError::AlreadyExists(format!(
                "ingresses.networking.k8s.io \"{}\" already exists",
                name
            )));
        }

        let mut created = ingress.clone();
        created.metadata.namespace = Some(namespace.to_string());
        ingresses.insert(key, created.clone());
        Ok(created)
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<(), IngressError> {
        self.calls.lock().unwrap().push(IngressCall::Delete {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }

        match self
            .ingresses
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()))
        {
            Some(_) => Ok(()),
            None => Err(IngressError::NotFound(format!(
                "ingresses.networking.k8s.io \"{}\" not found",
                name
            ))),
        }
    }
}
