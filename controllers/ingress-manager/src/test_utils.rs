//! Test utilities for unit testing the controller
//!
//! This module provides helpers for creating test data and an in-memory
//! cluster (reflector stores plus a mock Ingress client).

#[cfg(test)]
use crate::builder::IngressBuilder;
#[cfg(test)]
use crate::cache::ObjectCache;
#[cfg(test)]
use crate::error::ControllerError;
#[cfg(test)]
use crate::reconciler::Reconciler;
#[cfg(test)]
use crate::retry::ErrorReporter;
#[cfg(test)]
use ingress_client::MockIngressClient;
#[cfg(test)]
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
#[cfg(test)]
use k8s_openapi::api::networking::v1::Ingress;
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use kube_runtime::reflector::{self, store::Writer, Store};
#[cfg(test)]
use kube_runtime::watcher;
#[cfg(test)]
use std::sync::{Arc, Mutex};

/// Helper to create a test Service with the given annotations
#[cfg(test)]
pub fn create_test_service(namespace: &str, name: &str, annotations: &[(&str, &str)]) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uuid::Uuid::new_v4().to_string()),
            annotations: (!annotations.is_empty()).then(|| {
                annotations
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            }),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some([("app".to_string(), name.to_string())].into()),
            ports: Some(vec![ServicePort {
                port: 80,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Helper to create an Ingress with an optional controller reference `(kind, name)`
#[cfg(test)]
pub fn create_test_ingress(namespace: &str, name: &str, owner: Option<(&str, &str)>) -> Ingress {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    Ingress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            owner_references: owner.map(|(kind, owner_name)| {
                vec![OwnerReference {
                    api_version: "v1".to_string(),
                    kind: kind.to_string(),
                    name: owner_name.to_string(),
                    uid: uuid::Uuid::new_v4().to_string(),
                    controller: Some(true),
                    block_owner_deletion: Some(true),
                }]
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// In-memory cluster: Service/Ingress caches and a mock Ingress client
#[cfg(test)]
pub struct TestCluster {
    pub services: Store<Service>,
    pub ingresses: Store<Ingress>,
    pub client: MockIngressClient,
    service_writer: Mutex<Writer<Service>>,
    ingress_writer: Mutex<Writer<Ingress>>,
}

#[cfg(test)]
impl TestCluster {
    pub fn new() -> Self {
        let (services, service_writer) = reflector::store();
        let (ingresses, ingress_writer) = reflector::store();
        Self {
            services,
            ingresses,
            client: MockIngressClient::new(),
            service_writer: Mutex::new(service_writer),
            ingress_writer: Mutex::new(ingress_writer),
        }
    }

    /// Adds or replaces a Service in the cache
    pub fn apply_service(&self, service: Service) {
        self.service_writer
            .lock()
            .unwrap()
            .apply_watcher_event(&watcher::Event::Apply(service));
    }

    /// Removes a Service from the cache
    pub fn delete_service(&self, service: Service) {
        self.service_writer
            .lock()
            .unwrap()
            .apply_watcher_event(&watcher::Event::Delete(service));
    }

    /// Replaces the Ingress cache with the mock client's contents (a re-list)
    pub fn sync_ingresses(&self) {
        let mut writer = self.ingress_writer.lock().unwrap();
        writer.apply_watcher_event(&watcher::Event::Init);
        for ingress in self.client.ingresses() {
            writer.apply_watcher_event(&watcher::Event::InitApply(ingress));
        }
        writer.apply_watcher_event(&watcher::Event::InitDone);
    }

    /// Reconciler wired to this cluster with the default template
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Arc::new(self.services.clone()),
            Arc::new(self.ingresses.clone()),
            Box::new(self.client.clone()),
            IngressBuilder::default(),
        )
    }
}

/// Cache whose lookups always fail
#[cfg(test)]
pub struct FailingCache;

#[cfg(test)]
impl<K> ObjectCache<K> for FailingCache {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<K>>, ControllerError> {
        Err(ControllerError::Cache(format!("lookup of {}/{} failed", namespace, name)))
    }
}

/// Error reporter that records `(key, message)` pairs
#[cfg(test)]
#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<(String, String)>>,
}

#[cfg(test)]
impl RecordingReporter {
    pub fn reports(&self) -> Vec<(String, String)> {
        self.reports.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl ErrorReporter for RecordingReporter {
    fn report(&self, key: &str, error: &ControllerError) {
        self.reports
            .lock()
            .unwrap()
            .push((key.to_string(), error.to_string()));
    }
}
