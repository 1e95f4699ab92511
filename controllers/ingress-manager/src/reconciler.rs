//! Reconciliation logic for Service-derived Ingresses.
//!
//! For one work queue key, compares the Service's intent (the `ingress/http`
//! annotation) with the presence of the Ingress of the same name and issues at
//! most one create or delete. Only existence is reconciled: an Ingress whose
//! content drifted from the template is left alone.

use crate::builder::IngressBuilder;
use crate::cache::{ObjectCache, ObjectKey};
use crate::error::ControllerError;
use ingress_client::IngressClientTrait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Annotation that opts a Service in. Only presence matters, not the value.
pub const INTENT_ANNOTATION: &str = "ingress/http";

/// Whether `service` asks for an Ingress.
pub fn wants_ingress(service: &Service) -> bool {
    service.annotations().contains_key(INTENT_ANNOTATION)
}

/// Result of a successful sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Ingress was created
    Created,
    /// Ingress was deleted
    Deleted,
    /// Ingress existence already matched intent
    InSync,
    /// Service is not in the cache; cascade deletion owns the cleanup
    ServiceGone,
}

impl SyncOutcome {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Deleted => "deleted",
            Self::InSync => "in_sync",
            Self::ServiceGone => "service_gone",
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processes one work queue key.
///
/// This is the seam between the worker pool and the sync logic.
#[async_trait::async_trait]
pub trait SyncHandler: Send + Sync {
    /// Reconciles the object identified by `key`.
    async fn sync(&self, key: &str) -> Result<SyncOutcome, ControllerError>;
}

/// Reconciles Ingress existence against Service annotations.
pub struct Reconciler {
    services: Arc<dyn ObjectCache<Service>>,
    ingresses: Arc<dyn ObjectCache<Ingress>>,
    client: Box<dyn IngressClientTrait + Send + Sync>,
    builder: IngressBuilder,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        services: Arc<dyn ObjectCache<Service>>,
        ingresses: Arc<dyn ObjectCache<Ingress>>,
        client: Box<dyn IngressClientTrait + Send + Sync>,
        builder: IngressBuilder,
    ) -> Self {
        Self {
            services,
            ingresses,
            client,
            builder,
        }
    }

    /// Reconciles the Service/Ingress pair named by `key`.
    ///
    /// This method:
    /// 1. Splits the key into namespace and name
    /// 2. Looks the Service up in the cache (missing: nothing to do)
    /// 3. Looks the Ingress of the same name up in the cache
    /// 4. Creates or deletes the Ingress if its existence disagrees with intent
    ///
    /// API errors are returned unlogged; the retry policy decides what happens.
    /// A create that hits `AlreadyExists` or a delete that hits `NotFound` lost a
    /// race to an identical change and counts as success.
    pub async fn sync_service(&self, key: &str) -> Result<SyncOutcome, ControllerError> {
        let ObjectKey { namespace, name } = ObjectKey::parse(key)?;

        let Some(service) = self.services.get(&namespace, &name)? else {
            debug!("Service {}/{} no longer exists, skipping", namespace, name);
            return Ok(SyncOutcome::ServiceGone);
        };

        let desired = wants_ingress(&service);
        let existing = self.ingresses.get(&namespace, &name)?;

        match (desired, existing.is_some()) {
            (true, false) => {
                let ingress = self.builder.build(&service)?;
                info!("Creating Ingress {}/{}", namespace, name);
                match self.client.create_ingress(&namespace, &ingress).await {
                    Ok(_) => Ok(SyncOutcome::Created),
                    Err(e) if e.is_already_exists() => {
                        debug!("Ingress {}/{} already exists", namespace, name);
                        Ok(SyncOutcome::Created)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            (false, true) => {
                info!("Deleting Ingress {}/{}", namespace, name);
                match self.client.delete_ingress(&namespace, &name).await {
                    Ok(()) => Ok(SyncOutcome::Deleted),
                    Err(e) if e.is_not_found() => {
                        debug!("Ingress {}/{} already deleted", namespace, name);
                        Ok(SyncOutcome::Deleted)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            _ => {
                debug!(
                    "Ingress {}/{} in sync (desired: {})",
                    namespace, name, desired
                );
                Ok(SyncOutcome::InSync)
            }
        }
    }
}

#[async_trait::async_trait]
impl SyncHandler for Reconciler {
    async fn sync(&self, key: &str) -> Result<SyncOutcome, ControllerError> {
        self.sync_service(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use ingress_client::IngressCall;

    #[tokio::test]
    async fn test_create_when_annotated_and_missing() {
        let cluster = TestCluster::new();
        cluster.apply_service(create_test_service("default", "web", &[("ingress/http", "true")]));

        let outcome = cluster.reconciler().sync_service("default/web").await.unwrap();

        assert_eq!(outcome, SyncOutcome::Created);
        assert_eq!(cluster.client.create_count(), 1);
        assert_eq!(cluster.client.delete_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_when_not_annotated_and_present() {
        let cluster = TestCluster::new();
        let service = create_test_service("default", "web", &[]);
        cluster.client.insert(IngressBuilder::default().build(&service).unwrap());
        cluster.apply_service(service);
        cluster.sync_ingresses();

        let outcome = cluster.reconciler().sync_service("default/web").await.unwrap();

        assert_eq!(outcome, SyncOutcome::Deleted);
        assert_eq!(
            cluster.client.calls(),
            vec![IngressCall::Delete {
                namespace: "default".to_string(),
                name: "web".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_noop_when_annotated_and_present() {
        let cluster = TestCluster::new();
        let service = create_test_service("default", "web", &[("ingress/http", "")]);
        cluster.client.insert(IngressBuilder::default().build(&service).unwrap());
        cluster.apply_service(service);
        cluster.sync_ingresses();

        let outcome = cluster.reconciler().sync_service("default/web").await.unwrap();

        assert_eq!(outcome, SyncOutcome::InSync);
        assert!(cluster.client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_noop_when_not_annotated_and_missing() {
        let cluster = TestCluster::new();
        cluster.apply_service(create_test_service("default", "web", &[("other", "x")]));

        let outcome = cluster.reconciler().sync_service("default/web").await.unwrap();

        assert_eq!(outcome, SyncOutcome::InSync);
        assert!(cluster.client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_annotation_value_is_irrelevant() {
        let cluster = TestCluster::new();
        cluster.apply_service(create_test_service("default", "web", &[("ingress/http", "false")]));

        let outcome = cluster.reconciler().sync_service("default/web").await.unwrap();

        assert_eq!(outcome, SyncOutcome::Created);
    }

    #[tokio::test]
    async fn test_sync_twice_creates_once() {
        let cluster = TestCluster::new();
        cluster.apply_service(create_test_service("default", "web", &[("ingress/http", "true")]));
        let reconciler = cluster.reconciler();

        assert_eq!(reconciler.sync_service("default/web").await.unwrap(), SyncOutcome::Created);
        cluster.sync_ingresses();
        assert_eq!(reconciler.sync_service("default/web").await.unwrap(), SyncOutcome::InSync);

        assert_eq!(cluster.client.create_count(), 1);
    }

    #[tokio::test]
    async fn test_service_deleted_before_sync() {
        let cluster = TestCluster::new();
        let service = create_test_service("default", "web", &[("ingress/http", "true")]);
        cluster.apply_service(service.clone());
        cluster.delete_service(service);

        let outcome = cluster.reconciler().sync_service("default/web").await.unwrap();

        assert_eq!(outcome, SyncOutcome::ServiceGone);
        assert!(cluster.client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_key() {
        let cluster = TestCluster::new();

        let err = cluster.reconciler().sync_service("no-namespace").await.unwrap_err();

        assert!(err.is_malformed_key());
        assert!(cluster.client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_error_is_returned() {
        let cluster = TestCluster::new();
        cluster.apply_service(create_test_service("default", "web", &[("ingress/http", "true")]));
        cluster.client.fail_times(1, "etcd timeout");

        let err = cluster.reconciler().sync_service("default/web").await.unwrap_err();

        assert!(matches!(err, ControllerError::Ingress(_)));
        assert!(cluster.client.get("default", "web").is_none());
    }

    #[tokio::test]
    async fn test_create_race_already_exists_is_success() {
        let cluster = TestCluster::new();
        let service = create_test_service("default", "web", &[("ingress/http", "true")]);
        // Created by another worker, not yet visible in the cache
        cluster.client.insert(IngressBuilder::default().build(&service).unwrap());
        cluster.apply_service(service);

        let outcome = cluster.reconciler().sync_service("default/web").await.unwrap();

        assert_eq!(outcome, SyncOutcome::Created);
        assert_eq!(cluster.client.create_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_race_not_found_is_success() {
        let cluster = TestCluster::new();
        let service = create_test_service("default", "web", &[]);
        cluster.client.insert(IngressBuilder::default().build(&service).unwrap());
        cluster.apply_service(service);
        cluster.sync_ingresses();
        // Deleted out-of-band; cache is stale
        cluster.client.remove("default", "web");

        let outcome = cluster.reconciler().sync_service("default/web").await.unwrap();

        assert_eq!(outcome, SyncOutcome::Deleted);
    }

    #[tokio::test]
    async fn test_cache_error_is_propagated() {
        let cluster = TestCluster::new();
        let reconciler = Reconciler::new(
            Arc::new(cluster.services.clone()),
            Arc::new(FailingCache),
            Box::new(cluster.client.clone()),
            IngressBuilder::default(),
        );
        cluster.apply_service(create_test_service("default", "web", &[("ingress/http", "true")]));

        let err = reconciler.sync_service("default/web").await.unwrap_err();

        assert!(matches!(err, ControllerError::Cache(_)));
        assert!(cluster.client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_content_drift_is_not_corrected() {
        let cluster = TestCluster::new();
        let service = create_test_service("default", "web", &[("ingress/http", "true")]);
        let mut drifted = IngressBuilder::default().build(&service).unwrap();
        drifted.spec = None;
        cluster.client.insert(drifted);
        cluster.apply_service(service);
        cluster.sync_ingresses();

        let outcome = cluster.reconciler().sync_service("default/web").await.unwrap();

        assert_eq!(outcome, SyncOutcome::InSync);
        assert!(cluster.client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_round_trip_annotate_clear_reannotate() {
        let cluster = TestCluster::new();
        let reconciler = cluster.reconciler();
        let annotated = create_test_service("default", "web", &[("ingress/http", "true")]);

        cluster.apply_service(annotated.clone());
        assert_eq!(reconciler.sync_service("default/web").await.unwrap(), SyncOutcome::Created);
        let first = cluster.client.get("default", "web").unwrap();
        let spec = first.spec.clone().unwrap();
        let rule = &spec.rules.as_ref().unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some("example.com"));
        let path = &rule.http.as_ref().unwrap().paths[0];
        assert_eq!(path.path.as_deref(), Some("/"));
        let backend = path.backend.service.as_ref().unwrap();
        assert_eq!(backend.name, "web");
        assert_eq!(backend.port.as_ref().unwrap().number, Some(80));
        cluster.sync_ingresses();

        let mut cleared = annotated.clone();
        cleared.metadata.annotations = None;
        cluster.apply_service(cleared);
        assert_eq!(reconciler.sync_service("default/web").await.unwrap(), SyncOutcome::Deleted);
        assert!(cluster.client.get("default", "web").is_none());
        cluster.sync_ingresses();

        cluster.apply_service(annotated);
        assert_eq!(reconciler.sync_service("default/web").await.unwrap(), SyncOutcome::Created);
        let second = cluster.client.get("default", "web").unwrap();
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_self_healing_after_out_of_band_delete() {
        let cluster = TestCluster::new();
        let reconciler = cluster.reconciler();
        cluster.apply_service(create_test_service("default", "web", &[("ingress/http", "true")]));
        reconciler.sync_service("default/web").await.unwrap();
        cluster.sync_ingresses();

        cluster.client.remove("default", "web");
        cluster.sync_ingresses();

        assert_eq!(reconciler.sync_service("default/web").await.unwrap(), SyncOutcome::Created);
        assert!(cluster.client.get("default", "web").is_some());
        assert_eq!(cluster.client.create_count(), 2);
    }

    #[tokio::test]
    async fn test_scenario_default_web() {
        let cluster = TestCluster::new();
        let reconciler = cluster.reconciler();
        let service = create_test_service("default", "web", &[("ingress/http", "true")]);
        cluster.apply_service(service.clone());

        reconciler.sync_service("default/web").await.unwrap();

        let calls = cluster.client.calls();
        assert_eq!(calls.len(), 1);
        let IngressCall::Create { namespace, ingress } = &calls[0] else {
            panic!("expected create, got {:?}", calls[0]);
        };
        assert_eq!(namespace, "default");
        assert_eq!(ingress.metadata.name.as_deref(), Some("web"));
        let owner = &ingress.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "Service");
        assert_eq!(Some(&owner.uid), service.metadata.uid.as_ref());
        let rule = &ingress.spec.as_ref().unwrap().rules.as_ref().unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some("example.com"));
        let path = &rule.http.as_ref().unwrap().paths[0];
        assert_eq!(path.path.as_deref(), Some("/"));
        let backend = path.backend.service.as_ref().unwrap();
        assert_eq!(
            format!("{}:{}", backend.name, backend.port.as_ref().unwrap().number.unwrap()),
            "web:80"
        );

        cluster.sync_ingresses();
        cluster.client.clear_calls();
        let mut cleared = service;
        cleared.metadata.annotations = Some(Default::default());
        cluster.apply_service(cleared);

        reconciler.sync_service("default/web").await.unwrap();

        assert_eq!(
            cluster.client.calls(),
            vec![IngressCall::Delete {
                namespace: "default".to_string(),
                name: "web".to_string(),
            }]
        );
    }
}
