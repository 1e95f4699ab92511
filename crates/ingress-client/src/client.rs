//! Kubernetes-backed Ingress client.
//!
//! Thin wrapper over `kube::Api<Ingress>` that maps API status codes onto
//! [`IngressError`] so callers can tell "not found" and "already exists" apart
//! from transient failures.

use crate::error::IngressError;
use crate::ingress_trait::IngressClientTrait;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use tracing::debug;

/// Field manager recorded on Ingresses created by this client
pub const DEFAULT_FIELD_MANAGER: &str = "ingress-manager";

/// Ingress client for a live cluster
#[derive(Clone)]
pub struct IngressClient {
    client: Client,
    field_manager: String,
}

impl IngressClient {
    /// Creates a client that records `ingress-manager` as field manager.
    pub fn new(client: Client) -> Self {
        Self::with_field_manager(client, DEFAULT_FIELD_MANAGER)
    }

    /// Creates a client with a custom field manager.
    pub fn with_field_manager(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api(&self, namespace: &str) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl IngressClientTrait for IngressClient {
    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<Ingress, IngressError> {
        if ingress.metadata.name.is_none() {
            return Err(IngressError::InvalidRequest(
                "Ingress metadata.name is required".to_string(),
            ));
        }

        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        let created = self.api(namespace).create(&params, ingress).await?;
        debug!(
            "Created Ingress {}/{}",
            namespace,
            created.metadata.name.as_deref().unwrap_or("<unknown>")
        );
        Ok(created)
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<(), IngressError> {
        // Either the object (deletion pending finalizers) or a Status; both mean accepted.
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        debug!("Deleted Ingress {}/{}", namespace, name);
        Ok(())
    }
}
