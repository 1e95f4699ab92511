//! Ingress construction.
//!
//! Maps a Service onto the Ingress that should exist for it. Pure: the output
//! depends only on the Service and the [`IngressTemplate`], so repeated builds
//! from an unchanged Service are identical.

use crate::error::ControllerError;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;

/// Default `ingressClassName`
pub const DEFAULT_INGRESS_CLASS: &str = "nginx";
/// Default rule host
pub const DEFAULT_HOST: &str = "example.com";
/// Default catch-all path
pub const DEFAULT_PATH: &str = "/";
/// Default backend port
pub const DEFAULT_BACKEND_PORT: i32 = 80;

/// Path type used for the single routing path
const PATH_TYPE_PREFIX: &str = "Prefix";

/// Shape of the derived Ingress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressTemplate {
    /// `spec.ingressClassName`
    pub class_name: String,
    /// Host of the single rule
    pub host: String,
    /// Path of the single rule, matched as a prefix
    pub path: String,
    /// Port on the Service the backend points at
    pub backend_port: i32,
}

impl Default for IngressTemplate {
    fn default() -> Self {
        Self {
            class_name: DEFAULT_INGRESS_CLASS.to_string(),
            host: DEFAULT_HOST.to_string(),
            path: DEFAULT_PATH.to_string(),
            backend_port: DEFAULT_BACKEND_PORT,
        }
    }
}

/// Builds Ingresses from Services using a fixed template.
#[derive(Debug, Clone, Default)]
pub struct IngressBuilder {
    template: IngressTemplate,
}

impl IngressBuilder {
    /// Creates a builder for `template`.
    pub fn new(template: IngressTemplate) -> Self {
        Self { template }
    }

    /// Template in use.
    pub fn template(&self) -> &IngressTemplate {
        &self.template
    }

    /// Builds the Ingress for `service`.
    ///
    /// The Ingress has the Service's name and namespace and a controller owner
    /// reference to it, so the cluster garbage-collects it with the Service.
    ///
    /// # Errors
    ///
    /// `InvalidResource` if the Service has no name, namespace or uid.
    pub fn build(&self, service: &Service) -> Result<Ingress, ControllerError> {
        let name = service
            .metadata
            .name
            .clone()
            .ok_or_else(|| ControllerError::InvalidResource("Service missing name".to_string()))?;
        let namespace = service.metadata.namespace.clone().ok_or_else(|| {
            ControllerError::InvalidResource(format!("Service {} missing namespace", name))
        })?;
        let owner = service.controller_owner_ref(&()).ok_or_else(|| {
            ControllerError::InvalidResource(format!("Service {}/{} missing uid", namespace, name))
        })?;

        let backend = IngressBackend {
            service: Some(IngressServiceBackend {
                name: name.clone(),
                port: Some(ServiceBackendPort {
                    number: Some(self.template.backend_port),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        };

        let rule = IngressRule {
            host: Some(self.template.host.clone()),
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some(self.template.path.clone()),
                    path_type: PATH_TYPE_PREFIX.to_string(),
                    backend,
                }],
            }),
        };

        Ok(Ingress {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(namespace),
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                ingress_class_name: Some(self.template.class_name.clone()),
                rules: Some(vec![rule]),
                ..Default::default()
            }),
            status: None,
        })
    }
}
