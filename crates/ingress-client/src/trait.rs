//! IngressClient trait for mocking
//!
//! This trait abstracts Ingress writes so the reconciler can be unit tested
//! without an API server. The concrete `IngressClient` implements this trait,
//! and tests use `MockIngressClient`.

use crate::error::IngressError;
use k8s_openapi::api::networking::v1::Ingress;

/// Outbound cluster API calls issued by the reconciler
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait IngressClientTrait: Send + Sync {
    /// Create `ingress` in `namespace`.
    ///
    /// Returns `IngressError::AlreadyExists` if an Ingress with the same name exists.
    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<Ingress, IngressError>;

    /// Delete the Ingress `name` in `namespace`.
    ///
    /// Returns `IngressError::NotFound` if it does not exist.
    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<(), IngressError>;
}
