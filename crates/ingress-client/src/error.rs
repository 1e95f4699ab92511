//! Ingress client errors

use thiserror::Error;

/// Errors that can occur when creating or deleting Ingresses
#[derive(Debug, Error)]
pub enum IngressError {
    /// The Ingress does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// An Ingress with the same name already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Any other Kubernetes API or transport error
    #[error("Kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl IngressError {
    /// Whether the API reported the Ingress as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the API reported a name conflict on create
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

impl From<kube::Error> for IngressError {
    fn from(err: kube::Error) -> Self {
        if let kube::Error::Api(response) = &err {
            if response.code == 404 {
                return Self::NotFound(response.message.clone());
            }
            if response.code == 409 && response.reason == "AlreadyExists" {
                return Self::AlreadyExists(response.message.clone());
            }
        }
        Self::Kube(err)
    }
}
