//! Controller-specific error types.
//!
//! This module defines error types specific to the Ingress Manager Controller
//! that are not covered by upstream library errors.

use ingress_client::IngressError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Ingress Manager Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Ingress create/delete failed
    #[error("Ingress API error: {0}")]
    Ingress(#[from] IngressError),

    /// Work queue key could not be split into namespace and name
    #[error("Malformed key: {0}")]
    MalformedKey(String),

    /// Resource is missing fields required to derive an Ingress
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// Watch cache lookup failed
    #[error("Cache lookup failed: {0}")]
    Cache(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Sync panicked; the payload message if it had one
    #[error("Sync panicked: {0}")]
    Panicked(String),

    /// I/O error (probe listener)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControllerError {
    /// Malformed keys are programming errors and never retried.
    pub fn is_malformed_key(&self) -> bool {
        matches!(self, Self::MalformedKey(_))
    }
}
