//! Ingress API Client
//!
//! Create/delete access to `networking.k8s.io/v1` Ingresses for the ingress
//! manager controller, behind a trait so the reconciler can be tested against
//! an in-memory mock.
//!
//! # Example
//!
//! ```no_run
//! use ingress_client::{IngressClient, IngressClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = IngressClient::new(kube::Client::try_default().await?);
//!
//! match client.delete_ingress("default", "web").await {
//!     Ok(()) => {}
//!     Err(e) if e.is_not_found() => {}
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Error classification**: `NotFound` and `AlreadyExists` are distinguishable
//!   from transient API failures
//! - **Mocking**: `MockIngressClient` behind the `test-util` feature

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod ingress_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::IngressClient;
pub use error::IngressError;
pub use ingress_trait::IngressClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{IngressCall, MockIngressClient};
