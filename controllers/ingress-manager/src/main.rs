//! Ingress Manager Controller
//!
//! Keeps an Ingress in place for every Service annotated with `ingress/http`:
//! - Annotation added: an Ingress of the same name is created, owned by the Service
//! - Annotation removed: the Ingress is deleted
//! - Ingress deleted out of band: it is recreated while the annotation remains
//!
//! Deleting the Service leaves cleanup to Kubernetes garbage collection
//! through the owner reference.

mod builder;
mod cache;
mod config;
mod controller;
mod error;
mod events;
mod metrics;
mod probes;
mod reconciler;
mod retry;
mod watcher;
mod worker;

#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::controller::Controller;
use crate::error::ControllerError;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Ingress Manager Controller");

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Workers: {}", config.workers);
    info!("  Max retries: {}", config.max_retries);
    info!("  Backoff: {:?} doubling, capped at {:?}", config.backoff.base(), config.backoff.max());
    info!(
        "  Ingress template: class={} host={} path={} port={}",
        config.template.class_name, config.template.host, config.template.path, config.template.backend_port
    );
    info!("  Update predicate: {:?}", config.update_predicate);
    info!("  Probe address: {}", config.probe_addr);

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                let _ = stop_tx.send(true);
            }
            Err(e) => {
                warn!("Failed to listen for shutdown signal: {}", e);
                // Dropping the sender would stop the controller
                std::future::pending::<()>().await;
            }
        }
    });

    let controller = Controller::new(config).await?;
    controller.run(stop_rx).await?;

    Ok(())
}
