//! Metrics and health endpoints.
//!
//! - `GET /metrics`: Prometheus text format
//! - `GET /healthz`: liveness, always 200 while the process serves requests
//! - `GET /readyz`: 200 once every watch cache has synced, 503 before

use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::watcher::SyncStatus;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// State shared by the probe handlers
#[derive(Clone)]
pub struct ProbeState {
    metrics: Metrics,
    caches: Vec<SyncStatus>,
}

impl ProbeState {
    /// Creates probe state; the process is ready once all `caches` are synced.
    pub fn new(metrics: Metrics, caches: Vec<SyncStatus>) -> Self {
        Self { metrics, caches }
    }

    fn is_ready(&self) -> bool {
        self.caches.iter().all(SyncStatus::is_synced)
    }
}

/// Builds the probe router.
pub fn router(state: ProbeState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn metrics(State(state): State<ProbeState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<ProbeState>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "caches not synced")
    }
}

/// Serves the probe endpoints on `addr` until `stop` is raised.
pub async fn serve(
    addr: SocketAddr,
    state: ProbeState,
    mut stop: watch::Receiver<bool>,
) -> Result<(), ControllerError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Serving metrics and probes on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { crate::worker::wait_for_stop(&mut stop).await })
        .await?;

    info!("Probe server stopped");
    Ok(())
}
