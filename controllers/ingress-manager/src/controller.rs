//! Main controller implementation.
//!
//! Wires the pieces together: one watch pump per kind feeding the shared work
//! queue, the reconciler reading from the pumps' caches, a supervised worker
//! pool draining the queue, and the probe server.
//!
//! Workers only start once both caches have completed their initial list, so
//! no sync ever runs against a partially filled cache.

use crate::builder::IngressBuilder;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::events::EventHandler;
use crate::metrics::Metrics;
use crate::probes::{self, ProbeState};
use crate::reconciler::Reconciler;
use crate::retry::{RetryPolicy, TracingErrorReporter};
use crate::watcher::{run_pump, ChangeTracker, SyncStatus};
use crate::worker::{wait_for_stop, Worker, WorkerPool};
use ingress_client::IngressClient;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Api, Client};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};
use workqueue::WorkQueue;

type PumpHandle = JoinHandle<Result<(), ControllerError>>;

/// Ingress manager controller.
pub struct Controller {
    client: Client,
    config: ControllerConfig,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Ingress Manager Controller");
        let client = Client::try_default().await?;
        Ok(Self { client, config })
    }

    /// Runs the controller until `stop` is raised or a watch fails for good.
    pub async fn run(self, stop: watch::Receiver<bool>) -> Result<(), ControllerError> {
        let config = self.config;
        let metrics = Metrics::new()?;
        let queue = WorkQueue::with_backoff("ingress-manager", config.backoff);
        let handler = Arc::new(EventHandler::new(
            queue.clone(),
            config.update_predicate,
            metrics.clone(),
        ));

        let (service_api, ingress_api): (Api<Service>, Api<Ingress>) = match &config.namespace {
            Some(namespace) => (
                Api::namespaced(self.client.clone(), namespace),
                Api::namespaced(self.client.clone(), namespace),
            ),
            None => (Api::all(self.client.clone()), Api::all(self.client.clone())),
        };

        let service_tracker = ChangeTracker::<Service>::new();
        let ingress_tracker = ChangeTracker::<Ingress>::new();
        let services = service_tracker.store();
        let ingresses = ingress_tracker.store();
        let service_status = SyncStatus::new();
        let ingress_status = SyncStatus::new();

        let mut service_pump: PumpHandle = tokio::spawn(run_pump(
            service_api,
            service_tracker,
            handler.clone(),
            service_status.clone(),
        ));
        let mut ingress_pump: PumpHandle = tokio::spawn(run_pump(
            ingress_api,
            ingress_tracker,
            handler,
            ingress_status.clone(),
        ));

        let probe_state = ProbeState::new(
            metrics.clone(),
            vec![service_status.clone(), ingress_status.clone()],
        );
        let probe_addr = config.probe_addr;
        let probe_stop = stop.clone();
        let probe_server = tokio::spawn(async move {
            if let Err(e) = probes::serve(probe_addr, probe_state, probe_stop).await {
                error!("Probe server failed: {}", e);
            }
        });

        info!("Waiting for Service and Ingress caches to sync");
        let mut sync_stop = stop.clone();
        tokio::select! {
            () = async {
                service_status.wait_synced().await;
                ingress_status.wait_synced().await;
            } => info!("Caches synced"),
            () = wait_for_stop(&mut sync_stop) => {
                info!("Stopped before caches synced");
                service_pump.abort();
                ingress_pump.abort();
                let _ = probe_server.await;
                return Ok(());
            }
            result = &mut service_pump => return Err(pump_exited("Service", result)),
            result = &mut ingress_pump => return Err(pump_exited("Ingress", result)),
        }

        let reconciler = Reconciler::new(
            Arc::new(services),
            Arc::new(ingresses),
            Box::new(IngressClient::new(self.client.clone())),
            IngressBuilder::new(config.template.clone()),
        );
        let retry = RetryPolicy::new(
            config.max_retries,
            Arc::new(TracingErrorReporter::new(metrics.clone())),
        );
        let worker = Worker::new(queue, Arc::new(reconciler), Arc::new(retry), metrics);
        let pool = WorkerPool::new(worker, config.workers, config.worker_restart_delay);

        info!("Ingress Manager Controller running");
        let pump_failure = async {
            tokio::select! {
                result = &mut service_pump => pump_exited("Service", result),
                result = &mut ingress_pump => pump_exited("Ingress", result),
            }
        };
        let result = drive_pool(&pool, stop, pump_failure).await;

        service_pump.abort();
        ingress_pump.abort();
        probe_server.abort();
        info!("Ingress Manager Controller stopped");
        result
    }
}

/// Runs `pool` until `stop` is raised or `failure` resolves.
///
/// Either way the pool is stopped through its own signal and awaited, so the
/// queue is shut down and in-flight syncs finish before this returns.
async fn drive_pool<F>(
    pool: &WorkerPool,
    mut stop: watch::Receiver<bool>,
    failure: F,
) -> Result<(), ControllerError>
where
    F: Future<Output = ControllerError>,
{
    let (pool_stop, pool_stop_rx) = watch::channel(false);
    let run = pool.run(pool_stop_rx);
    tokio::pin!(run);

    let result = tokio::select! {
        () = &mut run => return Ok(()),
        () = wait_for_stop(&mut stop) => Ok(()),
        err = failure => Err(err),
    };

    pool_stop.send_replace(true);
    run.await;
    result
}

fn pump_exited(kind: &str, result: Result<Result<(), ControllerError>, JoinError>) -> ControllerError {
    let err = match result {
        Ok(Ok(())) => ControllerError::Watch(format!("{} watcher exited", kind)),
        Ok(Err(e)) => e,
        Err(e) => ControllerError::Watch(format!("{} watcher panicked: {}", kind, e)),
    };
    error!("{}", err);
    err
}
