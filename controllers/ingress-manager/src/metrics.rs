//! Controller metrics
//!
//! Prometheus collectors owned by an injected [`Metrics`] handle rather than a
//! global registry, so tests get an isolated registry each.

use crate::error::ControllerError;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

const NAMESPACE: &str = "ingress_manager";

/// Controller metrics and the registry they are registered in
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Completed syncs by result (`created`, `deleted`, `in_sync`, `service_gone`, `error`)
    pub reconciliations: IntCounterVec,
    /// Sync duration in seconds
    pub reconcile_duration: Histogram,
    /// Keys requeued with backoff
    pub requeues: IntCounter,
    /// Keys dropped after exhausting retries or failing permanently
    pub abandoned: IntCounter,
    /// Keys ready in the work queue
    pub queue_depth: IntGauge,
    /// Watch events received by kind
    pub events: IntCounterVec,
}

impl Metrics {
    /// Creates the collectors and registers them in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new("reconciliations_total", "Total number of Service reconciliations")
                .namespace(NAMESPACE),
            &["result"],
        )?;
        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new(
                "reconcile_duration_seconds",
                "Service reconciliation duration in seconds",
            )
            .namespace(NAMESPACE),
        )?;
        let requeues = IntCounter::with_opts(
            Opts::new("requeues_total", "Keys requeued with backoff after a failed sync")
                .namespace(NAMESPACE),
        )?;
        let abandoned = IntCounter::with_opts(
            Opts::new("abandoned_total", "Keys dropped without a successful sync")
                .namespace(NAMESPACE),
        )?;
        let queue_depth = IntGauge::with_opts(
            Opts::new("queue_depth", "Keys ready to be processed").namespace(NAMESPACE),
        )?;
        let events = IntCounterVec::new(
            Opts::new("events_total", "Watch events received").namespace(NAMESPACE),
            &["kind"],
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(requeues.clone()))?;
        registry.register(Box::new(abandoned.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(events.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            reconcile_duration,
            requeues,
            abandoned,
            queue_depth,
            events,
        })
    }

    /// Records the number of keys ready in the work queue.
    pub fn set_queue_depth(&self, len: usize) {
        self.queue_depth.set(i64::try_from(len).unwrap_or(i64::MAX));
    }

    /// Renders all metrics in the Prometheus text format.
    pub fn render(&self) -> Result<String, ControllerError> {
        Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
    }
}
