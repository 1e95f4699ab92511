//! Controller configuration.
//!
//! Loaded from environment variables at startup. Every setting has a default
//! except where noted; malformed values are rejected with `InvalidConfig`.

use crate::builder::{IngressTemplate, DEFAULT_BACKEND_PORT};
use crate::error::ControllerError;
use crate::events::UpdatePredicate;
use crate::retry::DEFAULT_MAX_RETRIES;
use crate::worker::{DEFAULT_RESTART_DELAY, DEFAULT_WORKERS};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use workqueue::backoff::{ExponentialBackoff, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};

/// Default listen address for metrics and probes
pub const DEFAULT_PROBE_ADDR: &str = "0.0.0.0:8080";

/// Runtime configuration of the controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Number of workers
    pub workers: usize,
    /// Requeues allowed for a failing key before it is dropped
    pub max_retries: u32,
    /// Cool-down before a crashed worker is restarted
    pub worker_restart_delay: Duration,
    /// Per-key requeue backoff
    pub backoff: ExponentialBackoff,
    /// Shape of the derived Ingresses
    pub template: IngressTemplate,
    /// Which Service updates trigger a sync
    pub update_predicate: UpdatePredicate,
    /// Listen address for `/metrics`, `/healthz` and `/readyz`
    pub probe_addr: SocketAddr,
}

impl ControllerConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads the configuration from `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let workers = parse(&var, "WORKERS", DEFAULT_WORKERS)?;
        if workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "WORKERS must be greater than 0".to_string(),
            ));
        }

        let backend_port = parse(&var, "BACKEND_PORT", DEFAULT_BACKEND_PORT)?;
        if !(1..=65535).contains(&backend_port) {
            return Err(ControllerError::InvalidConfig(format!(
                "BACKEND_PORT must be between 1 and 65535, got {}",
                backend_port
            )));
        }

        let defaults = IngressTemplate::default();
        let template = IngressTemplate {
            class_name: var("INGRESS_CLASS").unwrap_or(defaults.class_name),
            host: var("INGRESS_HOST").unwrap_or(defaults.host),
            path: var("INGRESS_PATH").unwrap_or(defaults.path),
            backend_port,
        };
        if !template.path.starts_with('/') {
            return Err(ControllerError::InvalidConfig(format!(
                "INGRESS_PATH must start with '/', got {:?}",
                template.path
            )));
        }

        let backoff = ExponentialBackoff::new(
            Duration::from_millis(parse(
                &var,
                "BACKOFF_BASE_MS",
                DEFAULT_BASE_DELAY.as_millis() as u64,
            )?),
            Duration::from_secs(parse(&var, "BACKOFF_MAX_SECS", DEFAULT_MAX_DELAY.as_secs())?),
        );

        Ok(Self {
            namespace: var("WATCH_NAMESPACE"),
            workers,
            max_retries: parse(&var, "MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            worker_restart_delay: Duration::from_secs(parse(
                &var,
                "WORKER_RESTART_SECS",
                DEFAULT_RESTART_DELAY.as_secs(),
            )?),
            backoff,
            template,
            update_predicate: parse(&var, "UPDATE_PREDICATE", UpdatePredicate::default())?,
            probe_addr: match var("PROBE_ADDR") {
                Some(addr) => parse_value("PROBE_ADDR", &addr)?,
                None => parse_value("PROBE_ADDR", DEFAULT_PROBE_ADDR)?,
            },
        })
    }
}

fn parse<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(value) => parse_value(name, &value),
        None => Ok(default),
    }
}

fn parse_value<T>(name: &str, value: &str) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| {
        ControllerError::InvalidConfig(format!("{} has invalid value {:?}: {}", name, value, e))
    })
}
