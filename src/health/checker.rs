//! # Health Checker
//!
//! Periodically probes every configured host and flips its health bit in
//! the registry. Probes run concurrently, each with its own timeout, and
//! never touch the proxy data path. There is no hysteresis: a single probe
//! outcome flips the bit.

use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;

use crate::core::config::HealthCheckConfig;
use crate::core::error::{ProxyError, ProxyResult};
use crate::routing::{Host, Service, ServiceRegistry};

/// Periodic prober of `GET /health` on every backend host
///
/// A 2xx answer marks the host healthy; any other status, transport error,
/// or timeout marks it unhealthy.
pub struct HealthChecker {
    registry: Arc<ServiceRegistry>,
    client: reqwest::Client,
    config: HealthCheckConfig,
}

impl HealthChecker {
    pub fn new(registry: Arc<ServiceRegistry>, config: HealthCheckConfig) -> ProxyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .no_proxy()
            .build()
            .map_err(|e| ProxyError::internal(format!("Failed to build probe client: {}", e)))?;

        Ok(Self {
            registry,
            client,
            config,
        })
    }

    /// Start the background probe loop
    ///
    /// Waits out the initial delay, then probes all hosts once per
    /// interval until the task is aborted.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(self.config.initial_delay()).await;
            let mut interval = tokio::time::interval(self.config.interval());
            loop {
                interval.tick().await;
                self.run_once().await;
            }
        })
    }

    /// Probe every host of every service concurrently
    pub async fn run_once(&self) {
        debug!("Starting health check cycle");

        let mut probes = Vec::new();
        for service in self.registry.services() {
            for host in &service.hosts {
                probes.push(self.check_host(service.clone(), host.clone()));
            }
        }
        join_all(probes).await;
    }

    async fn check_host(&self, service: Arc<Service>, host: Arc<Host>) {
        let url = format!("http://{}{}", host.authority(), self.config.path);

        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                if !host.is_healthy() {
                    self.registry.mark_healthy(&service, &host);
                }
            }
            Ok(response) => {
                debug!(
                    "Health check failed for {} - status {}",
                    host.authority(),
                    response.status()
                );
                if host.is_healthy() {
                    self.registry.mark_unhealthy(&service, &host);
                }
            }
            Err(err) => {
                debug!("Health check failed for {} - {}", host.authority(), err);
                if host.is_healthy() {
                    self.registry.mark_unhealthy(&service, &host);
                }
            }
        }
    }
}
