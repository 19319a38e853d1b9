//! # Service Registry
//!
//! The registry holds the immutable service topology loaded at startup and
//! the one piece of runtime-mutable state attached to it: the per-host
//! health bit. Lookup by canonical domain is O(1) and case-insensitive.
//!
//! The host list of a service is never reordered or resized after startup;
//! round-robin fairness depends on that.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::core::config::{ServiceConfig, Strategy};
use crate::core::error::{ProxyError, ProxyResult};
use crate::routing::host::normalize_host;

/// A single backend host with its mutable health state
///
/// Created at startup from configuration, mutated only by the health
/// checker (and by the engine on upstream transport errors), destroyed on
/// process exit.
#[derive(Debug)]
pub struct Host {
    pub address: String,
    pub port: u16,
    healthy: AtomicBool,
    last_checked_at: RwLock<Option<Instant>>,
}

impl Host {
    fn new(address: String, port: u16, healthy: bool) -> Self {
        Self {
            address,
            port,
            healthy: AtomicBool::new(healthy),
            last_checked_at: RwLock::new(None),
        }
    }

    /// Current health bit, read with acquire semantics
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// When this host was last probed or flipped
    pub fn last_checked_at(&self) -> Option<Instant> {
        *self.last_checked_at.read()
    }

    /// `address:port` for URLs and log lines
    pub fn authority(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Set the health bit with release semantics, returning the prior value
    fn flip(&self, healthy: bool) -> bool {
        let previous = self.healthy.swap(healthy, Ordering::AcqRel);
        *self.last_checked_at.write() = Some(Instant::now());
        previous
    }
}

/// An immutable service definition
#[derive(Debug)]
pub struct Service {
    /// Stable registry slot, used to key round-robin counters
    pub id: usize,
    pub name: String,
    /// Canonical domain (lowercased, port stripped)
    pub domain: String,
    pub strategy: Strategy,
    /// Hosts in configuration order; the order is stable for the lifetime
    /// of the process
    pub hosts: Vec<Arc<Host>>,
}

/// Registry of all configured services, indexed by canonical domain
pub struct ServiceRegistry {
    services: Vec<Arc<Service>>,
    by_domain: HashMap<String, Arc<Service>>,
}

impl ServiceRegistry {
    /// Build the registry from configuration
    ///
    /// Fails on empty or duplicate domains; everything else was validated
    /// by the config loader.
    pub fn from_config(services: &[ServiceConfig]) -> ProxyResult<Self> {
        let mut registered = Vec::with_capacity(services.len());
        let mut by_domain = HashMap::with_capacity(services.len());

        for (id, config) in services.iter().enumerate() {
            let domain = normalize_host(&config.domain).ok_or_else(|| {
                ProxyError::config(format!("Service {} has an empty domain", config.name))
            })?;

            let hosts = config
                .hosts
                .iter()
                .map(|h| Arc::new(Host::new(h.address.clone(), h.port, h.healthy)))
                .collect();

            let service = Arc::new(Service {
                id,
                name: config.name.clone(),
                domain: domain.clone(),
                strategy: config.strategy,
                hosts,
            });

            if by_domain.insert(domain.clone(), service.clone()).is_some() {
                return Err(ProxyError::config(format!(
                    "Duplicate service domain: {}",
                    domain
                )));
            }

            info!(
                service = %service.name,
                domain = %service.domain,
                strategy = %service.strategy,
                hosts = service.hosts.len(),
                "Registered service"
            );
            registered.push(service);
        }

        Ok(Self {
            services: registered,
            by_domain,
        })
    }

    /// Resolve a raw `Host` header value to a service
    pub fn resolve(&self, host_header: &str) -> Option<Arc<Service>> {
        let domain = normalize_host(host_header)?;
        self.resolve_domain(&domain)
    }

    /// Resolve an already-canonical domain to a service
    pub fn resolve_domain(&self, domain: &str) -> Option<Arc<Service>> {
        self.by_domain.get(domain).cloned()
    }

    /// The hosts of `service` whose health bit is currently set, in
    /// configuration order
    pub fn healthy_hosts(&self, service: &Service) -> Vec<Arc<Host>> {
        service
            .hosts
            .iter()
            .filter(|host| host.is_healthy())
            .cloned()
            .collect()
    }

    /// Flip a host to healthy; idempotent, logs only on transition
    pub fn mark_healthy(&self, service: &Service, host: &Host) {
        if !host.flip(true) {
            info!(
                service = %service.name,
                host = %host.authority(),
                "Host marked healthy"
            );
        }
    }

    /// Flip a host to unhealthy; idempotent, logs only on transition
    pub fn mark_unhealthy(&self, service: &Service, host: &Host) {
        if host.flip(false) {
            warn!(
                service = %service.name,
                host = %host.authority(),
                "Host marked unhealthy"
            );
        }
    }

    /// All registered services
    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }
}
