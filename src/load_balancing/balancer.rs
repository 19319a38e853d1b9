//! # Load Balancer Module
//!
//! Load balancing strategies for upstream hosts. A balancer picks one host
//! out of the already-materialized healthy subset of a service; it returns
//! `None` exactly when that subset is empty.
//!
//! Round-robin keeps one atomic counter per service, keyed by the service's
//! stable registry id rather than its display name, so two services that
//! happen to share a name can never share a counter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use rand::Rng;
use tracing::{debug, warn};

use crate::core::config::Strategy;
use crate::routing::{Host, Service};

/// Core trait for load balancing algorithms
///
/// `healthy` is the service's healthy-host subset in configuration order.
/// Implementations must not reorder it; round-robin fairness depends on the
/// registry keeping host order stable.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    /// Select a host from the healthy pool, or `None` if the pool is empty
    async fn select(&self, service: &Service, healthy: &[Arc<Host>]) -> Option<Arc<Host>>;

    /// Get the strategy name for metrics and logging
    fn strategy_name(&self) -> &'static str;
}

/// Round-robin load balancer with one atomic counter per service
pub struct RoundRobinBalancer {
    counters: DashMap<usize, AtomicUsize>,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for RoundRobinBalancer {
    async fn select(&self, service: &Service, healthy: &[Arc<Host>]) -> Option<Arc<Host>> {
        if healthy.is_empty() {
            counter!("load_balancer_failed_selections").increment(1);
            warn!(service = %service.name, "No hosts available for selection");
            return None;
        }

        let counter = self
            .counters
            .entry(service.id)
            .or_insert_with(|| AtomicUsize::new(0));

        // fetch_add wraps on overflow; the modulo keeps the index in range
        let index = counter.fetch_add(1, Ordering::Relaxed) % healthy.len();
        let selected = healthy[index].clone();

        counter!("load_balancer_selections").increment(1);
        debug!(
            service = %service.name,
            host = %selected.authority(),
            index,
            algorithm = "round_robin",
            "Selected host"
        );

        Some(selected)
    }

    fn strategy_name(&self) -> &'static str {
        "round-robin"
    }
}

/// Random load balancer with uniform selection over healthy hosts
pub struct RandomBalancer;

impl RandomBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RandomBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for RandomBalancer {
    async fn select(&self, service: &Service, healthy: &[Arc<Host>]) -> Option<Arc<Host>> {
        if healthy.is_empty() {
            counter!("load_balancer_failed_selections").increment(1);
            warn!(service = %service.name, "No hosts available for selection");
            return None;
        }

        let index = rand::thread_rng().gen_range(0..healthy.len());
        let selected = healthy[index].clone();

        counter!("load_balancer_selections").increment(1);
        debug!(
            service = %service.name,
            host = %selected.authority(),
            algorithm = "random",
            "Selected host"
        );

        Some(selected)
    }

    fn strategy_name(&self) -> &'static str {
        "random"
    }
}

/// The set of registered balancers, dispatched by strategy tag
///
/// Both balancers live for the process lifetime; round-robin state in
/// particular must survive across requests.
pub struct BalancerSet {
    round_robin: Arc<RoundRobinBalancer>,
    random: Arc<RandomBalancer>,
}

impl BalancerSet {
    pub fn new() -> Self {
        Self {
            round_robin: Arc::new(RoundRobinBalancer::new()),
            random: Arc::new(RandomBalancer::new()),
        }
    }

    /// Look up the balancer for a service's configured strategy
    pub fn for_strategy(&self, strategy: Strategy) -> Arc<dyn LoadBalancer> {
        match strategy {
            Strategy::RoundRobin => self.round_robin.clone(),
            Strategy::Random => self.random.clone(),
        }
    }
}

impl Default for BalancerSet {
    fn default() -> Self {
        Self::new()
    }
}
