//! Load balancing strategies for selecting one healthy host per request.

pub mod balancer;

pub use balancer::{BalancerSet, LoadBalancer, RandomBalancer, RoundRobinBalancer};
