//! Periodic health probing of backend hosts.

pub mod checker;

pub use checker::HealthChecker;
