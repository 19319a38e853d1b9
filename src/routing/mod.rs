//! Host-based request routing: `Host` header canonicalization and the
//! service registry with its per-host liveness bits.

pub mod host;
pub mod registry;

pub use registry::{Host, Service, ServiceRegistry};
