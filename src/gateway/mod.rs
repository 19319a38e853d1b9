//! The client-facing HTTP server.

pub mod server;

pub use server::{build_router, AppState, ProxyServer};
