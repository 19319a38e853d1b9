//! # Reverse Proxy - Main Entry Point
//!
//! A host-based HTTP/1.1 reverse proxy with a shared in-memory response
//! cache. The binary wires the pieces together:
//! - `core::config`: configuration loading and validation
//! - `routing`: host canonicalization and the service registry
//! - `load_balancing`: per-service host selection
//! - `caching`: the shared RFC 9111 response cache
//! - `health`: periodic background probing of backend hosts
//! - `proxy`: the request pipeline
//! - `gateway`: the client-facing Axum server

use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};

use reverse_proxy::caching::CacheService;
use reverse_proxy::core::config::ProxyConfig;
use reverse_proxy::core::error::ProxyResult;
use reverse_proxy::gateway::server::{AppState, ProxyServer};
use reverse_proxy::health::HealthChecker;
use reverse_proxy::observability::logging;
use reverse_proxy::proxy::engine::ProxyEngine;
use reverse_proxy::routing::ServiceRegistry;

#[tokio::main]
async fn main() -> ProxyResult<()> {
    logging::init();

    info!("🚀 Starting reverse proxy");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path =
        std::env::var("PROXY_CONFIG_PATH").unwrap_or_else(|_| "config/proxy.yaml".to_string());

    let config = ProxyConfig::load_from_file(&config_path).await.map_err(|e| {
        error!("Failed to load configuration from {}: {}", config_path, e);
        e
    })?;
    info!("Configuration loaded from {}", config_path);

    let listen_addr = config.listen.socket_addr()?;

    let registry = Arc::new(ServiceRegistry::from_config(&config.services)?);
    let cache = Arc::new(CacheService::new(config.cache.max_entries));
    let engine = Arc::new(ProxyEngine::new(registry.clone(), cache.clone(), &config)?);

    let checker = Arc::new(HealthChecker::new(registry, config.health_check.clone())?);
    let checker_handle = checker.spawn();

    let server = ProxyServer::new(
        AppState {
            engine,
            max_body_bytes: config.limits.max_body_bytes,
        },
        listen_addr,
    );

    info!("🌐 Proxy ready on {}", listen_addr);

    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = server.start().await {
            error!("Server error: {}", e);
        }
    });

    tokio::select! {
        _ = shutdown_signal() => {
            info!("📡 Shutdown signal received, stopping...");
            server_handle.abort();
            checker_handle.abort();
        }
        result = &mut server_handle => {
            checker_handle.abort();
            match result {
                Ok(_) => warn!("Server task exited"),
                Err(e) => error!("Server task failed: {}", e),
            }
        }
    }

    info!("✅ Reverse proxy shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT
async fn shutdown_signal() {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("Failed to install SIGTERM handler");
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("Failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT (Ctrl+C)"),
    }
}
