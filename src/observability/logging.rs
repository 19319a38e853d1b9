//! # Structured Logging
//!
//! Tracing subscriber initialization. The filter defaults to `info` for
//! the proxy itself and can be overridden through `RUST_LOG`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber
///
/// Safe to call once per process; panics if a subscriber is already set.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "reverse_proxy=info,tower_http=warn".into());

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(filter)
        .init();
}
