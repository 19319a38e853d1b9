//! # HTTP Server Module
//!
//! The Axum server in front of the proxy engine. A single catch-all
//! handler buffers the request body up to the configured cap, captures the
//! client address, and hands the request to the engine; engine errors map
//! to their fixed status/body pairs.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::core::error::{ProxyError, ProxyResult};
use crate::proxy::engine::{InboundRequest, ProxyEngine, ProxyResponse};

/// Shared server state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ProxyEngine>,
    /// Hard cap on the buffered inbound body
    pub max_body_bytes: usize,
}

/// Build the proxy router: one catch-all route over the engine
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The client-facing HTTP server
pub struct ProxyServer {
    addr: SocketAddr,
    app: Router,
}

impl ProxyServer {
    pub fn new(state: AppState, addr: SocketAddr) -> Self {
        Self {
            addr,
            app: build_router(state),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind and serve until the task is aborted
    pub async fn start(self) -> ProxyResult<()> {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            ProxyError::internal(format!("Failed to bind server to {}: {}", self.addr, e))
        })?;

        info!("Proxy server listening on {}", self.addr);

        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| ProxyError::internal(format!("Server error: {}", e)))?;

        Ok(())
    }
}

/// Catch-all handler that feeds every request through the engine
async fn handle_request(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    // Set by into_make_service_with_connect_info; absent under test harnesses
    let client_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    let body_bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            // The length-limited reader is the only expected failure here
            if err.to_string().contains("exceeded") {
                warn!(
                    "Request body too large from {:?} (max {} bytes)",
                    client_addr, state.max_body_bytes
                );
                return ProxyError::BodyTooLarge {
                    limit: state.max_body_bytes,
                }
                .into_response();
            }
            warn!("Failed to read request body: {}", err);
            return ProxyError::internal("Failed to read request body").into_response();
        }
    };

    let inbound = InboundRequest::new(
        parts.method,
        &parts.uri,
        parts.headers,
        body_bytes,
        client_addr,
    );

    info!(
        "Received {} request to {} from {}",
        inbound.method,
        inbound.path,
        client_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );

    match state.engine.handle(inbound).await {
        Ok(response) => into_http_response(response),
        Err(err) => err.into_response(),
    }
}

fn into_http_response(response: ProxyResponse) -> Response {
    let mut http_response = Response::new(Body::from(response.body));
    *http_response.status_mut() = response.status;
    *http_response.headers_mut() = response.headers;
    http_response
}
