//! # Gateway Server Tests
//!
//! Router-level tests exercising the HTTP layer in front of the engine:
//! the body size boundary, synthetic error bodies, and pass-through of
//! upstream responses.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use tower::ServiceExt;

use reverse_proxy::caching::CacheService;
use reverse_proxy::core::config::{HostConfig, ProxyConfig, ServiceConfig, Strategy};
use reverse_proxy::gateway::server::{build_router, AppState};
use reverse_proxy::proxy::engine::ProxyEngine;
use reverse_proxy::routing::ServiceRegistry;

const DOMAIN: &str = "svc.local";
const MAX_BODY: usize = 10 * 1024 * 1024;

async fn spawn_upstream(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn app_with_backends(backends: &[SocketAddr]) -> Router {
    let services = vec![ServiceConfig {
        name: "svc".to_string(),
        domain: DOMAIN.to_string(),
        strategy: Strategy::RoundRobin,
        hosts: backends
            .iter()
            .map(|addr| HostConfig {
                address: addr.ip().to_string(),
                port: addr.port(),
                healthy: true,
            })
            .collect(),
    }];

    let registry = Arc::new(ServiceRegistry::from_config(&services).unwrap());
    let cache = Arc::new(CacheService::new(16));
    let config = ProxyConfig {
        services,
        ..Default::default()
    };
    let engine = Arc::new(ProxyEngine::new(registry, cache, &config).unwrap());

    build_router(AppState {
        engine,
        max_body_bytes: MAX_BODY,
    })
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_body_one_byte_over_limit_is_413() {
    let app = app_with_backends(&[]);

    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header("host", DOMAIN)
        .body(Body::from(vec![0u8; MAX_BODY + 1]))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(
        body_string(response).await,
        "Request body too large. Max size: 10MB"
    );
}

#[tokio::test]
async fn test_body_at_exact_limit_is_accepted() {
    let upstream = spawn_upstream(Router::new().fallback(|body: Bytes| async move {
        body.len().to_string()
    }))
    .await;
    let app = app_with_backends(&[upstream]);

    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header("host", DOMAIN)
        .body(Body::from(vec![0u8; MAX_BODY]))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, MAX_BODY.to_string());
}

#[tokio::test]
async fn test_missing_host_is_400_with_fixed_body() {
    let app = app_with_backends(&[]);

    let request = Request::builder()
        .method("GET")
        .uri("/x")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_string(response).await, "Missing Host header");
}

#[tokio::test]
async fn test_unknown_host_is_404_with_empty_body() {
    let app = app_with_backends(&[]);

    let request = Request::builder()
        .method("GET")
        .uri("/x")
        .header("host", "unknown.example.com")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_string(response).await, "");
}

#[tokio::test]
async fn test_upstream_response_passes_through() {
    let upstream = spawn_upstream(Router::new().fallback(|| async {
        (
            StatusCode::IM_A_TEAPOT,
            [("x-upstream", "yes")],
            "short and stout",
        )
    }))
    .await;
    let app = app_with_backends(&[upstream]);

    let request = Request::builder()
        .method("GET")
        .uri("/tea")
        .header("host", DOMAIN)
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(response.headers().get("x-upstream").unwrap(), "yes");
    assert_eq!(body_string(response).await, "short and stout");
}
