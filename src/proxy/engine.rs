//! # Proxy Engine
//!
//! The request pipeline: resolve the service from the `Host` header,
//! invalidate or consult the cache depending on the method, pick a healthy
//! host, forward, and interpret the response (cache insert, 304
//! revalidation update, or pass-through).
//!
//! The engine is the only component with side effects: cache mutations,
//! health-bit flips on upstream transport errors, and log emissions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::header::{HOST, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use bytes::Bytes;
use metrics::{counter, histogram};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::caching::{is_safe_method, CacheService, CachedEntry};
use crate::core::config::ProxyConfig;
use crate::core::error::{ProxyError, ProxyResult};
use crate::load_balancing::BalancerSet;
use crate::proxy::headers;
use crate::routing::host::normalize_host;
use crate::routing::ServiceRegistry;

/// Methods that trigger cache invalidation for their resource
fn is_unsafe_method(method: &Method) -> bool {
    *method == Method::POST
        || *method == Method::PUT
        || *method == Method::PATCH
        || *method == Method::DELETE
}

/// Methods whose body is forwarded upstream
fn forwards_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

/// An inbound request after the HTTP layer has buffered the body
#[derive(Debug)]
pub struct InboundRequest {
    /// Request id for log correlation
    pub id: String,
    pub method: Method,
    pub path: String,
    pub raw_query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_addr: Option<SocketAddr>,
    /// Inbound scheme, reported upstream as `X-Forwarded-Proto`
    pub scheme: String,
}

impl InboundRequest {
    pub fn new(
        method: Method,
        uri: &Uri,
        headers: HeaderMap,
        body: Bytes,
        client_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method,
            path: uri.path().to_string(),
            raw_query: uri.query().map(str::to_string),
            headers,
            body,
            client_addr,
            scheme: uri.scheme_str().unwrap_or("http").to_string(),
        }
    }

    /// Raw path plus `?<raw_query>` when the query is non-empty
    pub fn path_with_query(&self) -> String {
        match self.raw_query.as_deref() {
            Some(query) if !query.is_empty() => format!("{}?{}", self.path, query),
            _ => self.path.clone(),
        }
    }
}

/// The response handed back to the HTTP layer
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Orchestrates the per-request pipeline
pub struct ProxyEngine {
    registry: Arc<ServiceRegistry>,
    balancers: BalancerSet,
    cache: Arc<CacheService>,
    client: reqwest::Client,
    upstream_timeout: Duration,
}

impl ProxyEngine {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        cache: Arc<CacheService>,
        config: &ProxyConfig,
    ) -> ProxyResult<Self> {
        // This process is the proxy; never route upstream calls through an
        // environment-configured one
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|e| ProxyError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            registry,
            balancers: BalancerSet::new(),
            cache,
            client,
            upstream_timeout: config.upstream.request_timeout(),
        })
    }

    /// Run one request through the pipeline
    #[instrument(skip_all, fields(request_id = %request.id, method = %request.method, path = %request.path))]
    pub async fn handle(&self, request: InboundRequest) -> ProxyResult<ProxyResponse> {
        let host_header = match request.headers.get(HOST).and_then(|v| v.to_str().ok()) {
            Some(value) => value.to_string(),
            None => {
                warn!("Missing Host header in request");
                return Err(ProxyError::MissingHost);
            }
        };

        let canonical_host = match normalize_host(&host_header) {
            Some(host) => host,
            None => {
                warn!("Missing Host header in request");
                return Err(ProxyError::MissingHost);
            }
        };

        let service = self.registry.resolve_domain(&canonical_host).ok_or_else(|| {
            warn!("No service found for domain: {}", canonical_host);
            ProxyError::UnknownHost {
                domain: canonical_host.clone(),
            }
        })?;

        let path_with_query = request.path_with_query();

        if is_unsafe_method(&request.method) {
            self.cache.invalidate_unsafe(&canonical_host, &path_with_query);
        }

        let cached = if is_safe_method(&request.method) {
            self.cache.lookup(
                &request.method,
                &canonical_host,
                &path_with_query,
                &request.headers,
            )
        } else {
            None
        };

        if let Some(entry) = &cached {
            if entry.is_servable() {
                info!("Cache HIT (fresh): {} {}", request.method, path_with_query);
                return Ok(response_from_entry(entry, &request.method));
            }
        }

        let healthy = self.registry.healthy_hosts(&service);
        if healthy.is_empty() {
            error!(service = %service.name, "No healthy hosts available");
            return Err(ProxyError::NoHealthyHosts {
                service: service.name.clone(),
            });
        }

        let balancer = self.balancers.for_strategy(service.strategy);
        let host = match balancer.select(&service, &healthy).await {
            Some(host) => host,
            None => {
                error!(service = %service.name, "Load balancer returned no host");
                return Err(ProxyError::SelectionFailed {
                    service: service.name.clone(),
                });
            }
        };

        let target_url = format!("http://{}{}", host.authority(), path_with_query);
        debug!("Forwarding request to: {}", target_url);

        match self
            .forward(&request, &target_url, cached.as_ref())
            .await
        {
            Ok((status, response_headers, body)) => {
                self.interpret_response(
                    &request,
                    &canonical_host,
                    &path_with_query,
                    cached,
                    status,
                    response_headers,
                    body,
                )
            }
            Err(err) => {
                error!(
                    host = %host.authority(),
                    error = %err,
                    "Error forwarding request"
                );
                if err.marks_host_unhealthy() {
                    counter!("upstream_transport_errors_total").increment(1);
                    self.registry.mark_unhealthy(&service, &host);
                }
                Err(err)
            }
        }
    }

    /// Issue the upstream request and buffer the response
    async fn forward(
        &self,
        request: &InboundRequest,
        target_url: &str,
        cached: Option<&CachedEntry>,
    ) -> ProxyResult<(StatusCode, HeaderMap, Bytes)> {
        let mut upstream_headers = headers::filter_request_headers(&request.headers);
        headers::append_forwarded_headers(
            &mut upstream_headers,
            &request.headers,
            request.client_addr.map(|addr| addr.ip()),
            &request.scheme,
        );

        // Conditional headers from the stale entry's validators
        if let Some(entry) = cached {
            if let Some(etag) = &entry.etag {
                if let Ok(value) = HeaderValue::from_str(etag) {
                    debug!("Added If-None-Match: {}", etag);
                    upstream_headers.insert(IF_NONE_MATCH, value);
                }
            }
            if let Some(date) = entry.if_modified_since_value() {
                if let Ok(value) = HeaderValue::from_str(&date) {
                    debug!("Added If-Modified-Since: {}", date);
                    upstream_headers.insert(IF_MODIFIED_SINCE, value);
                }
            }
        }

        let mut builder = self
            .client
            .request(request.method.clone(), target_url)
            .headers(upstream_headers)
            .timeout(self.upstream_timeout);

        if forwards_body(&request.method) && !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(classify_upstream_error)?;

        let status = response.status();
        let response_headers = response.headers().clone();
        let body = response.bytes().await.map_err(classify_upstream_error)?;

        histogram!("upstream_request_duration_seconds").record(started.elapsed().as_secs_f64());
        Ok((status, response_headers, body))
    }

    /// Turn the upstream response into the downstream one, updating the
    /// cache along the way
    #[allow(clippy::too_many_arguments)]
    fn interpret_response(
        &self,
        request: &InboundRequest,
        canonical_host: &str,
        path_with_query: &str,
        cached: Option<CachedEntry>,
        status: StatusCode,
        response_headers: HeaderMap,
        body: Bytes,
    ) -> ProxyResult<ProxyResponse> {
        // A 304 against a cached entry becomes a 200 with the stored body
        if status == StatusCode::NOT_MODIFIED {
            if let Some(entry) = cached {
                info!(
                    "304 Not Modified: {} {} - using cached body",
                    request.method, path_with_query
                );
                let refreshed = self
                    .cache
                    .update_after_revalidation(
                        &request.method,
                        canonical_host,
                        path_with_query,
                        &request.headers,
                        &response_headers,
                    )
                    .unwrap_or(entry);

                let filtered = headers::filter_response_headers(&response_headers);
                let mut merged = refreshed.headers.clone();
                for name in filtered.keys() {
                    merged.remove(name);
                }
                for (name, value) in &filtered {
                    merged.append(name.clone(), value.clone());
                }

                let body = if request.method == Method::HEAD {
                    Bytes::new()
                } else {
                    refreshed.body.clone()
                };
                return Ok(ProxyResponse {
                    status: StatusCode::OK,
                    headers: merged,
                    body,
                });
            }
        }

        let filtered = headers::filter_response_headers(&response_headers);

        if is_safe_method(&request.method) && status == StatusCode::OK {
            self.cache.store_response(
                &request.method,
                canonical_host,
                path_with_query,
                &request.headers,
                status,
                &filtered,
                &body,
            );
        }

        Ok(ProxyResponse {
            status,
            headers: filtered,
            body,
        })
    }
}

/// Serve a response directly from a cached entry
///
/// A HEAD request gets the stored headers with an empty body; a cached GET
/// body is never replayed for HEAD.
fn response_from_entry(entry: &CachedEntry, method: &Method) -> ProxyResponse {
    let body = if *method == Method::HEAD {
        Bytes::new()
    } else {
        entry.body.clone()
    };
    ProxyResponse {
        status: entry.status,
        headers: entry.headers.clone(),
        body,
    }
}

/// Classify a reqwest failure into the error taxonomy
///
/// Decode failures mean the host spoke, just badly; everything else
/// (connect, DNS, timeout, reset) is a transport error that flips the
/// host's health bit.
fn classify_upstream_error(err: reqwest::Error) -> ProxyError {
    if err.is_decode() {
        ProxyError::UpstreamProtocol {
            detail: err.to_string(),
        }
    } else {
        ProxyError::UpstreamTransport {
            detail: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, uri: &str) -> InboundRequest {
        InboundRequest::new(
            method,
            &uri.parse::<Uri>().unwrap(),
            HeaderMap::new(),
            Bytes::new(),
            None,
        )
    }

    #[test]
    fn test_path_with_query() {
        assert_eq!(
            request(Method::GET, "/users?page=2&sort=asc").path_with_query(),
            "/users?page=2&sort=asc"
        );
        assert_eq!(request(Method::GET, "/users").path_with_query(), "/users");
        assert_eq!(request(Method::GET, "/users?").path_with_query(), "/users");
    }

    #[test]
    fn test_method_classification() {
        for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
            assert!(is_unsafe_method(&method), "{}", method);
        }
        assert!(!is_unsafe_method(&Method::GET));
        assert!(!is_unsafe_method(&Method::HEAD));

        assert!(forwards_body(&Method::POST));
        assert!(forwards_body(&Method::PUT));
        assert!(forwards_body(&Method::PATCH));
        assert!(!forwards_body(&Method::DELETE));
        assert!(!forwards_body(&Method::GET));
    }

    #[test]
    fn test_head_served_from_cache_has_no_body() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        let entry = CachedEntry::from_response(
            StatusCode::OK,
            headers,
            Bytes::from_static(b"{\"data\":1}"),
        );

        let head = response_from_entry(&entry, &Method::HEAD);
        assert!(head.body.is_empty());
        assert!(head.headers.contains_key("content-type"));

        let get = response_from_entry(&entry, &Method::GET);
        assert_eq!(get.body, Bytes::from_static(b"{\"data\":1}"));
    }
}
