//! # Header Rewriting
//!
//! Hop-by-hop header filtering and `X-Forwarded-*` injection. Filtering is
//! applied in both directions: to request headers before the upstream call
//! and to response headers before replying (or caching), so connection-level
//! headers never traverse the proxy.
//!
//! `Content-Length` is treated as recomputed at each hop and stripped along
//! with the hop-by-hop set; the HTTP layer re-derives it from the actual
//! body, which keeps cached and 304-merged replies from carrying a stale
//! length.

use std::collections::HashSet;
use std::net::IpAddr;

use axum::http::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, HOST};

/// Static hop-by-hop header set, per RFC 9110 §7.6.1
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

fn is_static_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Header names listed in `Connection`, lowercased
///
/// Each token names a header that must also be treated as hop-by-hop.
pub fn connection_header_tokens(headers: &HeaderMap) -> HashSet<String> {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

fn filter(headers: &HeaderMap, drop_host: bool) -> HeaderMap {
    let connection_tokens = connection_header_tokens(headers);
    let mut filtered = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers {
        if drop_host && *name == HOST {
            continue;
        }
        if *name == CONTENT_LENGTH {
            continue;
        }
        if is_static_hop_by_hop(name) || connection_tokens.contains(name.as_str()) {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }

    filtered
}

/// Filter request headers for the upstream call
///
/// Drops the original `Host` (the client derives it from the target URL),
/// the static hop-by-hop set, and every header named in `Connection`.
pub fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    filter(headers, true)
}

/// Filter response headers before replying to the client or caching
pub fn filter_response_headers(headers: &HeaderMap) -> HeaderMap {
    filter(headers, false)
}

/// Append the `X-Forwarded-*` triple to an outgoing header set
///
/// `X-Forwarded-For` appends the client IP to any pre-existing value with
/// a comma and space; an unknown client address contributes the literal
/// `unknown`. `X-Forwarded-Host` carries the original `Host` header value.
pub fn append_forwarded_headers(
    outgoing: &mut HeaderMap,
    original: &HeaderMap,
    client_ip: Option<IpAddr>,
    scheme: &str,
) {
    let client = client_ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let forwarded_for = match original
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        Some(existing) => format!("{}, {}", existing, client),
        None => client,
    };

    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        outgoing.insert("x-forwarded-for", value);
    }
    if let Ok(value) = HeaderValue::from_str(scheme) {
        outgoing.insert("x-forwarded-proto", value);
    }
    if let Some(host) = original.get(HOST) {
        outgoing.insert("x-forwarded-host", host.clone());
    }
}
