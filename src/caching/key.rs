//! Cache keys with `Vary` support.

use std::collections::BTreeMap;

use axum::http::{HeaderMap, Method};

/// Cache key covering method, host, path+query, and the `Vary` fingerprint
///
/// The host is always part of the key so two services exposing the same
/// path can never collide. The fingerprint is an ordered map from
/// lowercased header name to the exact request header value, built from
/// the names a stored response declared in `Vary`; a "simple" key carries
/// an empty fingerprint. Equality is structural and keys are immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: Method,
    host: String,
    path_with_query: String,
    vary_fingerprint: BTreeMap<String, String>,
}

impl CacheKey {
    /// Create a simple cache key without `Vary` discrimination
    pub fn simple(method: Method, host: &str, path_with_query: &str) -> Self {
        Self {
            method,
            host: host.to_string(),
            path_with_query: path_with_query.to_string(),
            vary_fingerprint: BTreeMap::new(),
        }
    }

    /// Create a variant key from the request headers named by `Vary`
    ///
    /// Header names are split on `,`, trimmed, and lowercased; absent
    /// request headers contribute no entry. A literal `*` never reaches
    /// this constructor (the service refuses to cache such responses).
    pub fn with_vary(
        method: Method,
        host: &str,
        path_with_query: &str,
        request_headers: &HeaderMap,
        vary_header: &str,
    ) -> Self {
        let mut vary_fingerprint = BTreeMap::new();

        for raw_name in vary_header.split(',') {
            let name = raw_name.trim().to_ascii_lowercase();
            if name.is_empty() || name == "*" {
                continue;
            }
            if let Some(value) = request_headers.get(&name).and_then(|v| v.to_str().ok()) {
                vary_fingerprint.insert(name, value.to_string());
            }
        }

        Self {
            method,
            host: host.to_string(),
            path_with_query: path_with_query.to_string(),
            vary_fingerprint,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path_with_query(&self) -> &str {
        &self.path_with_query
    }

    /// Whether this key addresses the given resource, ignoring method and
    /// fingerprint
    pub(crate) fn matches_resource(&self, host: &str, path_with_query: &str) -> bool {
        self.host == host && self.path_with_query == path_with_query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                name.parse::<axum::http::HeaderName>().unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_simple_keys_are_structural() {
        let a = CacheKey::simple(Method::GET, "api.example.com", "/users?page=2");
        let b = CacheKey::simple(Method::GET, "api.example.com", "/users?page=2");
        assert_eq!(a, b);

        let other_host = CacheKey::simple(Method::GET, "other.example.com", "/users?page=2");
        assert_ne!(a, other_host);

        let other_method = CacheKey::simple(Method::HEAD, "api.example.com", "/users?page=2");
        assert_ne!(a, other_method);
    }

    #[test]
    fn test_vary_fingerprint_uses_exact_request_values() {
        let request = headers(&[("Accept-Encoding", "gzip"), ("Accept", "application/json")]);
        let key = CacheKey::with_vary(
            Method::GET,
            "api.example.com",
            "/data",
            &request,
            "Accept-Encoding, Accept",
        );

        let same = CacheKey::with_vary(
            Method::GET,
            "api.example.com",
            "/data",
            &headers(&[("accept-encoding", "gzip"), ("accept", "application/json")]),
            "accept-encoding,accept",
        );
        assert_eq!(key, same);

        let different_value = CacheKey::with_vary(
            Method::GET,
            "api.example.com",
            "/data",
            &headers(&[("Accept-Encoding", "br"), ("Accept", "application/json")]),
            "Accept-Encoding, Accept",
        );
        assert_ne!(key, different_value);
    }

    #[test]
    fn test_absent_headers_contribute_nothing() {
        let key = CacheKey::with_vary(
            Method::GET,
            "api.example.com",
            "/data",
            &HeaderMap::new(),
            "Accept-Encoding",
        );
        assert_eq!(
            key,
            CacheKey::simple(Method::GET, "api.example.com", "/data")
        );
    }

    #[test]
    fn test_matches_resource_ignores_method() {
        let key = CacheKey::simple(Method::HEAD, "api.example.com", "/users");
        assert!(key.matches_resource("api.example.com", "/users"));
        assert!(!key.matches_resource("api.example.com", "/users?x=1"));
        assert!(!key.matches_resource("other.example.com", "/users"));
    }
}
