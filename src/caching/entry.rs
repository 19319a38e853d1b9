//! Cached responses and `Cache-Control` directive parsing.

use std::time::Instant;

use axum::http::header::{CACHE_CONTROL, ETAG, LAST_MODIFIED};
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::warn;

/// Parsed `Cache-Control` directives
///
/// Parsing tokenizes on `,`, trims, and splits each token on `=` before
/// classification, so `private` buried inside an extension token such as
/// `x-private-ext` does not false-match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDirectives {
    pub max_age: Option<u64>,
    pub s_max_age: Option<u64>,
    pub no_cache: bool,
    pub no_store: bool,
    pub must_revalidate: bool,
    pub proxy_revalidate: bool,
    pub is_private: bool,
    pub is_public: bool,
}

impl CacheDirectives {
    /// Parse a `Cache-Control` header value, case-insensitively
    ///
    /// Malformed `max-age`/`s-maxage` values (non-numeric, negative) are
    /// rejected; unknown directives are ignored.
    pub fn parse(header: &str) -> Self {
        let mut directives = Self::default();

        for token in header.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }

            let (name, value) = match token.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim())),
                None => (token, None),
            };

            match name.to_ascii_lowercase().as_str() {
                "max-age" => directives.max_age = value.and_then(parse_delta_seconds),
                "s-maxage" => directives.s_max_age = value.and_then(parse_delta_seconds),
                "no-cache" => directives.no_cache = true,
                "no-store" => directives.no_store = true,
                "must-revalidate" => directives.must_revalidate = true,
                "proxy-revalidate" => directives.proxy_revalidate = true,
                "private" => directives.is_private = true,
                "public" => directives.is_public = true,
                _ => {}
            }
        }

        directives
    }

    /// Freshness lifetime for a shared cache: `s-maxage` wins over
    /// `max-age`; no heuristic fallback
    pub fn effective_lifetime(&self) -> Option<u64> {
        self.s_max_age.or(self.max_age)
    }

    /// Whether these directives permit storage in a shared cache
    pub fn grants_caching(&self) -> bool {
        !self.no_store
            && !self.is_private
            && (self.is_public || self.max_age.is_some() || self.s_max_age.is_some())
    }
}

fn parse_delta_seconds(raw: &str) -> Option<u64> {
    raw.trim_matches('"').parse::<u64>().ok()
}

/// A cached HTTP response with validation metadata
///
/// Headers are already filtered of hop-by-hop headers before the entry is
/// constructed, so serving from cache never re-emits them. The entry is
/// logically immutable except for `cached_at`, `directives`, and `etag`,
/// which a successful 304 revalidation rewrites.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub cached_at: Instant,
    pub directives: CacheDirectives,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl CachedEntry {
    /// Build an entry from an upstream response
    pub fn from_response(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        let etag = headers
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let last_modified = headers
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|raw| match DateTime::parse_from_rfc2822(raw) {
                Ok(parsed) => Some(parsed.with_timezone(&Utc)),
                Err(_) => {
                    warn!("Invalid Last-Modified header: {}", raw);
                    None
                }
            });

        let directives = headers
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .map(CacheDirectives::parse)
            .unwrap_or_default();

        Self {
            status,
            headers,
            body,
            cached_at: Instant::now(),
            directives,
            etag,
            last_modified,
        }
    }

    /// Age of the entry in whole seconds at `now`
    pub fn age_at(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.cached_at).as_secs()
    }

    /// Current age in whole seconds
    pub fn age_seconds(&self) -> u64 {
        self.age_at(Instant::now())
    }

    /// Freshness at `now`: age strictly below the effective lifetime, and
    /// neither `no-store` nor `private` set
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        if self.directives.no_store || self.directives.is_private {
            return false;
        }
        match self.directives.effective_lifetime() {
            Some(lifetime) => self.age_at(now) < lifetime,
            None => false,
        }
    }

    /// Current freshness
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Instant::now())
    }

    /// Whether the entry must be revalidated before reuse, regardless of age
    pub fn requires_revalidation(&self) -> bool {
        self.directives.no_cache
            || self.directives.must_revalidate
            || self.directives.proxy_revalidate
    }

    /// Whether the entry may be served without contacting upstream
    pub fn is_servable(&self) -> bool {
        self.is_fresh() && !self.requires_revalidation()
    }

    /// Re-check of the storage decision against the stored directives
    pub fn is_cacheable(&self) -> bool {
        self.directives.grants_caching()
    }

    /// Whether the entry carries an `ETag` or `Last-Modified` validator
    pub fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }

    /// RFC 1123 rendering of `Last-Modified` for `If-Modified-Since`
    pub fn if_modified_since_value(&self) -> Option<String> {
        self.last_modified
            .map(|t| t.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
    }

    /// Apply a 304 response to this entry
    ///
    /// Resets the age, overwrites the `ETag` when the 304 carries one, and
    /// re-parses any `Cache-Control`. The boolean flags are replaced
    /// wholesale; `max-age`/`s-maxage` keep their old values when the 304
    /// omits them.
    pub(crate) fn apply_revalidation(&mut self, response_headers: &HeaderMap) {
        self.cached_at = Instant::now();

        if let Some(etag) = response_headers.get(ETAG).and_then(|v| v.to_str().ok()) {
            self.etag = Some(etag.to_string());
        }

        if let Some(cache_control) = response_headers
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
        {
            let fresh = CacheDirectives::parse(cache_control);
            self.directives = CacheDirectives {
                max_age: fresh.max_age.or(self.directives.max_age),
                s_max_age: fresh.s_max_age.or(self.directives.s_max_age),
                ..fresh
            };
        }
    }
}
