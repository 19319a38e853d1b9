//! # Cache Service
//!
//! The RFC 9111 decision layer on top of the store: what may be inserted,
//! how lookups fall back through the `Vary` index, what a 304 updates, and
//! what unsafe methods invalidate.

use axum::http::header::VARY;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use metrics::counter;
use tracing::{debug, info};

use crate::caching::entry::CachedEntry;
use crate::caching::is_safe_method;
use crate::caching::key::CacheKey;
use crate::caching::store::CacheStore;

/// Shared HTTP cache for GET/HEAD responses
pub struct CacheService {
    store: CacheStore,
}

impl CacheService {
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: CacheStore::new(max_entries),
        }
    }

    /// Look up a cached response for a safe request
    ///
    /// Tries the simple key first, then falls back through the `Vary`
    /// index; a stale index slot is dropped on the way. A hit whose stored
    /// directives no longer permit shared caching is deleted and reported
    /// as a miss.
    pub fn lookup(
        &self,
        method: &Method,
        host: &str,
        path_with_query: &str,
        request_headers: &HeaderMap,
    ) -> Option<CachedEntry> {
        if !is_safe_method(method) {
            return None;
        }

        let simple = CacheKey::simple(method.clone(), host, path_with_query);
        let mut found = self.store.get(&simple).map(|e| (e, simple.clone()));

        if found.is_none() {
            if let Some(vary) = self.store.vary_header_for(&simple) {
                let variant = CacheKey::with_vary(
                    method.clone(),
                    host,
                    path_with_query,
                    request_headers,
                    &vary,
                );
                match self.store.get(&variant) {
                    Some(entry) => found = Some((entry, variant)),
                    // Stale index entry
                    None => self.store.clear_vary(&simple),
                }
            }
        }

        let Some((entry, key)) = found else {
            counter!("cache_misses_total").increment(1);
            debug!("Cache MISS: {} {}", method, path_with_query);
            return None;
        };

        if !entry.is_cacheable() {
            debug!(
                "Cache entry not cacheable (no-store or private): {} {}",
                method, path_with_query
            );
            self.store.remove_entry_and_vary(&key, &simple);
            counter!("cache_misses_total").increment(1);
            return None;
        }

        counter!("cache_hits_total").increment(1);
        debug!(
            "Cache HIT: {} {} (age: {}s, fresh: {})",
            method,
            path_with_query,
            entry.age_seconds(),
            entry.is_fresh()
        );
        Some(entry)
    }

    /// Offer a backend response for insertion
    ///
    /// Only 200 responses to GET/HEAD whose directives affirmatively allow
    /// shared caching are stored. `Vary: *` not only prevents insertion but
    /// purges any prior entry for the resource. Response headers must
    /// already be filtered of hop-by-hop headers.
    pub fn store_response(
        &self,
        method: &Method,
        host: &str,
        path_with_query: &str,
        request_headers: &HeaderMap,
        status: StatusCode,
        response_headers: &HeaderMap,
        body: &Bytes,
    ) {
        if !is_safe_method(method) || status != StatusCode::OK {
            return;
        }

        let simple = CacheKey::simple(method.clone(), host, path_with_query);
        let vary = response_headers
            .get(VARY)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string());

        if vary.as_deref() == Some("*") {
            debug!("Not caching due to Vary: * for {} {}", method, path_with_query);
            self.store.remove_entry_and_vary(&simple, &simple);
            return;
        }

        let entry = CachedEntry::from_response(status, response_headers.clone(), body.clone());
        if !entry.is_cacheable() {
            debug!("Response not cacheable: {} {}", method, path_with_query);
            return;
        }

        info!(
            "Cached response: {} {} (lifetime: {:?}s, has-etag: {}, has-last-modified: {})",
            method,
            path_with_query,
            entry.directives.effective_lifetime(),
            entry.etag.is_some(),
            entry.last_modified.is_some()
        );

        match vary.filter(|v| !v.is_empty()) {
            Some(vary) => {
                let key = CacheKey::with_vary(
                    method.clone(),
                    host,
                    path_with_query,
                    request_headers,
                    &vary,
                );
                debug!(
                    "Caching with Vary: {} {} (Vary: {})",
                    method, path_with_query, vary
                );
                self.store.record_vary(simple, vary);
                self.store.insert(key, entry);
            }
            None => {
                self.store.clear_vary(&simple);
                self.store.insert(simple, entry);
            }
        }
    }

    /// Update the cached entry for a resource after a successful 304
    ///
    /// Resets the entry's age, overwrites its validator/directive metadata
    /// from the 304 headers, and returns the refreshed copy.
    pub fn update_after_revalidation(
        &self,
        method: &Method,
        host: &str,
        path_with_query: &str,
        request_headers: &HeaderMap,
        response_headers: &HeaderMap,
    ) -> Option<CachedEntry> {
        let simple = CacheKey::simple(method.clone(), host, path_with_query);
        let key = match self.store.vary_header_for(&simple) {
            Some(vary) => CacheKey::with_vary(
                method.clone(),
                host,
                path_with_query,
                request_headers,
                &vary,
            ),
            None => simple,
        };

        let updated = self
            .store
            .update(&key, |entry| entry.apply_revalidation(response_headers));

        if let Some(entry) = &updated {
            debug!(
                "Updated cache after 304: {} {} (new lifetime: {:?}s)",
                method,
                path_with_query,
                entry.directives.effective_lifetime()
            );
        }
        updated
    }

    /// Purge every GET/HEAD entry for a resource before an unsafe method
    /// is forwarded; idempotent
    pub fn invalidate_unsafe(&self, host: &str, path_with_query: &str) {
        self.store.purge_resource(host, path_with_query);
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Configured entry capacity
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }
}
