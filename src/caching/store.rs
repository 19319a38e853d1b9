//! # Cache Store
//!
//! Bounded, access-ordered LRU storage for cached responses, plus the
//! `Vary` index that maps a resource's simple key to the most recently
//! observed `Vary` header value.
//!
//! Both structures live under a single mutex so that unsafe-method
//! invalidation of a resource is atomic with the matching vary-index
//! update. Critical sections never perform I/O. Eviction is silent: when a
//! write would exceed capacity the least-recently-accessed entry is
//! dropped, and every successful lookup counts as an access.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tracing::debug;

use crate::caching::entry::CachedEntry;
use crate::caching::is_safe_method;
use crate::caching::key::CacheKey;

/// Default maximum number of cached entries
pub const DEFAULT_CAPACITY: usize = 10_000;

struct StoreInner {
    entries: LruCache<CacheKey, CachedEntry>,
    /// Simple key of a resource -> `Vary` header value of its stored variant
    vary_index: HashMap<CacheKey, String>,
}

/// Thread-safe LRU cache store with the `Vary` index
pub struct CacheStore {
    inner: Mutex<StoreInner>,
    capacity: usize,
}

impl CacheStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(StoreInner {
                entries: LruCache::new(NonZeroUsize::new(capacity).expect("capacity is non-zero")),
                vary_index: HashMap::new(),
            }),
            capacity,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Look up an entry, marking it as most recently used on a hit
    pub fn get(&self, key: &CacheKey) -> Option<CachedEntry> {
        self.inner.lock().entries.get(key).cloned()
    }

    /// Insert an entry, evicting the least-recently-accessed one if full
    pub fn insert(&self, key: CacheKey, entry: CachedEntry) {
        let mut inner = self.inner.lock();
        if inner.entries.len() == self.capacity && !inner.entries.contains(&key) {
            counter!("cache_evictions_total").increment(1);
        }
        inner.entries.put(key, entry);
        gauge!("cache_entries").set(inner.entries.len() as f64);
    }

    /// Apply `mutate` to a stored entry, returning the updated copy
    pub fn update<F>(&self, key: &CacheKey, mutate: F) -> Option<CachedEntry>
    where
        F: FnOnce(&mut CachedEntry),
    {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get_mut(key)?;
        mutate(entry);
        Some(entry.clone())
    }

    /// Remove one entry and the resource's vary-index slot atomically
    pub fn remove_entry_and_vary(&self, entry_key: &CacheKey, simple_key: &CacheKey) {
        let mut inner = self.inner.lock();
        inner.entries.pop(entry_key);
        inner.vary_index.remove(simple_key);
    }

    /// The recorded `Vary` header value for a resource, if any
    pub fn vary_header_for(&self, simple_key: &CacheKey) -> Option<String> {
        self.inner.lock().vary_index.get(simple_key).cloned()
    }

    /// Record the `Vary` header value observed for a resource
    pub fn record_vary(&self, simple_key: CacheKey, vary_header: String) {
        self.inner.lock().vary_index.insert(simple_key, vary_header);
    }

    /// Drop a stale vary-index slot
    pub fn clear_vary(&self, simple_key: &CacheKey) {
        self.inner.lock().vary_index.remove(simple_key);
    }

    /// Purge every GET/HEAD entry for `(host, path_with_query)` together
    /// with the matching vary-index slots, in one critical section
    pub fn purge_resource(&self, host: &str, path_with_query: &str) {
        let mut inner = self.inner.lock();

        inner
            .vary_index
            .retain(|key, _| !(key.matches_resource(host, path_with_query) && is_safe_method(key.method())));

        let doomed: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(key, _)| {
                key.matches_resource(host, path_with_query) && is_safe_method(key.method())
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            inner.entries.pop(key);
        }

        if !doomed.is_empty() {
            gauge!("cache_entries").set(inner.entries.len() as f64);
            debug!("Invalidated cache for {} {}", host, path_with_query);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop everything; mainly useful in tests
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.vary_index.clear();
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method, StatusCode};
    use bytes::Bytes;

    fn entry(body: &'static [u8]) -> CachedEntry {
        CachedEntry::from_response(StatusCode::OK, HeaderMap::new(), Bytes::from_static(body))
    }

    fn key(method: Method, path: &str) -> CacheKey {
        CacheKey::simple(method, "api.example.com", path)
    }

    #[test]
    fn test_insert_then_get() {
        let store = CacheStore::new(4);
        let k = key(Method::GET, "/a");
        store.insert(k.clone(), entry(b"a"));

        let got = store.get(&k).unwrap();
        assert_eq!(got.body, Bytes::from_static(b"a"));
        assert!(store.get(&key(Method::GET, "/missing")).is_none());
    }

    #[test]
    fn test_lru_eviction_respects_access_order() {
        let store = CacheStore::new(3);
        store.insert(key(Method::GET, "/a"), entry(b"a"));
        store.insert(key(Method::GET, "/b"), entry(b"b"));
        store.insert(key(Method::GET, "/c"), entry(b"c"));

        // Touch /a so /b becomes the eviction candidate
        store.get(&key(Method::GET, "/a")).unwrap();
        store.insert(key(Method::GET, "/d"), entry(b"d"));

        assert!(store.get(&key(Method::GET, "/a")).is_some());
        assert!(store.get(&key(Method::GET, "/b")).is_none());
        assert!(store.get(&key(Method::GET, "/c")).is_some());
        assert!(store.get(&key(Method::GET, "/d")).is_some());
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_purge_resource_removes_safe_methods_only() {
        let store = CacheStore::new(8);
        store.insert(key(Method::GET, "/r"), entry(b"get"));
        store.insert(key(Method::HEAD, "/r"), entry(b""));
        store.insert(key(Method::GET, "/other"), entry(b"other"));
        store.record_vary(key(Method::GET, "/r"), "accept".to_string());

        store.purge_resource("api.example.com", "/r");

        assert!(store.get(&key(Method::GET, "/r")).is_none());
        assert!(store.get(&key(Method::HEAD, "/r")).is_none());
        assert!(store.vary_header_for(&key(Method::GET, "/r")).is_none());
        assert!(store.get(&key(Method::GET, "/other")).is_some());
    }

    #[test]
    fn test_purge_resource_removes_variant_entries() {
        let store = CacheStore::new(8);
        let mut request = HeaderMap::new();
        request.insert("accept-encoding", "gzip".parse().unwrap());
        let variant = CacheKey::with_vary(
            Method::GET,
            "api.example.com",
            "/r",
            &request,
            "Accept-Encoding",
        );
        store.insert(variant.clone(), entry(b"gz"));
        store.record_vary(key(Method::GET, "/r"), "Accept-Encoding".to_string());

        store.purge_resource("api.example.com", "/r");
        assert!(store.get(&variant).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_purge_is_idempotent() {
        let store = CacheStore::new(4);
        store.insert(key(Method::GET, "/r"), entry(b"x"));
        store.purge_resource("api.example.com", "/r");
        store.purge_resource("api.example.com", "/r");
        assert!(store.is_empty());
    }

    #[test]
    fn test_vary_index_roundtrip() {
        let store = CacheStore::new(4);
        let simple = key(Method::GET, "/v");
        store.record_vary(simple.clone(), "accept".to_string());
        assert_eq!(store.vary_header_for(&simple).as_deref(), Some("accept"));

        store.clear_vary(&simple);
        assert!(store.vary_header_for(&simple).is_none());
    }

    #[test]
    fn test_update_refreshes_in_place() {
        let store = CacheStore::new(4);
        let k = key(Method::GET, "/u");
        store.insert(k.clone(), entry(b"v1"));

        let updated = store
            .update(&k, |e| e.etag = Some("\"tag\"".to_string()))
            .unwrap();
        assert_eq!(updated.etag.as_deref(), Some("\"tag\""));
        assert_eq!(
            store.get(&k).unwrap().etag.as_deref(),
            Some("\"tag\"")
        );

        assert!(store
            .update(&key(Method::GET, "/missing"), |_| {})
            .is_none());
    }
}
