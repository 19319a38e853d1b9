//! # Caching Module
//!
//! The shared (proxy-level) HTTP response cache, in RFC 9111 terms. It is
//! per-process and in-memory; entries live in a bounded LRU store and are
//! addressed by `(method, host, path_with_query, vary_fingerprint)`.
//!
//! ## Architecture
//! 1. **CacheKey / CachedEntry**: value types for addressing and storage
//! 2. **CacheStore**: bounded LRU map plus the `Vary` index, one mutex
//! 3. **CacheService**: cacheability, freshness, lookup, insertion,
//!    revalidation updates, and unsafe-method invalidation

pub mod entry;
pub mod key;
pub mod service;
pub mod store;

pub use entry::{CacheDirectives, CachedEntry};
pub use key::CacheKey;
pub use service::CacheService;
pub use store::CacheStore;

use axum::http::Method;

/// Only `GET` and `HEAD` responses are ever cached
pub fn is_safe_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}
