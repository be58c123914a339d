//! Key/value cache store with field-level hash semantics and per-key expiry.
//!
//! Two interchangeable backends implement [`CacheStore`]: an in-process map
//! ([`InMemoryCacheStore`]) and a networked redis store ([`RedisCacheStore`]).
//! Backend selection happens once at startup in [`factory::create_cache_store`];
//! if the networked backend cannot connect, the factory transparently
//! substitutes the in-process backend and logs the degradation. Callers never
//! branch on backend identity.
//!
//! All operations are atomic per key: a hash write applies every field or
//! none, and every write refreshes the key's TTL.

pub mod factory;
pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

pub use factory::create_cache_store;
pub use memory::InMemoryCacheStore;
pub use redis::RedisCacheStore;

/// Failure surfaced by cache operations.
///
/// Networked-backend I/O problems all collapse into a generic "cache
/// unavailable" condition; no partial writes are observable behind it.
#[derive(Debug, Error, Diagnostic)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    #[diagnostic(
        code(flowchat::cache::unavailable),
        help("Check the cache backend connectivity; the write was not partially applied.")
    )]
    Unavailable(String),
}

/// Contract shared by every cache backend.
///
/// Keys address hashes (field → value maps). TTL is measured from the last
/// write to the key and refreshed by every write operation.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Whether a live (unexpired) entry exists for `key`.
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Read one field of the hash at `key`; `None` when the key or field is
    /// absent (including after expiry).
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, CacheError>;

    /// Write all `fields` into the hash at `key` atomically and refresh its
    /// TTL to `ttl` from now.
    async fn hash_set_multi(
        &self,
        key: &str,
        fields: &[(&str, &str)],
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Write a single field of the hash at `key` and refresh its TTL.
    async fn hash_set_field(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError>;
}
