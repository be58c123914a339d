//! Backend selection for the cache store.

use std::sync::Arc;

use crate::config::{CacheBackend, CacheSettings};

use super::{CacheStore, InMemoryCacheStore, RedisCacheStore};

/// Construct the cache store the settings ask for.
///
/// When the redis backend cannot establish connectivity the in-process
/// backend is substituted transparently and the degradation is logged; the
/// returned trait object is all callers ever see.
pub async fn create_cache_store(settings: &CacheSettings) -> Arc<dyn CacheStore> {
    match settings.backend {
        CacheBackend::Memory => {
            tracing::debug!("using in-memory cache store");
            Arc::new(InMemoryCacheStore::new())
        }
        CacheBackend::Redis => match RedisCacheStore::connect(&settings.redis_url).await {
            Ok(store) => {
                tracing::debug!(url = %settings.redis_url, "redis cache store connected");
                Arc::new(store)
            }
            Err(err) => {
                tracing::warn!(
                    url = %settings.redis_url,
                    error = %err,
                    "redis cache unreachable, falling back to in-memory cache"
                );
                Arc::new(InMemoryCacheStore::new())
            }
        },
    }
}
