//! Networked cache backend speaking the redis protocol.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::{CacheError, CacheStore};

/// Redis-backed cache store.
///
/// Hash writes go through an atomic pipeline (`MULTI`/`EXEC`) that sets the
/// fields and refreshes the key TTL together, so a caller never observes a
/// record with fresh fields and a stale expiry, or half of a multi-field
/// write.
pub struct RedisCacheStore {
    connection: ConnectionManager,
}

impl RedisCacheStore {
    /// Connect and verify the server answers a `PING`.
    ///
    /// Errors here are what [`factory::create_cache_store`] uses to decide on
    /// the in-memory fallback.
    ///
    /// [`factory::create_cache_store`]: super::factory::create_cache_store
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(url).map_err(|err| CacheError::Unavailable(err.to_string()))?;
        let mut connection = ConnectionManager::new(client)
            .await
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;
        redis::cmd("PING")
            .query_async::<()>(&mut connection)
            .await
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;
        Ok(Self { connection })
    }

    fn ttl_secs(ttl: Duration) -> i64 {
        // Redis EXPIRE of 0 deletes the key; clamp to at least one second.
        (ttl.as_secs() as i64).max(1)
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut connection = self.connection.clone();
        connection
            .exists(key)
            .await
            .map_err(|err| CacheError::Unavailable(err.to_string()))
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        let mut connection = self.connection.clone();
        connection
            .hget(key, field)
            .await
            .map_err(|err| CacheError::Unavailable(err.to_string()))
    }

    async fn hash_set_multi(
        &self,
        key: &str,
        fields: &[(&str, &str)],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut connection = self.connection.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (field, value) in fields {
            pipe.hset(key, *field, *value).ignore();
        }
        pipe.expire(key, Self::ttl_secs(ttl)).ignore();
        pipe.query_async::<()>(&mut connection)
            .await
            .map_err(|err| CacheError::Unavailable(err.to_string()))
    }

    async fn hash_set_field(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.hash_set_multi(key, &[(field, value)], ttl).await
    }
}
