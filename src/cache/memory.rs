//! In-process cache backend backed by a mutex-guarded map.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use super::{CacheError, CacheStore};

struct HashEntry {
    fields: FxHashMap<String, String>,
    expires_at: Instant,
}

impl HashEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Volatile cache store; also the fallback when the networked backend is
/// unreachable at startup.
///
/// Expired entries are reaped lazily on access. The whole map sits behind one
/// mutex, which gives the per-key atomicity the [`CacheStore`] contract asks
/// for; lock scope is a handful of map operations, never I/O.
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: Mutex<FxHashMap<String, HashEntry>>,
}

impl InMemoryCacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Force-expire a key, regardless of its TTL. Test hook for exercising
    /// expiry paths without sleeping.
    pub fn expire_now(&self, key: &str) {
        let mut entries = self.entries.lock().expect("cache map poisoned");
        entries.remove(key);
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().expect("cache map poisoned");
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().expect("cache map poisoned");
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(entry.fields.get(field).cloned()),
            None => Ok(None),
        }
    }

    async fn hash_set_multi(
        &self,
        key: &str,
        fields: &[(&str, &str)],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().expect("cache map poisoned");
        let entry = entries.entry(key.to_string()).or_insert_with(|| HashEntry {
            fields: FxHashMap::default(),
            expires_at: Instant::now() + ttl,
        });
        if entry.is_expired() {
            entry.fields.clear();
        }
        for (field, value) in fields {
            entry.fields.insert((*field).to_string(), (*value).to_string());
        }
        entry.expires_at = Instant::now() + ttl;
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn absent_key_reads_as_missing() {
        let store = InMemoryCacheStore::new();
        assert!(!store.exists("nope").await.unwrap());
        assert_eq!(store.hash_get("nope", "status").await.unwrap(), None);
    }

    #[tokio::test]
    async fn multi_write_applies_all_fields() {
        let store = InMemoryCacheStore::new();
        store
            .hash_set_multi("k", &[("graph_data", "{}"), ("status", "STARTED")], TTL)
            .await
            .unwrap();
        assert!(store.exists("k").await.unwrap());
        assert_eq!(
            store.hash_get("k", "graph_data").await.unwrap().as_deref(),
            Some("{}")
        );
        assert_eq!(
            store.hash_get("k", "status").await.unwrap().as_deref(),
            Some("STARTED")
        );
    }

    #[tokio::test]
    async fn single_field_write_preserves_others() {
        let store = InMemoryCacheStore::new();
        store
            .hash_set_multi("k", &[("graph_data", "{}"), ("status", "STARTED")], TTL)
            .await
            .unwrap();
        store
            .hash_set_field("k", "status", "IN_PROGRESS", TTL)
            .await
            .unwrap();
        assert_eq!(
            store.hash_get("k", "status").await.unwrap().as_deref(),
            Some("IN_PROGRESS")
        );
        assert_eq!(
            store.hash_get("k", "graph_data").await.unwrap().as_deref(),
            Some("{}")
        );
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let store = InMemoryCacheStore::new();
        store
            .hash_set_field("k", "status", "STARTED", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.hash_get("k", "status").await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_refreshes_ttl() {
        let store = InMemoryCacheStore::new();
        store
            .hash_set_field("k", "status", "STARTED", Duration::from_millis(40))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        store
            .hash_set_field("k", "status", "IN_PROGRESS", Duration::from_millis(40))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        // The second write pushed expiry out; the entry must still be live.
        assert!(store.exists("k").await.unwrap());
    }
}
