//! Process configuration loaded once at startup.
//!
//! Settings come from environment variables (with `.env` support via
//! `dotenvy`). Backend selection for the cache store is a pure configuration
//! decision made here; callers never branch on backend identity afterwards.

use std::time::Duration;

/// Default TTL for build records: 600 seconds from last write.
pub const DEFAULT_BUILD_TTL_SECS: u64 = 600;

/// Which cache backend the factory should construct.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheBackend {
    /// In-process map, volatile.
    Memory,
    /// Networked redis backend; falls back to [`CacheBackend::Memory`] when
    /// unreachable at startup.
    Redis,
}

/// Cache store configuration.
#[derive(Clone, Debug)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub redis_url: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: "redis://127.0.0.1:6379/".to_string(),
        }
    }
}

/// Top-level process settings.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Address the HTTP/websocket server binds to.
    pub bind_addr: String,
    pub cache: CacheSettings,
    /// Expiry window for build records, measured from last write.
    pub build_ttl: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7860".to_string(),
            cache: CacheSettings::default(),
            build_ttl: Duration::from_secs(DEFAULT_BUILD_TTL_SECS),
        }
    }
}

impl Settings {
    /// Load settings from the environment, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `FLOWCHAT_BIND` — listen address (`127.0.0.1:7860`)
    /// - `FLOWCHAT_CACHE` — `memory` or `redis`
    /// - `FLOWCHAT_REDIS_URL` — redis connection URL
    /// - `FLOWCHAT_BUILD_TTL_SECS` — build record TTL in seconds (600)
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let backend = match std::env::var("FLOWCHAT_CACHE").as_deref() {
            Ok("redis") => CacheBackend::Redis,
            Ok("memory") | Err(_) => CacheBackend::Memory,
            Ok(other) => {
                tracing::warn!(backend = other, "unknown cache backend, using memory");
                CacheBackend::Memory
            }
        };

        let build_ttl = std::env::var("FLOWCHAT_BUILD_TTL_SECS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.build_ttl);

        Self {
            bind_addr: std::env::var("FLOWCHAT_BIND").unwrap_or(defaults.bind_addr),
            cache: CacheSettings {
                backend,
                redis_url: std::env::var("FLOWCHAT_REDIS_URL")
                    .unwrap_or(defaults.cache.redis_url),
            },
            build_ttl,
        }
    }
}
