//! Store over a request/response cache.
//!
//! Each key is turned into a request URL; the payload is kept as the JSON body
//! of the cached response. The cache bounds its own size, so this store has no
//! eviction of its own and no cheaper existence check than a lookup.

use async_trait::async_trait;
use moka::future::Cache;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::error::CacheError;
use crate::store::Store;
use crate::utils::build_cache_key;

const TIER: &str = "request-cache";

/// A cache of response bodies addressed by request URL.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// The cached response body for `url`, if any.
    async fn match_url(&self, url: &str) -> Result<Option<String>, CacheError>;

    /// Cache `body` as the response for `url`.
    async fn put(&self, url: &str, body: String) -> Result<(), CacheError>;

    /// Delete the response for `url`. Returns whether one existed.
    async fn delete(&self, url: &str) -> Result<bool, CacheError>;
}

/// Configuration for MokaResponseCache.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MokaResponseCacheConfig {
    /// Maximum number of responses the cache can hold.
    pub max_capacity: u64,

    /// Time to live: responses are dropped after this duration from insertion.
    pub time_to_live: Option<Duration>,
}

impl Default for MokaResponseCacheConfig {
    fn default() -> Self {
        MokaResponseCacheConfig {
            max_capacity: 10_000,
            time_to_live: None,
        }
    }
}

/// In-process response cache using Moka.
///
/// Moka evicts on its own once `max_capacity` is reached.
pub struct MokaResponseCache {
    cache: Cache<String, String>,
}

impl MokaResponseCache {
    pub fn new(config: MokaResponseCacheConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.max_capacity);

        if let Some(ttl) = config.time_to_live {
            builder = builder.time_to_live(ttl);
        }

        MokaResponseCache {
            cache: builder.build(),
        }
    }
}

impl Default for MokaResponseCache {
    fn default() -> Self {
        Self::new(MokaResponseCacheConfig::default())
    }
}

#[async_trait]
impl ResponseCache for MokaResponseCache {
    async fn match_url(&self, url: &str) -> Result<Option<String>, CacheError> {
        Ok(self.cache.get(url).await)
    }

    async fn put(&self, url: &str, body: String) -> Result<(), CacheError> {
        self.cache.insert(url.to_string(), body).await;
        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<bool, CacheError> {
        Ok(self.cache.remove(url).await.is_some())
    }
}

/// Configuration for RedisResponseCache.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisResponseCacheConfig {
    /// Redis connection URL.
    ///
    /// Format: `redis://[username:password@]host[:port][/database]`
    pub url: String,

    /// Name of the cache; responses are stored under `{name}::{request url}`.
    pub name: String,

    /// Expiry applied to every response. `None` keeps them until Redis evicts them.
    pub time_to_live: Option<Duration>,
}

impl Default for RedisResponseCacheConfig {
    fn default() -> Self {
        RedisResponseCacheConfig {
            url: "redis://localhost:6379".to_string(),
            name: "swr-fetch".to_string(),
            time_to_live: None,
        }
    }
}

/// Redis-backed response cache.
///
/// Capacity is whatever the Redis server's `maxmemory` policy allows.
pub struct RedisResponseCache {
    connection: MultiplexedConnection,
    name: String,
    time_to_live: Option<Duration>,
}

impl RedisResponseCache {
    /// Connect to Redis.
    ///
    /// # Example
    /// ```ignore
    /// let cache = RedisResponseCache::new(RedisResponseCacheConfig {
    ///     url: "redis://localhost:6379".to_string(),
    ///     name: "swr-fetch".to_string(),
    ///     time_to_live: None,
    /// })
    /// .await?;
    /// ```
    pub async fn new(config: RedisResponseCacheConfig) -> Result<Self, CacheError> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            CacheError::operation("redis", "", format!("Failed to create Redis client: {}", e))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                CacheError::operation("redis", "", format!("Failed to connect to Redis: {}", e))
            })?;

        Ok(RedisResponseCache {
            connection,
            name: config.name,
            time_to_live: config.time_to_live,
        })
    }
}

#[async_trait]
impl ResponseCache for RedisResponseCache {
    async fn match_url(&self, url: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        conn.get(build_cache_key(&self.name, url))
            .await
            .map_err(|e| CacheError::operation("redis", url, format!("GET failed: {}", e)))
    }

    async fn put(&self, url: &str, body: String) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let cache_key = build_cache_key(&self.name, url);

        match self.time_to_live {
            Some(ttl) => {
                let seconds = ttl.as_secs().max(1);
                let _: () = conn.set_ex(&cache_key, body, seconds).await.map_err(|e| {
                    CacheError::operation("redis", url, format!("SETEX failed: {}", e))
                })?;
            }
            None => {
                let _: () = conn.set(&cache_key, body).await.map_err(|e| {
                    CacheError::operation("redis", url, format!("SET failed: {}", e))
                })?;
            }
        }

        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection.clone();
        let removed: usize = conn
            .del(build_cache_key(&self.name, url))
            .await
            .map_err(|e| CacheError::operation("redis", url, format!("DEL failed: {}", e)))?;
        Ok(removed > 0)
    }
}

/// Configuration for RequestCacheStore.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestCacheConfig {
    /// Origin that relative keys are resolved against, e.g. `https://api.example.com`.
    pub base_url: Option<String>,
}

/// Store backed by a `ResponseCache`.
///
/// Cache faults are logged and reported as misses; nothing is propagated.
pub struct RequestCacheStore<C> {
    cache: C,
    base_url: Option<String>,
}

impl<C: ResponseCache> RequestCacheStore<C> {
    pub fn new(cache: C, config: RequestCacheConfig) -> Self {
        RequestCacheStore {
            cache,
            base_url: config
                .base_url
                .map(|base| base.trim_end_matches('/').to_string()),
        }
    }

    /// The underlying response cache.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Request URL for a resource key.
    pub fn request_url(&self, key: &str) -> String {
        let absolute = key.starts_with("http://") || key.starts_with("https://");
        match &self.base_url {
            Some(base) if !absolute => {
                if key.starts_with('/') {
                    format!("{}{}", base, key)
                } else {
                    format!("{}/{}", base, key)
                }
            }
            _ => key.to_string(),
        }
    }
}

#[async_trait]
impl<C: ResponseCache> Store for RequestCacheStore<C> {
    fn name(&self) -> &'static str {
        TIER
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let url = self.request_url(key);

        let body = match self.cache.match_url(&url).await {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(tier = TIER, key, error = %e, "failed to read response cache");
                return Ok(None);
            }
        };

        match serde_json::from_str(&body) {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                warn!(tier = TIER, key, error = %e, "cached response body is not JSON");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, data: Value) -> Result<(), CacheError> {
        let body = serde_json::to_string(&data)?;
        if let Err(e) = self.cache.put(&self.request_url(key), body).await {
            warn!(tier = TIER, key, error = %e, "failed to write response cache");
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        if let Err(e) = self.cache.delete(&self.request_url(key)).await {
            warn!(tier = TIER, key, error = %e, "failed to delete from response cache");
        }
        Ok(())
    }
}
