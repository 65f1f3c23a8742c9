use async_trait::async_trait;
use serde_json::Value;

use crate::error::CacheError;

/// A store is a common interface for persisting fetched payloads by resource key.
///
/// Stores are shared between sessions and must tolerate interleaved calls for
/// the same or different keys. Writes are whole-record overwrites, last writer wins.
///
/// Failures of a durable tier are recovered inside the store (logged, then
/// degraded to the fast tier); an `Err` means the operation could not be
/// completed at all.
#[async_trait]
pub trait Store: Send + Sync {
    /// A name for metrics/tracing.
    ///
    /// # Example
    /// - "memory"
    /// - "indexed"
    /// - "web-storage"
    fn name(&self) -> &'static str;

    /// Whether a live entry exists for `key`.
    ///
    /// Backends without a cheaper existence check fall back to `get`.
    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Return the newest payload stored for `key`.
    ///
    /// The response must be `None` for cache misses.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Write the payload for `key`, stamped with the current time.
    ///
    /// May evict unrelated entries if the backend is bounded.
    async fn set(&self, key: &str, data: Value) -> Result<(), CacheError>;

    /// Remove `key` from every tier. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}
