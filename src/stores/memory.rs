use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::entry::{StoreEntry, oldest_keys};
use crate::error::CacheError;
use crate::store::Store;

/// Configuration for MemoryStore.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemoryStoreConfig {
    /// Maximum number of entries to keep.
    ///
    /// `None` keeps everything. With `Some(limit)`, the oldest entries (by write
    /// timestamp) are evicted after a `set` that takes the store above `limit`.
    pub limit: Option<usize>,

    /// Payloads to preload, keyed by resource key.
    ///
    /// Useful to hydrate sessions from data shipped with the application.
    pub init_data: HashMap<String, Value>,
}

/// Volatile in-memory store using HashMap with RwLock.
///
/// This is the fastest backend and the default store of a `FetchContext`.
/// Nothing survives the process.
pub struct MemoryStore {
    state: RwLock<HashMap<String, StoreEntry>>,
    limit: Option<usize>,
}

impl MemoryStore {
    /// Create a new MemoryStore with the given configuration.
    pub fn new(config: MemoryStoreConfig) -> Self {
        let state = config
            .init_data
            .into_iter()
            .map(|(key, data)| (key.clone(), StoreEntry::new(key, data)))
            .collect();

        MemoryStore {
            state: RwLock::new(state),
            limit: config.limit,
        }
    }

    /// Number of entries currently held.
    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    /// Whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.is_empty()
    }

    /// Evict oldest entries until the map is back under the limit.
    fn evict(state: &mut HashMap<String, StoreEntry>, limit: usize) {
        if state.len() <= limit {
            return;
        }

        let overflow = state.len() - limit;
        for key in oldest_keys(state.values(), overflow) {
            state.remove(&key);
        }
        tracing::debug!(tier = "memory", evicted = overflow, "evicted oldest entries");
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryStoreConfig::default())
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.state.read().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let state = self.state.read().await;
        Ok(state.get(key).map(|entry| entry.data.clone()))
    }

    async fn set(&self, key: &str, data: Value) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        state.insert(key.to_string(), StoreEntry::new(key, data));

        if let Some(limit) = self.limit {
            Self::evict(&mut state, limit);
        }

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.state.write().await.remove(key);
        Ok(())
    }
}
