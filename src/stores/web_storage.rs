//! Store over a synchronous, capacity-limited key-value storage.
//!
//! Records live in the storage under `prefix + key` as JSON
//! `{"key": .., "data": .., "timestamp": ..}` and are mirrored in memory for reads.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::entry::{StoreEntry, oldest_keys};
use crate::error::CacheError;
use crate::store::Store;

const TIER: &str = "web-storage";

/// A synchronous string key-value storage with a hard capacity, shaped like
/// the browser Web Storage API.
pub trait KeyValueStorage: Send + Sync {
    /// Number of stored items.
    fn len(&self) -> usize;

    /// Whether the storage holds no items.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of the item at `index`, in a stable order.
    fn key(&self, index: usize) -> Option<String>;

    fn get_item(&self, key: &str) -> Option<String>;

    /// Store an item. Fails with `CacheError::QuotaExceeded` when full.
    fn set_item(&self, key: &str, value: &str) -> Result<(), CacheError>;

    fn remove_item(&self, key: &str);
}

/// In-process `KeyValueStorage` with a byte quota.
///
/// Clones share the same items, like two handles onto one origin's storage.
#[derive(Clone)]
pub struct MemoryStorage {
    items: Arc<Mutex<BTreeMap<String, String>>>,
    quota_bytes: usize,
}

impl MemoryStorage {
    /// Default quota, matching the usual 5 MiB browser limit.
    pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

    pub fn new() -> Self {
        Self::with_quota(Self::DEFAULT_QUOTA_BYTES)
    }

    /// Storage that rejects writes once keys plus values exceed `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        MemoryStorage {
            items: Arc::new(Mutex::new(BTreeMap::new())),
            quota_bytes,
        }
    }

    /// Bytes currently used by keys and values.
    pub fn used_bytes(&self) -> usize {
        self.items
            .lock()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn len(&self) -> usize {
        self.items.lock().len()
    }

    fn key(&self, index: usize) -> Option<String> {
        self.items.lock().keys().nth(index).cloned()
    }

    fn get_item(&self, key: &str) -> Option<String> {
        self.items.lock().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut items = self.items.lock();
        let used: usize = items.iter().map(|(k, v)| k.len() + v.len()).sum();
        let replaced = items.get(key).map_or(0, |old| key.len() + old.len());
        let available = self.quota_bytes.saturating_sub(used - replaced);
        let needed = key.len() + value.len();

        if needed > available {
            return Err(CacheError::QuotaExceeded {
                key: key.to_string(),
                needed,
                available,
            });
        }

        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) {
        self.items.lock().remove(key);
    }
}

/// Configuration for WebStorageStore.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebStorageConfig {
    /// Prefix of every storage key owned by this store.
    pub prefix: String,

    /// Maximum number of records. Exceeding it evicts the oldest 10%.
    pub limit: usize,
}

impl Default for WebStorageConfig {
    fn default() -> Self {
        WebStorageConfig {
            prefix: "swr-fetch".to_string(),
            limit: 1000,
        }
    }
}

/// Store backed by a `KeyValueStorage`, with an in-memory mirror for reads.
///
/// The storage can fill up before `limit` is reached; a rejected write evicts
/// the oldest 10% of records and is retried once. This is the only store whose
/// `set` can fail.
pub struct WebStorageStore<S = MemoryStorage> {
    storage: S,
    prefix: String,
    limit: usize,
    cache: RwLock<HashMap<String, StoreEntry>>,
}

impl<S: KeyValueStorage> WebStorageStore<S> {
    /// Create the store, loading every record under `prefix` from `storage`.
    ///
    /// Records that fail to parse are deleted from the storage.
    pub fn new(storage: S, config: WebStorageConfig) -> Self {
        let names: Vec<String> = (0..storage.len())
            .filter_map(|i| storage.key(i))
            .filter(|name| name.starts_with(&config.prefix))
            .collect();

        let mut cache = HashMap::new();
        for name in names {
            let Some(raw) = storage.get_item(&name) else {
                continue;
            };
            match StoreEntry::from_json(&raw) {
                Ok(entry) => {
                    cache.insert(name[config.prefix.len()..].to_string(), entry);
                }
                Err(e) => {
                    warn!(tier = TIER, key = %name, error = %e, "removing malformed record");
                    storage.remove_item(&name);
                }
            }
        }

        WebStorageStore {
            storage,
            prefix: config.prefix,
            limit: config.limit,
            cache: RwLock::new(cache),
        }
    }

    /// The underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Remove the oldest 10% of records (rounded up) from memory and storage.
    fn clean(&self, cache: &mut HashMap<String, StoreEntry>) {
        let amount = cache.len().div_ceil(10);
        for key in oldest_keys(cache.values(), amount) {
            cache.remove(&key);
            self.storage.remove_item(&self.storage_key(&key));
        }
        debug!(tier = TIER, evicted = amount, "evicted oldest records");
    }
}

#[async_trait]
impl<S: KeyValueStorage> Store for WebStorageStore<S> {
    fn name(&self) -> &'static str {
        TIER
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.cache.read().contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        Ok(self.cache.read().get(key).map(|entry| entry.data.clone()))
    }

    async fn set(&self, key: &str, data: Value) -> Result<(), CacheError> {
        let entry = StoreEntry::new(key, data);
        let raw = entry.to_json()?;
        let storage_key = self.storage_key(key);

        let mut cache = self.cache.write();
        let previous = cache.insert(key.to_string(), entry.clone());

        if let Err(e) = self.storage.set_item(&storage_key, &raw) {
            warn!(tier = TIER, key, error = %e, "storage write rejected, evicting and retrying");
            self.clean(&mut cache);
            if let Err(e) = self.storage.set_item(&storage_key, &raw) {
                // A rejected write leaves the stored record as it was, unless eviction took it.
                cache.remove(key);
                if let Some(previous) = previous
                    && self.storage.get_item(&storage_key).is_some()
                {
                    cache.insert(key.to_string(), previous);
                }
                return Err(e);
            }
            // The eviction pass may have picked this record if it was alone.
            cache.insert(key.to_string(), entry);
        }

        if cache.len() > self.limit {
            self.clean(&mut cache);
        }

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.cache.write().remove(key);
        self.storage.remove_item(&self.storage_key(key));
        Ok(())
    }
}
