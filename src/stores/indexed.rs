//! Two-tier store: an in-memory map in front of a SQLite object store.
//!
//! The memory tier answers reads and is written synchronously on `set`; the
//! durable tier is a write-behind mirror consulted on memory misses. Schema:
//!
//! ```sql
//! CREATE TABLE "store" (
//!   key TEXT PRIMARY KEY NOT NULL,
//!   data TEXT NOT NULL,          -- JSON payload
//!   timestamp INTEGER NOT NULL   -- unix millis of the write
//! );
//! CREATE INDEX "store_timestamp" ON "store" (timestamp);
//! ```
//!
//! Any failure of the durable tier is logged and the store keeps serving from
//! memory.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::entry::{StoreEntry, oldest_keys};
use crate::error::CacheError;
use crate::store::Store;

const TIER: &str = "indexed";

/// Version written to `PRAGMA user_version` once the schema exists.
pub const SCHEMA_VERSION: i64 = 1;

/// Configuration for IndexedStore.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexedStoreConfig {
    /// SQLite connection URL.
    ///
    /// # Examples
    /// - `sqlite://swr_fetch.db?mode=rwc`
    /// - `sqlite::memory:`
    pub url: String,

    /// Name of the table holding the entries.
    pub table: String,

    /// Maximum number of persisted entries. Oldest entries are deleted after
    /// each write that exceeds it.
    pub limit: usize,

    /// Pool size. In-memory databases always use a single connection.
    pub max_connections: u32,

    /// Payloads preloaded into the memory tier, keyed by resource key.
    pub init_data: HashMap<String, Value>,
}

impl Default for IndexedStoreConfig {
    fn default() -> Self {
        IndexedStoreConfig {
            url: "sqlite://swr_fetch.db?mode=rwc".to_string(),
            table: "store".to_string(),
            limit: 1000,
            max_connections: 4,
            init_data: HashMap::new(),
        }
    }
}

/// Persistent store with a memory tier and a SQLite tier.
///
/// The database is opened lazily on first use. Concurrent first uses share one
/// open; if it fails the store stays memory-only for its lifetime.
pub struct IndexedStore {
    memory: RwLock<HashMap<String, StoreEntry>>,
    db: OnceCell<Option<SqlitePool>>,
    url: String,
    table: String,
    limit: usize,
    max_connections: u32,
}

impl IndexedStore {
    /// Create a new IndexedStore. No I/O happens until the first operation.
    ///
    /// # Example
    /// ```ignore
    /// let store = IndexedStore::new(IndexedStoreConfig {
    ///     url: "sqlite://cache.db?mode=rwc".to_string(),
    ///     limit: 500,
    ///     ..Default::default()
    /// });
    /// ```
    pub fn new(config: IndexedStoreConfig) -> Self {
        let memory = config
            .init_data
            .into_iter()
            .map(|(key, data)| (key.clone(), StoreEntry::new(key, data)))
            .collect();

        IndexedStore {
            memory: RwLock::new(memory),
            db: OnceCell::new(),
            url: config.url,
            table: config.table,
            limit: config.limit,
            max_connections: config.max_connections.max(1),
        }
    }

    /// Number of rows in the durable tier, or `None` when it is unavailable.
    pub async fn persisted_len(&self) -> Option<u64> {
        let pool = self.pool().await?;
        let sql = format!(r#"SELECT COUNT(*) FROM "{}""#, self.table);
        match sqlx::query_scalar::<_, i64>(&sql).fetch_one(pool).await {
            Ok(count) => Some(count as u64),
            Err(e) => {
                warn!(tier = TIER, error = %e, "failed to count durable entries");
                None
            }
        }
    }

    /// Whether the durable tier could be opened.
    pub async fn is_persistent(&self) -> bool {
        self.pool().await.is_some()
    }

    async fn pool(&self) -> Option<&SqlitePool> {
        self.db
            .get_or_init(|| async {
                match self.open().await {
                    Ok(pool) => {
                        info!(
                            tier = TIER,
                            url = %self.url,
                            table = %self.table,
                            schema_version = SCHEMA_VERSION,
                            "opened durable store"
                        );
                        Some(pool)
                    }
                    Err(e) => {
                        warn!(tier = TIER, error = %e, "failed to open durable store, continuing in memory only");
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    async fn open(&self) -> Result<SqlitePool, CacheError> {
        if !is_identifier(&self.table) {
            return Err(CacheError::operation(
                TIER,
                "",
                format!("invalid table name '{}'", self.table),
            ));
        }

        let options = SqliteConnectOptions::from_str(&self.url).map_err(open_error)?;
        let in_memory = self.url.contains(":memory:") || self.url.contains("mode=memory");
        let max_connections = if in_memory { 1 } else { self.max_connections };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(open_error)?;

        self.migrate(&pool).await?;
        Ok(pool)
    }

    async fn migrate(&self, pool: &SqlitePool) -> Result<(), CacheError> {
        let create_table = format!(
            r#"CREATE TABLE IF NOT EXISTS "{t}" (
                key TEXT PRIMARY KEY NOT NULL,
                data TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )"#,
            t = self.table
        );
        let create_index = format!(
            r#"CREATE INDEX IF NOT EXISTS "{t}_timestamp" ON "{t}" (timestamp)"#,
            t = self.table
        );
        let set_version = format!("PRAGMA user_version = {}", SCHEMA_VERSION);

        let mut tx = pool.begin().await.map_err(open_error)?;
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&mut *tx)
            .await
            .map_err(open_error)?;

        sqlx::query(&create_table)
            .execute(&mut *tx)
            .await
            .map_err(open_error)?;
        sqlx::query(&create_index)
            .execute(&mut *tx)
            .await
            .map_err(open_error)?;
        if version < SCHEMA_VERSION {
            sqlx::query(&set_version)
                .execute(&mut *tx)
                .await
                .map_err(open_error)?;
        }

        tx.commit().await.map_err(open_error)
    }

    /// Read `key` from the durable tier and promote it into memory.
    async fn load(&self, key: &str) -> Option<StoreEntry> {
        let pool = self.pool().await?;

        match self.read_durable(pool, key).await {
            Ok(Some(entry)) => {
                let mut memory = self.memory.write();
                // A concurrent `set` may have landed in memory while we were reading.
                let current = memory
                    .entry(key.to_string())
                    .and_modify(|held| {
                        if held.timestamp < entry.timestamp {
                            *held = entry.clone();
                        }
                    })
                    .or_insert(entry);
                debug!(tier = TIER, key, "promoted durable entry into memory");
                Some(current.clone())
            }
            Ok(None) => None,
            Err(e) => {
                warn!(tier = TIER, key, error = %e, "failed to read durable store");
                None
            }
        }
    }

    async fn read_durable(
        &self,
        pool: &SqlitePool,
        key: &str,
    ) -> Result<Option<StoreEntry>, CacheError> {
        let sql = format!(
            r#"SELECT data, timestamp FROM "{}" WHERE key = ?"#,
            self.table
        );
        let row: Option<(String, i64)> = sqlx::query_as(&sql)
            .bind(key)
            .fetch_optional(pool)
            .await
            .map_err(|e| CacheError::operation(TIER, key, e.to_string()))?;

        let Some((data, timestamp)) = row else {
            return Ok(None);
        };

        Ok(Some(StoreEntry {
            key: key.to_string(),
            data: serde_json::from_str(&data)?,
            timestamp,
        }))
    }

    async fn write_durable(&self, pool: &SqlitePool, entry: &StoreEntry) -> Result<(), CacheError> {
        // Last writer wins by timestamp: an older write never replaces a newer row.
        let sql = format!(
            r#"INSERT INTO "{t}" (key, data, timestamp) VALUES (?, ?, ?)
               ON CONFLICT(key) DO UPDATE SET data = excluded.data, timestamp = excluded.timestamp
               WHERE excluded.timestamp >= "{t}".timestamp"#,
            t = self.table
        );
        let data = serde_json::to_string(&entry.data)?;

        sqlx::query(&sql)
            .bind(&entry.key)
            .bind(data)
            .bind(entry.timestamp)
            .execute(pool)
            .await
            .map_err(|e| CacheError::operation(TIER, &entry.key, e.to_string()))?;
        Ok(())
    }

    /// Delete the oldest rows until at most `limit` remain.
    ///
    /// Walks the timestamp index in ascending order, deleting one row at a
    /// time, inside a single transaction. Returns the deleted `(key, timestamp)`.
    async fn clean(&self, pool: &SqlitePool) -> Result<Vec<(String, i64)>, CacheError> {
        let table = &self.table;
        let count_sql = format!(r#"SELECT COUNT(*) FROM "{}""#, table);
        let oldest_sql = format!(
            r#"SELECT key, timestamp FROM "{t}" INDEXED BY "{t}_timestamp"
               ORDER BY timestamp ASC LIMIT ?"#,
            t = table
        );
        let delete_sql = format!(r#"DELETE FROM "{}" WHERE key = ?"#, table);
        let clean_error = |e: sqlx::Error| CacheError::operation(TIER, "", e.to_string());

        let mut tx = pool.begin().await.map_err(clean_error)?;
        let count: i64 = sqlx::query_scalar(&count_sql)
            .fetch_one(&mut *tx)
            .await
            .map_err(clean_error)?;

        let overflow = count - self.limit as i64;
        if overflow <= 0 {
            return Ok(Vec::new());
        }

        let oldest: Vec<(String, i64)> = sqlx::query_as(&oldest_sql)
            .bind(overflow)
            .fetch_all(&mut *tx)
            .await
            .map_err(clean_error)?;

        for (key, _) in &oldest {
            sqlx::query(&delete_sql)
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(clean_error)?;
        }

        tx.commit().await.map_err(clean_error)?;
        Ok(oldest)
    }

    /// Drop evicted keys from memory unless they were rewritten since.
    fn forget(&self, evicted: &[(String, i64)]) {
        let mut memory = self.memory.write();
        for (key, timestamp) in evicted {
            if memory.get(key).is_some_and(|held| held.timestamp <= *timestamp) {
                memory.remove(key);
            }
        }
    }

    /// Bound the memory tier on its own when there is no durable tier.
    fn evict_memory(&self) {
        let mut memory = self.memory.write();
        if memory.len() <= self.limit {
            return;
        }
        let overflow = memory.len() - self.limit;
        for key in oldest_keys(memory.values(), overflow) {
            memory.remove(&key);
        }
        debug!(tier = TIER, evicted = overflow, "evicted oldest memory entries");
    }
}

fn open_error(e: sqlx::Error) -> CacheError {
    CacheError::operation(TIER, "", format!("failed to open durable store: {}", e))
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[async_trait]
impl Store for IndexedStore {
    fn name(&self) -> &'static str {
        TIER
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let cached = self.memory.read().contains_key(key);
        if cached {
            return Ok(true);
        }
        Ok(self.load(key).await.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let cached = self.memory.read().get(key).map(|entry| entry.data.clone());
        if cached.is_some() {
            return Ok(cached);
        }
        Ok(self.load(key).await.map(|entry| entry.data))
    }

    async fn set(&self, key: &str, data: Value) -> Result<(), CacheError> {
        let entry = StoreEntry::new(key, data);
        self.memory.write().insert(key.to_string(), entry.clone());

        let Some(pool) = self.pool().await else {
            self.evict_memory();
            return Ok(());
        };

        if let Err(e) = self.write_durable(pool, &entry).await {
            warn!(tier = TIER, key, error = %e, "failed to write durable store");
            return Ok(());
        }

        match self.clean(pool).await {
            Ok(evicted) if !evicted.is_empty() => {
                debug!(tier = TIER, evicted = evicted.len(), "evicted oldest durable entries");
                self.forget(&evicted);
            }
            Ok(_) => {}
            Err(e) => warn!(tier = TIER, error = %e, "failed to clean durable store"),
        }

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.memory.write().remove(key);

        let Some(pool) = self.pool().await else {
            return Ok(());
        };

        let sql = format!(r#"DELETE FROM "{}" WHERE key = ?"#, self.table);
        if let Err(e) = sqlx::query(&sql).bind(key).execute(pool).await {
            warn!(tier = TIER, key, error = %e, "failed to delete from durable store");
        }
        Ok(())
    }
}
