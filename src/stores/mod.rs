//! Store implementations for the fetch engine.

pub mod indexed;
pub mod memory;
pub mod metrics;
pub mod request_cache;
pub mod web_storage;

pub use indexed::{IndexedStore, IndexedStoreConfig};
pub use memory::{MemoryStore, MemoryStoreConfig};
pub use metrics::{MetricsSink, MetricsStore, StoreMetric};
pub use request_cache::{
    MokaResponseCache, MokaResponseCacheConfig, RedisResponseCache, RedisResponseCacheConfig,
    RequestCacheConfig, RequestCacheStore, ResponseCache,
};
pub use web_storage::{KeyValueStorage, MemoryStorage, WebStorageConfig, WebStorageStore};
