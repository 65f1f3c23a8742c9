//! Metrics middleware for stores.
//!
//! This module provides a `MetricsStore` wrapper that emits a metric for every
//! store operation (existence checks, reads, writes, removes) to a user-provided sink.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use swr_fetch::{MemoryStore, MetricsSink, MetricsStore, Store, StoreMetric};
//!
//! let sink = Arc::new(MyMetricsSink::new());
//! let memory: Arc<dyn Store> = Arc::new(MemoryStore::default());
//! let store: Arc<dyn Store> = Arc::new(MetricsStore::new(memory, sink.clone()));
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::error::CacheError;
use crate::store::Store;

/// Metrics emitted by the MetricsStore wrapper.
#[derive(Debug, Clone)]
pub enum StoreMetric {
    /// Emitted on every `has` and `get`.
    Read {
        /// The resource key that was read.
        key: String,
        /// Whether the key was found.
        hit: bool,
        /// Latency of the operation in milliseconds.
        latency_ms: f64,
        /// Name of the wrapped store (from Store::name()).
        tier: String,
    },
    /// Emitted on every `set`.
    Write {
        /// The resource key that was written.
        key: String,
        /// Whether the write succeeded.
        ok: bool,
        /// Latency of the operation in milliseconds.
        latency_ms: f64,
        /// Name of the wrapped store.
        tier: String,
    },
    /// Emitted on every `remove`.
    Remove {
        /// The resource key that was removed.
        key: String,
        /// Latency of the operation in milliseconds.
        latency_ms: f64,
        /// Name of the wrapped store.
        tier: String,
    },
}

/// Trait for receiving store metrics.
///
/// `emit` is called synchronously in the hot path of every store operation.
/// Implementations should be fast (e.g., buffer metrics in memory).
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Emit a single metric.
    fn emit(&self, metric: StoreMetric);

    /// Flush any buffered metrics.
    async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// A store wrapper that emits metrics for all operations.
///
/// Results of the wrapped store are passed through unchanged.
pub struct MetricsStore {
    inner: Arc<dyn Store>,
    sink: Arc<dyn MetricsSink>,
    tier_name: String,
}

impl MetricsStore {
    /// Create a new MetricsStore wrapping the given store.
    pub fn new(inner: Arc<dyn Store>, sink: Arc<dyn MetricsSink>) -> Self {
        let tier_name = inner.name().to_string();
        MetricsStore {
            inner,
            sink,
            tier_name,
        }
    }

    /// Get a reference to the metrics sink.
    pub fn sink(&self) -> &Arc<dyn MetricsSink> {
        &self.sink
    }

    fn elapsed_ms(start: Instant) -> f64 {
        start.elapsed().as_secs_f64() * 1000.0
    }

    fn emit_read(&self, key: &str, hit: bool, start: Instant) {
        self.sink.emit(StoreMetric::Read {
            key: key.to_string(),
            hit,
            latency_ms: Self::elapsed_ms(start),
            tier: self.tier_name.clone(),
        });
    }
}

#[async_trait]
impl Store for MetricsStore {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let start = Instant::now();
        let result = self.inner.has(key).await;
        self.emit_read(key, matches!(result, Ok(true)), start);
        result
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let start = Instant::now();
        let result = self.inner.get(key).await;
        self.emit_read(key, matches!(result, Ok(Some(_))), start);
        result
    }

    async fn set(&self, key: &str, data: Value) -> Result<(), CacheError> {
        let start = Instant::now();
        let result = self.inner.set(key, data).await;

        self.sink.emit(StoreMetric::Write {
            key: key.to_string(),
            ok: result.is_ok(),
            latency_ms: Self::elapsed_ms(start),
            tier: self.tier_name.clone(),
        });

        result
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let start = Instant::now();
        let result = self.inner.remove(key).await;

        self.sink.emit(StoreMetric::Remove {
            key: key.to_string(),
            latency_ms: Self::elapsed_ms(start),
            tier: self.tier_name.clone(),
        });

        result
    }
}
