//! swr-fetch - Stale-while-revalidate fetch sessions for Rust
//!
//! This library keeps a consumer's view of a remote resource fresh while
//! answering from a local cache first:
//! - Canonical resource keys built from a URL and query parameters
//! - Sessions that show cached data immediately and revalidate in the background
//! - Strict "latest key wins" ordering without cancellation
//! - Pluggable stores: memory, persistent indexed (SQLite), Web-Storage style
//!   key/value areas, and HTTP response caches
//!
//! # Example
//!
//! ```ignore
//! use swr_fetch::{FetchContext, FetchError, FetchOptions};
//!
//! #[derive(Clone, serde::Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let context = FetchContext::new(|key: String| async move {
//!         let body = reqwest::get(format!("https://api.example.com{key}"))
//!             .await
//!             .map_err(FetchError::remote)?
//!             .json()
//!             .await
//!             .map_err(FetchError::remote)?;
//!         Ok(body)
//!     });
//!
//!     let session = context.session::<User>();
//!     let mut state = session.subscribe();
//!
//!     session.activate("/users", FetchOptions::default().param("id", 1));
//!
//!     // Cached data (if any) shows up as `Stale`, the fetched result as `Valid`.
//!     let state = state.wait_for(|s| !s.loading).await.unwrap();
//!     println!("{:?}", state.data.as_ref().map(|u| &u.name));
//! }
//! ```

mod context;
mod entry;
mod error;
mod fetcher;
mod normalize;
mod session;
mod store;
pub mod stores;
mod utils;

// Re-export public API
pub use context::FetchContext;
pub use entry::StoreEntry;
pub use error::{CacheError, FetchError};
pub use fetcher::Fetcher;
pub use normalize::{Params, normalize_url};
pub use session::{DataStatus, FetchOptions, FetchSession, FetchState, LoadCallback};
pub use store::Store;
pub use stores::indexed::{IndexedStore, IndexedStoreConfig};
pub use stores::memory::{MemoryStore, MemoryStoreConfig};
pub use stores::metrics::{MetricsSink, MetricsStore, StoreMetric};
pub use stores::request_cache::{
    MokaResponseCache, MokaResponseCacheConfig, RedisResponseCache, RedisResponseCacheConfig,
    RequestCacheConfig, RequestCacheStore, ResponseCache,
};
pub use stores::web_storage::{KeyValueStorage, MemoryStorage, WebStorageConfig, WebStorageStore};
