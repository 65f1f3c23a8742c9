//! Default fetcher and store shared by a group of sessions.
//!
//! A context is a plain value handed to whatever creates sessions. Deriving a
//! child context with `with_store`/`with_fetcher` scopes an override to one
//! region of the application without touching the parent.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use swr_fetch::{FetchContext, FetchOptions, IndexedStore, IndexedStoreConfig};
//!
//! let context = FetchContext::new(|key: String| async move { api::get(&key).await });
//! let persistent = context.with_store(Arc::new(IndexedStore::new(IndexedStoreConfig::default())));
//!
//! let session = persistent.session::<User>();
//! session.activate("/users/1", FetchOptions::default());
//! ```

use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::fetcher::Fetcher;
use crate::session::FetchSession;
use crate::store::Store;
use crate::stores::memory::MemoryStore;

/// Default fetcher and store for sessions.
#[derive(Clone)]
pub struct FetchContext {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn Store>,
}

impl FetchContext {
    /// Create a context with `fetcher` and a fresh `MemoryStore`.
    pub fn new(fetcher: impl Fetcher + 'static) -> Self {
        FetchContext {
            fetcher: Arc::new(fetcher),
            store: Arc::new(MemoryStore::default()),
        }
    }

    /// Create a context from already shared parts.
    pub fn from_parts(fetcher: Arc<dyn Fetcher>, store: Arc<dyn Store>) -> Self {
        FetchContext { fetcher, store }
    }

    /// A child context using `store` instead.
    pub fn with_store(&self, store: Arc<dyn Store>) -> Self {
        FetchContext {
            fetcher: Arc::clone(&self.fetcher),
            store,
        }
    }

    /// A child context using `fetcher` instead.
    pub fn with_fetcher(&self, fetcher: Arc<dyn Fetcher>) -> Self {
        FetchContext {
            fetcher,
            store: Arc::clone(&self.store),
        }
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Create a session bound to this context.
    pub fn session<T>(&self) -> FetchSession<T>
    where
        T: Clone + Send + Sync + DeserializeOwned + 'static,
    {
        FetchSession::new(self.clone())
    }
}
