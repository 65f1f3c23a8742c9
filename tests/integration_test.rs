//! Integration tests for swr-fetch sessions over every store.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use swr_fetch::{
    DataStatus, FetchContext, FetchError, FetchOptions, FetchState, Fetcher, IndexedStore,
    IndexedStoreConfig, MemoryStorage, MemoryStore, MokaResponseCache, MokaResponseCacheConfig,
    RedisResponseCache, RedisResponseCacheConfig, RequestCacheConfig, RequestCacheStore, Store,
    WebStorageConfig, WebStorageStore,
};
use tokio::sync::watch;

// ============================================================================
// Test Types
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
    email: String,
}

// ============================================================================
// Fake API
// ============================================================================

fn fake_user_api() -> HashMap<String, Value> {
    let mut db = HashMap::new();
    db.insert(
        "/users/1".to_string(),
        json!({ "id": 1, "name": "Alice", "email": "alice@example.com" }),
    );
    db.insert(
        "/users/2".to_string(),
        json!({ "id": 2, "name": "Bob", "email": "bob@example.com" }),
    );
    db.insert(
        "/users?page=2&sort=name".to_string(),
        json!({ "id": 3, "name": "Charlie", "email": "charlie@example.com" }),
    );
    db
}

/// Fetcher answering from `db` after `delay`, counting calls.
fn api(delay: Duration, calls: Arc<AtomicUsize>) -> impl Fetcher + 'static {
    let db = Arc::new(fake_user_api());
    move |key: String| {
        let db = db.clone();
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            db.get(&key)
                .cloned()
                .ok_or_else(|| FetchError::remote(format!("404 Not Found: {}", key)))
        }
    }
}

/// Fetcher that is always offline.
fn offline() -> Arc<dyn Fetcher> {
    Arc::new(|_key: String| async move { Err::<Value, _>(FetchError::remote("offline")) })
}

// ============================================================================
// Helper Functions
// ============================================================================

async fn wait_until<T: Clone>(
    rx: &mut watch::Receiver<FetchState<T>>,
    condition: impl FnMut(&FetchState<T>) -> bool,
) -> FetchState<T> {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(condition))
        .await
        .expect("timed out waiting for session state")
        .expect("session dropped")
        .clone()
}

async fn settled<T: Clone>(rx: &mut watch::Receiver<FetchState<T>>) -> FetchState<T> {
    wait_until(rx, |s| !s.loading && !s.reloading).await
}

/// Load `/users/1` with a working API, then again with an offline one, over the same store.
async fn assert_serves_cached_copy_when_offline(store: Arc<dyn Store>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let online = FetchContext::new(api(Duration::from_millis(10), calls.clone())).with_store(store);

    let session = online.session::<User>();
    let mut rx = session.subscribe();
    session.activate("/users/1", FetchOptions::default());

    let state = settled(&mut rx).await;
    assert_eq!(state.status, DataStatus::Valid);
    assert_eq!(state.data.as_ref().map(|u| u.name.as_str()), Some("Alice"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let offline_ctx = online.with_fetcher(offline());
    let session = offline_ctx.session::<User>();
    let mut rx = session.subscribe();
    session.activate("/users/1/", FetchOptions::default());

    let state = wait_until(&mut rx, |s| s.error.is_some() && s.data.is_some()).await;
    assert_eq!(state.status, DataStatus::Stale);
    assert_eq!(state.data.map(|u| u.id), Some(1));
    assert_eq!(state.error, Some(FetchError::Remote("offline".to_string())));
    assert!(!state.loading);
}

fn sqlite_config(dir: &tempfile::TempDir, limit: usize) -> IndexedStoreConfig {
    IndexedStoreConfig {
        url: format!("sqlite://{}?mode=rwc", dir.path().join("cache.db").display()),
        limit,
        ..Default::default()
    }
}

// ============================================================================
// Session Tests
// ============================================================================

#[tokio::test]
async fn test_first_visit_loads_then_revisit_shows_cache_first() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
    let context =
        FetchContext::new(api(Duration::from_millis(50), calls.clone())).with_store(store.clone());

    let session = context.session::<User>();
    let mut rx = session.subscribe();
    session.activate("/users/1", FetchOptions::default());

    let state = session.state();
    assert!(state.loading);
    assert!(state.data.is_none());

    let state = settled(&mut rx).await;
    assert_eq!(state.status, DataStatus::Valid);
    assert_eq!(state.data.as_ref().map(|u| u.id), Some(1));
    assert!(store.has("/users/1").await.unwrap());

    // Another consumer mounts the same resource later.
    let revisit = context.session::<User>();
    let mut rx = revisit.subscribe();
    revisit.activate("/users/1", FetchOptions::default());

    let state = wait_until(&mut rx, |s| s.data.is_some()).await;
    assert_eq!(state.status, DataStatus::Stale);
    assert!(state.loading);

    let state = settled(&mut rx).await;
    assert_eq!(state.status, DataStatus::Valid);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_rapid_key_changes_show_only_latest() {
    let loads = Arc::new(std::sync::Mutex::new(Vec::new()));
    let record = loads.clone();

    let slow_then_fast = |key: String| async move {
        let delay = if key == "/users/1" { 200 } else { 10 };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok::<_, FetchError>(fake_user_api()[&key].clone())
    };
    let context = FetchContext::new(slow_then_fast);
    let session = context.session::<User>();
    let mut rx = session.subscribe();

    let options = FetchOptions::default().on_load(move |key: &str, user: &User| {
        record.lock().unwrap().push((key.to_string(), user.id));
    });
    session.activate("/users/1", options.clone());
    session.activate("/users/2", options);

    let state = wait_until(&mut rx, |s| s.status == DataStatus::Valid).await;
    assert_eq!(state.data.map(|u| u.name), Some("Bob".to_string()));

    tokio::time::sleep(Duration::from_millis(300)).await;
    let state = session.state();
    assert_eq!(state.key.as_deref(), Some("/users/2"));
    assert_eq!(state.data.map(|u| u.id), Some(2));
    assert_eq!(loads.lock().unwrap().as_slice(), &[("/users/2".to_string(), 2)]);
}

#[tokio::test]
async fn test_params_select_the_resource() {
    let calls = Arc::new(AtomicUsize::new(0));
    let context = FetchContext::new(api(Duration::ZERO, calls));
    let session = context.session::<User>();
    let mut rx = session.subscribe();

    session.activate(
        "/users?sort=name#top",
        FetchOptions::default().param("page", 2).param("filter", ""),
    );
    assert_eq!(session.key().as_deref(), Some("/users?page=2&sort=name"));

    let state = settled(&mut rx).await;
    assert_eq!(state.data.map(|u| u.name), Some("Charlie".to_string()));
}

#[tokio::test]
async fn test_unknown_resource_reports_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let context = FetchContext::new(api(Duration::ZERO, calls));
    let session = context.session::<User>();
    let mut rx = session.subscribe();

    session.activate("/users/404", FetchOptions::default());
    let state = settled(&mut rx).await;

    assert!(state.data.is_none());
    assert_eq!(state.status, DataStatus::Absent);
    assert_eq!(
        state.error,
        Some(FetchError::Remote("404 Not Found: /users/404".to_string()))
    );
    assert!(!context.store().has("/users/404").await.unwrap());
}

// ============================================================================
// Store Round Trips
// ============================================================================

#[tokio::test]
async fn test_memory_store_serves_offline() {
    assert_serves_cached_copy_when_offline(Arc::new(MemoryStore::default())).await;
}

#[tokio::test]
async fn test_indexed_store_serves_offline() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(IndexedStore::new(sqlite_config(&dir, 100)));
    assert_serves_cached_copy_when_offline(store.clone()).await;
    assert_eq!(store.persisted_len().await, Some(1));
}

#[tokio::test]
async fn test_web_storage_store_serves_offline() {
    let store = Arc::new(WebStorageStore::new(
        MemoryStorage::new(),
        WebStorageConfig::default(),
    ));
    assert_serves_cached_copy_when_offline(store.clone()).await;
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_request_cache_store_serves_offline() {
    let store = Arc::new(RequestCacheStore::new(
        MokaResponseCache::new(MokaResponseCacheConfig::default()),
        RequestCacheConfig {
            base_url: Some("https://api.example.com".to_string()),
        },
    ));
    assert_serves_cached_copy_when_offline(store).await;
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_redis_request_cache_store_serves_offline() {
    let cache = RedisResponseCache::new(RedisResponseCacheConfig {
        url: "redis://localhost:6379".to_string(),
        name: "swr-fetch-integration".to_string(),
        time_to_live: Some(Duration::from_secs(60)),
    })
    .await
    .expect("Failed to connect to Redis - is it running?");

    let store = Arc::new(RequestCacheStore::new(cache, RequestCacheConfig::default()));
    store.remove("/users/1").await.unwrap();
    assert_serves_cached_copy_when_offline(store.clone()).await;
    store.remove("/users/1").await.unwrap();
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_indexed_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    {
        let store: Arc<dyn Store> = Arc::new(IndexedStore::new(sqlite_config(&dir, 100)));
        let context = FetchContext::new(api(Duration::ZERO, calls.clone())).with_store(store);
        let session = context.session::<User>();
        let mut rx = session.subscribe();
        session.activate("/users/2", FetchOptions::default());
        settled(&mut rx).await;
    }

    let store: Arc<dyn Store> = Arc::new(IndexedStore::new(sqlite_config(&dir, 100)));
    let context = FetchContext::from_parts(offline(), store);
    let session = context.session::<User>();
    let mut rx = session.subscribe();
    session.activate("/users/2", FetchOptions::default());

    let state = wait_until(&mut rx, |s| s.data.is_some() && s.error.is_some()).await;
    assert_eq!(state.data.map(|u| u.name), Some("Bob".to_string()));
    assert_eq!(state.status, DataStatus::Stale);
}

#[tokio::test]
async fn test_indexed_store_keeps_newest_entries() {
    let dir = tempfile::tempdir().unwrap();
    let store = IndexedStore::new(sqlite_config(&dir, 3));

    for i in 0..5 {
        store.set(&format!("/items/{}", i), json!(i)).await.unwrap();
    }

    assert_eq!(store.persisted_len().await, Some(3));
    for i in 0..2 {
        assert!(!store.has(&format!("/items/{}", i)).await.unwrap());
    }
    for i in 2..5 {
        assert_eq!(
            store.get(&format!("/items/{}", i)).await.unwrap(),
            Some(json!(i))
        );
    }
}

#[tokio::test]
async fn test_web_storage_overflow_makes_room() {
    let storage = MemoryStorage::with_quota(1024);
    let store = Arc::new(WebStorageStore::new(
        storage.clone(),
        WebStorageConfig::default(),
    ));

    let payload = json!("x".repeat(150));
    for i in 0..20 {
        store
            .set(&format!("/items/{}", i), payload.clone())
            .await
            .unwrap();
    }

    assert!(storage.used_bytes() <= 1024);
    assert!(store.has("/items/19").await.unwrap());
    assert!(!store.has("/items/0").await.unwrap());

    // A reopened store sees exactly what survived.
    let reopened = WebStorageStore::new(storage, WebStorageConfig::default());
    assert_eq!(reopened.len(), store.len());
    assert_eq!(
        reopened.get("/items/19").await.unwrap(),
        Some(payload.clone())
    );
}
