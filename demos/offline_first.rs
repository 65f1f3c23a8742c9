//! Example showing sessions of different payload types sharing one persistent store.
//!
//! The first run fetches from the (simulated) API and persists the results in
//! SQLite. Later runs show the cached copies immediately, even while the API
//! is failing, then replace them once the API answers.

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use swr_fetch::{
    DataStatus, FetchContext, FetchError, FetchOptions, IndexedStore, IndexedStoreConfig, Store,
};

#[derive(Clone, Debug, Deserialize)]
struct User {
    id: u64,
    name: String,
}

#[derive(Clone, Debug, Deserialize)]
struct ApiKey {
    key: String,
    user_id: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let offline = std::env::args().any(|arg| arg == "--offline");

    // Payloads are stored untyped, so one store serves every session.
    let store: Arc<dyn Store> = Arc::new(IndexedStore::new(IndexedStoreConfig {
        url: "sqlite://offline_first.db?mode=rwc".to_string(),
        ..Default::default()
    }));

    let context = FetchContext::new(move |key: String| async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        if offline {
            return Err(FetchError::remote("network unreachable"));
        }
        match key.as_str() {
            "/users/1" => Ok(json!({ "id": 1, "name": "Alice" })),
            "/keys?user=1" => Ok(json!({ "key": "sk_live_123", "user_id": 1 })),
            _ => Err(FetchError::remote(format!("404 Not Found: {}", key))),
        }
    })
    .with_store(store);

    let users = context.session::<User>();
    let keys = context.session::<ApiKey>();
    let mut user_state = users.subscribe();
    let mut key_state = keys.subscribe();

    users.activate(
        "/users/1/",
        FetchOptions::default().on_load(|key, user: &User| println!("loaded {key}: {user:?}")),
    );
    keys.activate("/keys", FetchOptions::default().param("user", 1));

    let user = user_state
        .wait_for(|s| s.status != DataStatus::Absent || s.error.is_some())
        .await?
        .clone();
    match (&user.data, user.status) {
        (Some(user), DataStatus::Stale) => println!("cached user: {} ({})", user.name, user.id),
        (Some(user), _) => println!("fresh user: {} ({})", user.name, user.id),
        (None, _) => println!("no user yet"),
    }

    let api_key = key_state.wait_for(|s| !s.loading).await?.clone();
    match (api_key.data, api_key.error) {
        (Some(k), error) => println!(
            "api key for user {}: {} (error: {:?})",
            k.user_id, k.key, error
        ),
        (None, Some(error)) => println!("api key unavailable: {error}"),
        (None, None) => println!("api key unavailable"),
    }

    Ok(())
}
