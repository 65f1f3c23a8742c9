use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;

use crate::error::FetchError;

/// The remote source of truth for a resource key.
///
/// Any `Ok` is a successful load, any `Err` a failure; the payload is opaque.
/// Plain async closures implement this trait:
///
/// ```
/// use swr_fetch::{FetchError, Fetcher};
///
/// fn assert_fetcher(_: &impl Fetcher) {}
///
/// let fetcher = |key: String| async move {
///     Ok::<_, FetchError>(serde_json::json!({ "key": key }))
/// };
/// assert_fetcher(&fetcher);
/// ```
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Value, FetchError>;
}

#[async_trait]
impl<F, Fut> Fetcher for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
{
    async fn fetch(&self, key: &str) -> Result<Value, FetchError> {
        (self)(key.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    struct Echo;

    #[async_trait]
    impl Fetcher for Echo {
        async fn fetch(&self, key: &str) -> Result<Value, FetchError> {
            Ok(json!({ "echo": key }))
        }
    }

    #[tokio::test]
    async fn test_closure_fetcher_receives_key() {
        let fetcher = |key: String| async move {
            if key == "/missing" {
                Err(FetchError::remote("404 Not Found"))
            } else {
                Ok(json!({ "key": key }))
            }
        };

        assert_eq!(fetcher.fetch("/a").await.unwrap(), json!({"key": "/a"}));
        assert_eq!(
            fetcher.fetch("/missing").await.unwrap_err(),
            FetchError::Remote("404 Not Found".to_string())
        );
    }

    #[tokio::test]
    async fn test_trait_object() {
        let fetcher: Arc<dyn Fetcher> = Arc::new(Echo);
        assert_eq!(fetcher.fetch("/x").await.unwrap(), json!({"echo": "/x"}));
    }
}
