use std::fmt::Display;

/// Error type for store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// A store operation failed.
    #[error("[{tier}] cache error for key '{key}': {message}")]
    Operation {
        tier: String,
        key: String,
        message: String,
    },
    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The underlying storage refused a write because it is full.
    #[error("quota exceeded writing '{key}': {needed} bytes needed, {available} available")]
    QuotaExceeded {
        key: String,
        needed: usize,
        available: usize,
    },
}

impl CacheError {
    /// Create a new operation error.
    pub fn operation(
        tier: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CacheError::Operation {
            tier: tier.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether this error was caused by the storage running out of space.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, CacheError::QuotaExceeded { .. })
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

/// Error produced by a remote fetch, surfaced to the consumer as session `error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The fetcher rejected.
    #[error("remote fetch failed: {0}")]
    Remote(String),
    /// The fetched payload does not have the shape the session expects.
    #[error("failed to decode fetched payload: {0}")]
    Decode(String),
}

impl FetchError {
    /// Wrap any displayable failure as a remote error.
    pub fn remote(e: impl Display) -> Self {
        FetchError::Remote(e.to_string())
    }
}
