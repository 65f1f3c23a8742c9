use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CacheError;
use crate::utils::next_timestamp;

/// A persisted cache record.
///
/// Entries are never mutated in place: a newer `set` for the same key
/// replaces the whole record with a newer timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreEntry {
    /// The normalized resource key.
    pub key: String,

    /// The opaque payload.
    pub data: Value,

    /// Unix timestamp in milliseconds of the write.
    pub timestamp: i64,
}

impl StoreEntry {
    /// Create an entry stamped with the current write time.
    pub fn new(key: impl Into<String>, data: Value) -> Self {
        StoreEntry {
            key: key.into(),
            data,
            timestamp: next_timestamp(),
        }
    }

    /// Encode as the JSON record used by persistent backends.
    pub fn to_json(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON record written by `to_json`.
    pub fn from_json(raw: &str) -> Result<Self, CacheError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Keys of the `count` oldest entries, ordered ascending by timestamp.
pub(crate) fn oldest_keys<'a, I>(entries: I, count: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a StoreEntry>,
{
    let mut by_age: Vec<(&str, i64)> = entries
        .into_iter()
        .map(|e| (e.key.as_str(), e.timestamp))
        .collect();
    by_age.sort_by_key(|(_, ts)| *ts);
    by_age
        .into_iter()
        .take(count)
        .map(|(k, _)| k.to_string())
        .collect()
}
