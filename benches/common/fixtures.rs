use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use swr_fetch::{FetchError, Fetcher};

/// Resource payload for benchmarks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchUser {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub score: u32,
}

impl BenchUser {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            name: format!("User {}", id),
            email: format!("user{}@example.com", id),
            score: (id % 1000) as u32,
        }
    }

    pub fn payload(id: u64) -> Value {
        serde_json::to_value(Self::new(id)).unwrap()
    }
}

/// Simulated HTTP API with configurable latency
#[derive(Clone)]
pub struct FakeApi {
    data: Arc<HashMap<String, Value>>,
    latency_ms: u64,
    request_count: Arc<AtomicUsize>,
}

impl FakeApi {
    pub fn new(num_users: usize, latency_ms: u64) -> Self {
        let data = (0..num_users as u64)
            .map(|id| (format!("/users/{}", id), BenchUser::payload(id)))
            .collect();

        Self {
            data: Arc::new(data),
            latency_ms,
            request_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[allow(dead_code)]
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Fetcher for FakeApi {
    async fn fetch(&self, key: &str) -> Result<Value, FetchError> {
        self.request_count.fetch_add(1, Ordering::Relaxed);

        // Simulate network latency
        tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;

        self.data
            .get(key)
            .cloned()
            .ok_or_else(|| FetchError::remote(format!("404 Not Found: {}", key)))
    }
}

/// Generate resource keys for different workload patterns
pub struct KeyGenerator {
    num_keys: usize,
}

impl KeyGenerator {
    pub fn new(num_keys: usize) -> Self {
        Self { num_keys }
    }

    /// Canonical keys, in order
    pub fn sequential(&self) -> Vec<String> {
        (0..self.num_keys).map(|i| format!("/users/{}", i)).collect()
    }

    /// Unnormalized URLs as a caller would write them: trailing slashes,
    /// unsorted queries, empty parameters and fragments
    pub fn messy_urls(&self, count: usize) -> Vec<String> {
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|_| {
                let id = rng.gen_range(0..self.num_keys);
                format!(
                    "https://api.example.com/users/{}/?sort=name&page={}&filter=&q=a+b#top",
                    id,
                    rng.gen_range(1..50)
                )
            })
            .collect()
    }

    /// Simplified Zipf: 80% of requests go to 20% of keys
    pub fn zipf_random(&self, count: usize) -> Vec<String> {
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|_| {
                let id = if rng.gen_bool(0.8) {
                    rng.gen_range(0..(self.num_keys / 5).max(1))
                } else {
                    rng.gen_range(0..self.num_keys)
                };
                format!("/users/{}", id)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    async fn test_fake_api() {
        use super::FakeApi;
        use swr_fetch::Fetcher;

        let api = FakeApi::new(100, 1);

        let user = api.fetch("/users/0").await.unwrap();
        assert_eq!(user["id"], 0);
        assert!(api.fetch("/users/100").await.is_err());

        assert_eq!(api.request_count(), 2);
    }

    #[test]
    fn test_key_generator() {
        use super::KeyGenerator;

        let key_gen = KeyGenerator::new(100);

        let seq = key_gen.sequential();
        assert_eq!(seq.len(), 100);
        assert_eq!(seq[0], "/users/0");

        assert_eq!(key_gen.messy_urls(10).len(), 10);
        assert_eq!(key_gen.zipf_random(50).len(), 50);
    }
}
