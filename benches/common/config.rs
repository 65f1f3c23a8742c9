use std::env;

/// Configuration for benchmarks, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Simulated API latency in milliseconds (from API_LATENCY_MS env var, defaults to 20)
    pub api_latency_ms: u64,

    /// Number of distinct resources (from BENCH_RESOURCES env var, defaults to 1000)
    pub resources: usize,

    /// Sample size for benchmarks (from BENCH_SAMPLE_SIZE env var, defaults to 100)
    pub sample_size: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            api_latency_ms: env::var("API_LATENCY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),
            resources: env::var("BENCH_RESOURCES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            sample_size: env::var("BENCH_SAMPLE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
        }
    }
}

impl BenchConfig {
    pub fn new() -> Self {
        let config = Self::default();
        eprintln!("Benchmark Configuration:");
        eprintln!("  API Latency: {}ms", config.api_latency_ms);
        eprintln!("  Resources: {}", config.resources);
        eprintln!("  Sample Size: {}", config.sample_size);
        config
    }
}
