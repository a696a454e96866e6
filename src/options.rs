use serde::Deserialize;

/// Configures timeout, retry, caching and lockout behavior of a client.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Base retry backoff in milliseconds (exponential strategy).
    pub initial_backoff_ms: u64,
    /// Upper bound for a single backoff delay in milliseconds.
    pub max_backoff_ms: u64,
    /// TTL applied to cache reads when a call does not pass its own.
    pub default_cache_ttl_ms: u64,
    /// Lockout length used when a 429 carries no usable retry-after hint.
    pub rate_limit_default_secs: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            default_cache_ttl_ms: 3_600_000,
            rate_limit_default_secs: 60,
        }
    }
}

/// Configures the shared response cache.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Entry count above which the oldest entries are evicted.
    pub max_entries: usize,
}

impl CacheOptions {
    /// Entry count the cache is trimmed down to after an eviction pass.
    pub fn low_watermark(&self) -> usize {
        self.max_entries - self.max_entries / 5
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self { max_entries: 100 }
    }
}

/// Configures a [`crate::RequestPacer`].
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct PacerOptions {
    /// Dispatch ceiling; calls are spaced `60_000 / requests_per_minute` ms apart.
    pub requests_per_minute: u32,
    /// Retries per paced call for transient failures.
    pub max_retries: usize,
    /// Base retry delay in milliseconds when no `Retry-After` hint is present.
    pub retry_delay_ms: u64,
    /// Longest single retry wait. A `Retry-After` hint above it is not waited
    /// out; the failure is returned instead.
    pub max_retry_wait_ms: u64,
}

impl PacerOptions {
    /// Package registry pacing: 30 requests per minute.
    pub fn registry() -> Self {
        Self::default()
    }

    /// Pacing for endpoints that tolerate 60 requests per minute.
    pub fn high_throughput() -> Self {
        Self {
            requests_per_minute: 60,
            ..Self::default()
        }
    }

    /// Minimum spacing between two dispatches in milliseconds.
    pub fn spacing_ms(&self) -> u64 {
        60_000 / u64::from(self.requests_per_minute.max(1))
    }
}

impl Default for PacerOptions {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            max_retries: 2,
            retry_delay_ms: 1_000,
            max_retry_wait_ms: 60_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheOptions, ClientOptions, PacerOptions};

    #[test]
    fn defaults_match_documented_values() {
        let client = ClientOptions::default();
        assert_eq!(client.max_retries, 3);
        assert_eq!(client.initial_backoff_ms, 1_000);
        assert_eq!(client.default_cache_ttl_ms, 3_600_000);
        assert_eq!(CacheOptions::default().low_watermark(), 80);
        assert_eq!(PacerOptions::registry().spacing_ms(), 2_000);
        assert_eq!(PacerOptions::high_throughput().spacing_ms(), 1_000);
    }

    #[test]
    fn partial_settings_fall_back_to_defaults() {
        let opts: ClientOptions =
            serde_json::from_str(r#"{"max_retries": 5}"#).expect("options must parse");
        assert_eq!(opts.max_retries, 5);
        assert_eq!(opts.max_backoff_ms, 30_000);
    }

    #[test]
    fn zero_rate_does_not_divide_by_zero() {
        let opts = PacerOptions {
            requests_per_minute: 0,
            ..PacerOptions::default()
        };
        assert_eq!(opts.spacing_ms(), 60_000);
    }
}
