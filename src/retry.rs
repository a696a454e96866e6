use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;

use crate::PkgScoutError;

/// Jitter multiplier range applied to every backoff delay.
pub const JITTER_RANGE: RangeInclusive<f64> = 0.75..=1.25;

/// Default cap for a single backoff delay.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

/// Decides whether a failed attempt is retried and how long to wait first.
///
/// Holds configuration only, so one policy can be shared by any number of
/// concurrent requests.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BACKOFF_MS)
    }
}

impl RetryPolicy {
    pub fn new(max_backoff_ms: u64) -> Self {
        Self { max_backoff_ms }
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// `attempt` counts retries already performed for this call.
    ///
    /// 429 never reaches a retry: rate limiting is turned into a lockout by
    /// the client, so [`PkgScoutError::RateLimited`] is always final here.
    pub fn should_retry(&self, error: &PkgScoutError, attempt: usize, max_retries: usize) -> bool {
        if attempt >= max_retries {
            return false;
        }
        match error {
            PkgScoutError::Network(_) | PkgScoutError::Server { .. } => true,
            PkgScoutError::Client { .. }
            | PkgScoutError::RateLimited { .. }
            | PkgScoutError::Parse(_)
            | PkgScoutError::Offline
            | PkgScoutError::QueueCleared => false,
        }
    }

    /// `min(base * 2^attempt * jitter, cap)` with jitter drawn from
    /// [`JITTER_RANGE`].
    pub fn compute_backoff(&self, attempt: usize, base_delay_ms: u64) -> Duration {
        let jitter = rand::thread_rng().gen_range(JITTER_RANGE);
        self.backoff_with_jitter(attempt, base_delay_ms, jitter)
    }

    /// Deterministic form of [`RetryPolicy::compute_backoff`].
    pub fn backoff_with_jitter(&self, attempt: usize, base_delay_ms: u64, jitter: f64) -> Duration {
        let exp = attempt.min(32) as i32;
        let raw = base_delay_ms as f64 * 2f64.powi(exp) * jitter;
        let capped = raw.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped.round() as u64)
    }
}
