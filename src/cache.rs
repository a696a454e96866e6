use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::CacheOptions;

#[derive(Clone, Debug)]
struct CacheEntry {
    value: Value,
    stored_at: DateTime<Utc>,
    seq: u64,
}

#[derive(Default)]
struct Entries {
    map: HashMap<String, CacheEntry>,
    next_seq: u64,
}

/// Shared map from request fingerprint to the last successful payload.
///
/// Cloning yields another handle to the same entries.
#[derive(Clone)]
pub struct ResponseCache {
    entries: Arc<Mutex<Entries>>,
    clock: Arc<dyn Clock>,
    options: CacheOptions,
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("len", &self.len())
            .field("options", &self.options)
            .finish()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}

impl ResponseCache {
    pub fn new(options: CacheOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    pub fn with_clock(options: CacheOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries::default())),
            clock,
            options,
        }
    }

    /// Returns the stored value if it was written less than `ttl` ago.
    ///
    /// Stale entries read as absent and stay in place until evicted or
    /// overwritten.
    pub fn get(&self, key: &str, ttl: Duration) -> Option<Value> {
        let now = self.clock.now();
        let entries = self.lock();
        let entry = entries.map.get(key)?;
        let age = now.signed_duration_since(entry.stored_at);
        let fresh = match age.to_std() {
            Ok(age) => age < ttl,
            // stored in the future relative to `now`; the clock went backwards
            Err(_) => true,
        };
        fresh.then(|| entry.value.clone())
    }

    /// Stores `value` under `key`, then evicts the oldest entries if the cache
    /// grew past its capacity.
    pub fn put(&self, key: impl Into<String>, value: Value) {
        let stored_at = self.clock.now();
        let mut entries = self.lock();
        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.map.insert(
            key.into(),
            CacheEntry {
                value,
                stored_at,
                seq,
            },
        );

        if entries.map.len() > self.options.max_entries {
            self.evict_oldest(&mut entries);
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().map.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().map.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_oldest(&self, entries: &mut Entries) {
        let target = self.options.low_watermark();
        let excess = entries.map.len().saturating_sub(target);
        if excess == 0 {
            return;
        }

        let mut by_age: Vec<(DateTime<Utc>, u64, String)> = entries
            .map
            .iter()
            .map(|(key, entry)| (entry.stored_at, entry.seq, key.clone()))
            .collect();
        by_age.sort_unstable_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        for (_, _, key) in by_age.into_iter().take(excess) {
            entries.map.remove(&key);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(evicted = excess, remaining = entries.map.len(), "cache eviction pass");
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use serde_json::json;

    use super::ResponseCache;
    use crate::clock::ManualClock;
    use crate::CacheOptions;

    const HOUR: Duration = Duration::from_secs(3_600);

    fn cache_with_clock(max_entries: usize) -> (ResponseCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = ResponseCache::with_clock(CacheOptions { max_entries }, clock.clone());
        (cache, clock)
    }

    #[test]
    fn get_returns_value_only_within_ttl() {
        let (cache, clock) = cache_with_clock(100);
        cache.put("k", json!({"v": 1}));

        assert_eq!(cache.get("k", HOUR), Some(json!({"v": 1})));
        clock.advance(Duration::from_secs(3_599));
        assert!(cache.get("k", HOUR).is_some());
        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("k", HOUR), None);
        // a shorter TTL on an otherwise fresh entry also misses
        cache.put("k", json!(2));
        assert_eq!(cache.get("k", Duration::ZERO), None);
    }

    #[test]
    fn stale_entries_are_not_deleted_eagerly() {
        let (cache, clock) = cache_with_clock(100);
        cache.put("k", json!(1));
        clock.advance(HOUR * 2);

        assert_eq!(cache.get("k", HOUR), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn missing_key_is_absent() {
        let cache = ResponseCache::default();
        assert_eq!(cache.get("nope", HOUR), None);
    }

    #[test]
    fn eviction_keeps_most_recent_entries_under_capacity() {
        let (cache, clock) = cache_with_clock(10);
        for i in 0..11 {
            cache.put(format!("k{i}"), json!(i));
            clock.advance(Duration::from_secs(1));
        }

        // 11 > 10 triggers a pass down to the watermark of 8
        assert_eq!(cache.len(), 8);
        for i in 0..3 {
            assert_eq!(cache.get(&format!("k{i}"), HOUR), None);
        }
        for i in 3..11 {
            assert_eq!(cache.get(&format!("k{i}"), HOUR), Some(json!(i)));
        }
    }

    #[test]
    fn eviction_breaks_timestamp_ties_by_insertion_order() {
        let (cache, _clock) = cache_with_clock(5);
        for i in 0..6 {
            cache.put(format!("k{i}"), json!(i));
        }

        assert_eq!(cache.len(), 4);
        assert!(cache.get("k0", HOUR).is_none());
        assert!(cache.get("k1", HOUR).is_none());
        assert!(cache.get("k5", HOUR).is_some());
    }

    #[test]
    fn long_put_sequences_never_exceed_capacity() {
        let (cache, clock) = cache_with_clock(100);
        for i in 0..1_000 {
            cache.put(format!("k{i}"), json!(i));
            clock.advance(Duration::from_millis(1));
            assert!(cache.len() <= 100);
        }
        assert!(cache.get("k999", HOUR).is_some());
    }

    #[test]
    fn overwrite_refreshes_timestamp() {
        let (cache, clock) = cache_with_clock(100);
        cache.put("k", json!("old"));
        clock.advance(Duration::from_secs(50));
        cache.put("k", json!("new"));
        clock.advance(Duration::from_secs(50));

        assert_eq!(cache.get("k", Duration::from_secs(60)), Some(json!("new")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_access_and_clear_do_not_corrupt_state() {
        let cache = ResponseCache::new(CacheOptions { max_entries: 50 });
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("t{t}-{}", i % 64);
                        cache.put(key.clone(), json!({"t": t, "i": i}));
                        if let Some(value) = cache.get(&key, HOUR) {
                            assert_eq!(value["t"], json!(t));
                        }
                        if i % 97 == 0 {
                            cache.clear();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker thread must not panic");
        }
        assert!(cache.len() <= 50);

        cache.clear();
        assert!(cache.is_empty());
        for t in 0..8 {
            for i in 0..64 {
                assert_eq!(cache.get(&format!("t{t}-{i}"), HOUR), None);
            }
        }
    }
}
