use std::fmt;
use std::sync::Arc;

use crate::{
    clock::{Clock, SystemClock},
    offline::{OfflineObserver, OfflineSnapshot, Subscription},
    CacheOptions, OfflineController, ResponseCache,
};

/// The single offline controller and response cache shared by all clients.
///
/// Clones are handles to the same state; build one per process and hand
/// clones to the registry and completion clients.
#[derive(Clone)]
pub struct ClientContext {
    offline: OfflineController,
    cache: ResponseCache,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("offline", &self.offline)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Default for ClientContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientContext {
    pub fn new() -> Self {
        Self::with_clock(CacheOptions::default(), Arc::new(SystemClock))
    }

    pub fn with_cache_options(options: CacheOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// Uses `clock` for cache timestamps and lockout windows.
    pub fn with_clock(options: CacheOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            offline: OfflineController::with_clock(clock.clone()),
            cache: ResponseCache::with_clock(options, clock.clone()),
            clock,
        }
    }

    pub fn offline(&self) -> &OfflineController {
        &self.offline
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Offline state for UI layers.
    pub fn snapshot(&self) -> OfflineSnapshot {
        self.offline.snapshot()
    }

    pub fn subscribe(&self, observer: impl OfflineObserver + 'static) -> Subscription {
        self.offline.subscribe(observer)
    }

    /// Operator override; refused during a rate-limit lockout.
    pub fn toggle_offline_mode(&self, force: Option<bool>) -> bool {
        self.offline.toggle(force)
    }
}
