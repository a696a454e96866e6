use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::{Clock, SystemClock};

#[derive(Clone, Copy, Debug, Default)]
struct OfflineState {
    manual_offline: bool,
    rate_limited_until: Option<DateTime<Utc>>,
}

/// Derived connectivity mode. `RateLimited` wins over `ManualOffline`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineMode {
    Online,
    ManualOffline,
    RateLimited,
}

impl OfflineMode {
    pub fn user_message(self) -> &'static str {
        match self {
            Self::Online => "Online",
            Self::ManualOffline => "Offline mode is on",
            Self::RateLimited => "Rate limited, remote lookups paused",
        }
    }
}

/// Point-in-time view of the offline state for UI layers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSnapshot {
    /// True when calls are currently skipped, for either reason.
    pub is_offline_mode: bool,
    pub is_rate_limited: bool,
    pub manual_offline: bool,
    pub rate_limited_until: Option<DateTime<Utc>>,
}

/// Receives every offline state change.
///
/// Called synchronously on the thread that made the change. Implementations
/// must not mutate the controller from inside `on_change`.
pub trait OfflineObserver: Send + Sync {
    fn on_change(&self, snapshot: &OfflineSnapshot);
}

impl<F> OfflineObserver for F
where
    F: Fn(&OfflineSnapshot) + Send + Sync,
{
    fn on_change(&self, snapshot: &OfflineSnapshot) {
        self(snapshot)
    }
}

struct Inner {
    state: Mutex<OfflineState>,
    // serializes transitions so observers see them in order
    transition: Mutex<()>,
    observers: Mutex<Vec<(u64, Arc<dyn OfflineObserver>)>>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

/// Handle to the process-wide offline state. Clones share the same state.
///
/// Every request consults it before touching the network, and a 429 seen
/// by any caller locks out all of them.
#[derive(Clone)]
pub struct OfflineController {
    inner: Arc<Inner>,
}

impl fmt::Debug for OfflineController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineController")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl Default for OfflineController {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineController {
    /// Starts online with no lockout.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(OfflineState::default()),
                transition: Mutex::new(()),
                observers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                clock,
            }),
        }
    }

    /// Flips manual offline mode, or sets it to `force` when given.
    ///
    /// Rejected while a rate-limit lockout is active: the current
    /// `manual_offline` value is returned unchanged and nobody is notified.
    pub fn toggle(&self, force: Option<bool>) -> bool {
        let _transition = lock(&self.inner.transition);
        let snapshot = {
            let mut state = self.state();
            if self.lockout_active(&state) {
                #[cfg(feature = "tracing")]
                tracing::debug!("offline toggle rejected during rate-limit lockout");
                return state.manual_offline;
            }
            state.manual_offline = force.unwrap_or(!state.manual_offline);
            self.snapshot_of(&state)
        };
        self.notify(&snapshot);
        snapshot.manual_offline
    }

    /// Locks out all callers for `duration` and switches manual offline on.
    ///
    /// When the lockout expires the controller stays manually offline until
    /// someone toggles it back: expiry means "may go online", not "online".
    pub fn enter_rate_limited(&self, duration: Duration) -> DateTime<Utc> {
        let _transition = lock(&self.inner.transition);
        let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        let now = self.inner.clock.now();
        let until = now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let snapshot = {
            let mut state = self.state();
            state.rate_limited_until = Some(until);
            state.manual_offline = true;
            self.snapshot_of(&state)
        };

        #[cfg(feature = "tracing")]
        tracing::warn!(until = %until, "rate limit hit, entering offline lockout");

        self.notify(&snapshot);
        until
    }

    pub fn is_rate_limited(&self) -> bool {
        let state = self.state();
        self.lockout_active(&state)
    }

    pub fn is_manual_offline(&self) -> bool {
        self.state().manual_offline
    }

    pub fn should_use_offline_mode(&self) -> bool {
        let state = self.state();
        state.manual_offline || self.lockout_active(&state)
    }

    pub fn rate_limited_until(&self) -> Option<DateTime<Utc>> {
        self.state().rate_limited_until
    }

    pub fn mode(&self) -> OfflineMode {
        let state = self.state();
        if self.lockout_active(&state) {
            OfflineMode::RateLimited
        } else if state.manual_offline {
            OfflineMode::ManualOffline
        } else {
            OfflineMode::Online
        }
    }

    pub fn snapshot(&self) -> OfflineSnapshot {
        let state = self.state();
        self.snapshot_of(&state)
    }

    /// Registers `observer` for every later state change.
    pub fn subscribe(&self, observer: impl OfflineObserver + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.observers).push((id, Arc::new(observer)));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.inner.observers).len()
    }

    /// Locks the state and clears an elapsed lockout.
    fn state(&self) -> MutexGuard<'_, OfflineState> {
        let mut state = lock(&self.inner.state);
        if let Some(until) = state.rate_limited_until {
            if self.inner.clock.now() >= until {
                state.rate_limited_until = None;
            }
        }
        state
    }

    fn lockout_active(&self, state: &OfflineState) -> bool {
        state
            .rate_limited_until
            .is_some_and(|until| self.inner.clock.now() < until)
    }

    fn snapshot_of(&self, state: &OfflineState) -> OfflineSnapshot {
        let is_rate_limited = self.lockout_active(state);
        OfflineSnapshot {
            is_offline_mode: state.manual_offline || is_rate_limited,
            is_rate_limited,
            manual_offline: state.manual_offline,
            rate_limited_until: state.rate_limited_until,
        }
    }

    fn notify(&self, snapshot: &OfflineSnapshot) {
        let observers: Vec<Arc<dyn OfflineObserver>> = lock(&self.inner.observers)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in observers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.on_change(snapshot)));
            if outcome.is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!("offline observer panicked; continuing with remaining observers");
            }
        }
    }
}

/// Returned by [`OfflineController::subscribe`]; removes the observer when
/// [`Subscription::unsubscribe`] is called. Dropping it keeps the observer.
#[derive(Debug)]
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner.observers).retain(|(id, _)| *id != self.id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{OfflineController, OfflineMode, OfflineSnapshot};
    use crate::clock::ManualClock;

    fn controller() -> (OfflineController, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (OfflineController::with_clock(clock.clone()), clock)
    }

    #[test]
    fn starts_online() {
        let (offline, _) = controller();
        assert!(!offline.should_use_offline_mode());
        assert_eq!(offline.mode(), OfflineMode::Online);
        assert_eq!(offline.rate_limited_until(), None);
    }

    #[test]
    fn toggle_flips_and_forces() {
        let (offline, _) = controller();
        assert!(offline.toggle(None));
        assert!(offline.should_use_offline_mode());
        assert!(offline.toggle(Some(true)));
        assert!(!offline.toggle(None));
        assert!(!offline.toggle(Some(false)));
        assert_eq!(offline.mode(), OfflineMode::Online);
    }

    #[test]
    fn toggle_is_rejected_while_rate_limited() {
        let (offline, _) = controller();
        offline.enter_rate_limited(Duration::from_secs(60));

        assert!(offline.toggle(Some(false)));
        assert!(offline.toggle(None));
        assert!(offline.is_manual_offline());
        assert_eq!(offline.mode(), OfflineMode::RateLimited);
    }

    #[test]
    fn lockout_expiry_leaves_manual_offline_set() {
        let (offline, clock) = controller();
        offline.enter_rate_limited(Duration::from_secs(60));
        assert!(offline.should_use_offline_mode());
        assert!(offline.is_rate_limited());

        clock.advance(Duration::from_secs(61));
        assert!(!offline.is_rate_limited());
        assert!(offline.is_manual_offline());
        assert!(offline.should_use_offline_mode());
        assert_eq!(offline.mode(), OfflineMode::ManualOffline);
        // elapsed lockout was cleared on read
        assert_eq!(offline.rate_limited_until(), None);

        assert!(!offline.toggle(None));
        assert!(!offline.should_use_offline_mode());
    }

    #[test]
    fn observers_see_transitions_in_order() {
        let (offline, _) = controller();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = offline.subscribe(move |snapshot: &OfflineSnapshot| {
            sink.lock().unwrap().push(*snapshot);
        });

        offline.toggle(None);
        offline.toggle(None);
        offline.enter_rate_limited(Duration::from_secs(5));
        // rejected toggle does not notify
        offline.toggle(None);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].manual_offline && !seen[0].is_rate_limited);
        assert!(!seen[1].is_offline_mode);
        assert!(seen[2].is_rate_limited && seen[2].manual_offline);
        assert!(seen[2].rate_limited_until.is_some());
    }

    #[test]
    fn panicking_observer_does_not_block_others_or_caller() {
        let (offline, _) = controller();
        let calls = Arc::new(Mutex::new(0));
        let _bad = offline.subscribe(|_: &OfflineSnapshot| panic!("observer failure"));
        let counter = calls.clone();
        let _good = offline.subscribe(move |_: &OfflineSnapshot| {
            *counter.lock().unwrap() += 1;
        });

        assert!(offline.toggle(None));
        offline.enter_rate_limited(Duration::from_secs(1));
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn unsubscribe_removes_only_that_observer() {
        let (offline, _) = controller();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let a = calls.clone();
        let first = offline.subscribe(move |_: &OfflineSnapshot| a.lock().unwrap().push("a"));
        let b = calls.clone();
        let _second = offline.subscribe(move |_: &OfflineSnapshot| b.lock().unwrap().push("b"));
        assert_eq!(offline.observer_count(), 2);

        first.unsubscribe();
        offline.toggle(None);

        assert_eq!(offline.observer_count(), 1);
        assert_eq!(*calls.lock().unwrap(), vec!["b"]);
    }

    #[test]
    fn clones_share_state() {
        let (offline, _) = controller();
        let other = offline.clone();
        other.enter_rate_limited(Duration::from_secs(30));
        assert!(offline.is_rate_limited());
        assert!(offline.snapshot().is_offline_mode);
    }
}
