//! Time-bounded cache keyed by correlation id.
//!
//! Every entry carries an absolute deadline. A single background sweeper per
//! cache sleeps until the earliest deadline and evicts whatever is due, so
//! there is never more than one timer task regardless of request volume.
//!
//! # Eviction contract
//! - The registered callback fires exactly once for every entry that leaves
//!   the cache through expiry or `remove`/`remove_where`
//! - `take` removes without firing, which is how a matched response consumes
//!   its request
//! - An entry past its deadline is never returned, even if the sweeper has
//!   not reached it yet
//!
//! Callbacks run outside the cache lock. A panicking callback is caught and
//! logged; the entry stays removed and the sweeper keeps running.
//!
//! Built outside a tokio runtime, the cache drives its sweeper from a
//! dedicated thread with a single-threaded runtime. `ExpiringCache::lazy`
//! builds a cache with no sweeper at all: expiry then happens on access or
//! through `purge_expired`.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::correlation_id::CorrelationId;
use super::eviction::EvictionReason;

type EvictionCallback<V> = Arc<dyn Fn(CorrelationId, V, EvictionReason) + Send + Sync>;

/// Upper bound for deadlines when `now + ttl` overflows
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

struct CacheState<V> {
    entries: HashMap<CorrelationId, CacheEntry<V>>,
    /// Deadlines ordered earliest first; mirrors `entries` exactly
    deadlines: BTreeSet<(Instant, CorrelationId)>,
}

impl<V> CacheState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            deadlines: BTreeSet::new(),
        }
    }

    /// Returns true if a live entry was replaced
    fn insert(&mut self, id: CorrelationId, value: V, expires_at: Instant) -> bool {
        let previous = self.entries.insert(id, CacheEntry { value, expires_at });
        if let Some(previous) = &previous {
            self.deadlines.remove(&(previous.expires_at, id));
        }
        self.deadlines.insert((expires_at, id));
        previous.is_some()
    }

    fn take(&mut self, id: &CorrelationId) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(id)?;
        self.deadlines.remove(&(entry.expires_at, *id));
        Some(entry)
    }

    fn drain_expired(&mut self, now: Instant) -> Vec<(CorrelationId, V)> {
        let mut expired = Vec::new();
        while let Some(&(deadline, id)) = self.deadlines.first() {
            if deadline > now {
                break;
            }
            self.deadlines.pop_first();
            if let Some(entry) = self.entries.remove(&id) {
                expired.push((id, entry.value));
            }
        }
        expired
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first().map(|(deadline, _)| *deadline)
    }
}

struct Shared<V> {
    state: Mutex<CacheState<V>>,
    on_evict: RwLock<Option<EvictionCallback<V>>>,
    wakeup: Notify,
}

impl<V> Shared<V> {
    fn notify_evicted(&self, id: CorrelationId, value: V, reason: EvictionReason) {
        let Some(callback) = self.on_evict.read().clone() else {
            return;
        };

        if catch_unwind(AssertUnwindSafe(|| callback(id, value, reason))).is_err() {
            tracing::error!(
                correlation_id = %id,
                %reason,
                "💥 Eviction callback panicked, entry stays removed"
            );
        }
    }

    fn expire_due(&self, now: Instant) -> usize {
        let expired = self.state.lock().drain_expired(now);
        let count = expired.len();
        for (id, value) in expired {
            tracing::debug!(correlation_id = %id, "⏰ Pending entry expired");
            self.notify_evicted(id, value, EvictionReason::Expired);
        }
        count
    }

    /// Remove `id` if it is still live. An entry found past its deadline is
    /// evicted as expired and reported absent.
    fn take_live(&self, id: CorrelationId) -> Option<V> {
        let now = Instant::now();
        let entry = self.state.lock().take(&id)?;
        if entry.expires_at <= now {
            self.notify_evicted(id, entry.value, EvictionReason::Expired);
            return None;
        }
        Some(entry.value)
    }
}

async fn run_sweeper<V>(shared: Arc<Shared<V>>, shutdown: CancellationToken) {
    loop {
        let next_deadline = shared.state.lock().next_deadline();

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = shared.wakeup.notified() => {}
            _ = sleep_until_deadline(next_deadline) => {}
        }

        shared.expire_due(Instant::now());
    }

    tracing::trace!("Expiring cache sweeper stopped");
}

/// Start the sweeper for `shared`. Returns false if it could not be started,
/// leaving the cache lazy.
fn spawn_sweeper<V>(shared: Arc<Shared<V>>, shutdown: CancellationToken) -> bool
where
    V: Send + Sync + 'static,
{
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(run_sweeper(shared, shutdown));
        return true;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("❌ Failed to build sweeper runtime, cache stays lazy: {}", e);
            return false;
        }
    };

    let spawned = std::thread::Builder::new()
        .name("cache-sweeper".to_string())
        .spawn(move || runtime.block_on(run_sweeper(shared, shutdown)));

    match spawned {
        Ok(_) => {
            tracing::debug!("No tokio runtime, expiring cache sweeps on its own thread");
            true
        }
        Err(e) => {
            tracing::error!("❌ Failed to spawn sweeper thread, cache stays lazy: {}", e);
            false
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Thread-safe map from correlation id to value with per-entry expiry
pub struct ExpiringCache<V> {
    shared: Arc<Shared<V>>,
    default_ttl: Duration,
    shutdown: CancellationToken,
    has_sweeper: bool,
}

impl<V> ExpiringCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache whose entries live for `default_ttl` unless overridden.
    ///
    /// The sweeper runs on the current tokio runtime, or on its own thread
    /// when there is none.
    pub fn new(default_ttl: Duration) -> Self {
        let mut cache = Self::lazy(default_ttl);
        cache.has_sweeper = spawn_sweeper(cache.shared.clone(), cache.shutdown.clone());
        cache
    }

    /// Create a cache without a background sweeper. Expired entries are
    /// evicted on access or by `purge_expired`.
    pub fn lazy(default_ttl: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState::new()),
                on_evict: RwLock::new(None),
                wakeup: Notify::new(),
            }),
            default_ttl,
            shutdown: CancellationToken::new(),
            has_sweeper: false,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Whether a background task drives expiry
    pub fn has_sweeper(&self) -> bool {
        self.has_sweeper
    }

    /// Insert or overwrite the entry for `id` and restart its expiry clock.
    ///
    /// A displaced live entry is dropped silently: no eviction callback runs
    /// for it, only a warning is logged.
    pub fn insert(&self, id: CorrelationId, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + FAR_FUTURE);

        let replaced = self.shared.state.lock().insert(id, value, expires_at);
        if replaced {
            tracing::warn!(
                correlation_id = %id,
                "⚠️ Duplicate correlation id inserted, replacing pending entry"
            );
        }

        self.shared.wakeup.notify_one();
    }

    /// Read the live value for `id` without removing it
    pub fn try_get(&self, id: CorrelationId) -> Option<V> {
        let now = Instant::now();
        let mut state = self.shared.state.lock();

        let entry = state.entries.get(&id)?;
        if entry.expires_at > now {
            return Some(entry.value.clone());
        }

        let expired = state.take(&id);
        drop(state);

        if let Some(entry) = expired {
            self.shared
                .notify_evicted(id, entry.value, EvictionReason::Expired);
        }
        None
    }

    /// Remove the live value for `id` without firing the eviction callback.
    pub fn take(&self, id: CorrelationId) -> Option<V> {
        self.shared.take_live(id)
    }

    /// Remove the live value for `id`, firing the callback with
    /// `ExplicitlyRemoved` before handing the value back. Removing a missing
    /// id is a no-op.
    pub fn remove(&self, id: CorrelationId) -> Option<V> {
        let value = self.shared.take_live(id)?;
        self.shared
            .notify_evicted(id, value.clone(), EvictionReason::ExplicitlyRemoved);
        Some(value)
    }

    /// Remove every live entry matching `predicate`. Returns how many were
    /// removed explicitly; entries found expired along the way are evicted
    /// as expired and not counted.
    pub fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&V) -> bool,
    {
        let (expired, removed) = {
            let mut state = self.shared.state.lock();
            let expired = state.drain_expired(Instant::now());

            let ids: Vec<CorrelationId> = state
                .entries
                .iter()
                .filter(|(_, entry)| predicate(&entry.value))
                .map(|(id, _)| *id)
                .collect();
            let removed: Vec<(CorrelationId, V)> = ids
                .into_iter()
                .filter_map(|id| state.take(&id).map(|entry| (id, entry.value)))
                .collect();

            (expired, removed)
        };

        for (id, value) in expired {
            self.shared.notify_evicted(id, value, EvictionReason::Expired);
        }

        let count = removed.len();
        for (id, value) in removed {
            self.shared
                .notify_evicted(id, value, EvictionReason::ExplicitlyRemoved);
        }
        count
    }

    /// Evict everything past its deadline now. Returns the number evicted.
    pub fn purge_expired(&self) -> usize {
        self.shared.expire_due(Instant::now())
    }

    /// Register the eviction handler, replacing any previous one
    pub fn on_evict<F>(&self, callback: F)
    where
        F: Fn(CorrelationId, V, EvictionReason) + Send + Sync + 'static,
    {
        *self.shared.on_evict.write() = Some(Arc::new(callback));
    }

    /// Number of entries held, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Drop for ExpiringCache<V> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Evictions = Arc<Mutex<Vec<(CorrelationId, u32, EvictionReason)>>>;

    fn record_evictions(cache: ExpiringCache<u32>) -> (ExpiringCache<u32>, Evictions) {
        let evictions: Evictions = Arc::new(Mutex::new(Vec::new()));
        let sink = evictions.clone();
        cache.on_evict(move |id, value, reason| sink.lock().push((id, value, reason)));
        (cache, evictions)
    }

    fn recording_cache(ttl: Duration) -> (ExpiringCache<u32>, Evictions) {
        record_evictions(ExpiringCache::new(ttl))
    }

    fn recording_lazy_cache(ttl: Duration) -> (ExpiringCache<u32>, Evictions) {
        record_evictions(ExpiringCache::lazy(ttl))
    }

    #[test]
    fn test_insert_and_get() {
        let (cache, evictions) = recording_lazy_cache(Duration::from_secs(60));
        let id = CorrelationId::generate();

        cache.insert(id, 7, None);

        assert_eq!(cache.try_get(id), Some(7));
        assert_eq!(cache.try_get(id), Some(7)); // reads don't consume
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.try_get(CorrelationId::generate()), None);
        assert!(evictions.lock().is_empty());
        assert!(!cache.has_sweeper());
    }

    #[test]
    fn test_remove_fires_once() {
        let (cache, evictions) = recording_lazy_cache(Duration::from_secs(60));
        let id = CorrelationId::generate();
        cache.insert(id, 1, None);

        assert_eq!(cache.remove(id), Some(1));
        assert_eq!(cache.remove(id), None);

        let evictions = evictions.lock();
        assert_eq!(evictions.len(), 1);
        assert_eq!(evictions[0], (id, 1, EvictionReason::ExplicitlyRemoved));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_take_is_silent() {
        let (cache, evictions) = recording_lazy_cache(Duration::from_secs(60));
        let id = CorrelationId::generate();
        cache.insert(id, 3, None);

        assert_eq!(cache.take(id), Some(3));
        assert_eq!(cache.take(id), None);
        assert!(evictions.lock().is_empty());
    }

    #[test]
    fn test_overwrite_replaces_without_event() {
        let (cache, evictions) = recording_lazy_cache(Duration::from_millis(20));
        let id = CorrelationId::generate();

        cache.insert(id, 1, None);
        cache.insert(id, 2, None);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.try_get(id), Some(2));
        assert!(evictions.lock().is_empty());

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.purge_expired(), 1);

        // Only the surviving value is ever reported
        assert_eq!(
            *evictions.lock(),
            vec![(id, 2, EvictionReason::Expired)]
        );
    }

    #[test]
    fn test_lazy_expiry_on_access() {
        let (cache, evictions) = recording_lazy_cache(Duration::from_millis(10));
        let id = CorrelationId::generate();
        cache.insert(id, 5, None);

        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.try_get(id), None);
        assert_eq!(cache.remove(id), None);
        assert_eq!(cache.purge_expired(), 0);
        assert_eq!(
            *evictions.lock(),
            vec![(id, 5, EvictionReason::Expired)]
        );
    }

    #[test]
    fn test_take_after_deadline_reports_expired() {
        let (cache, evictions) = recording_lazy_cache(Duration::from_millis(10));
        let id = CorrelationId::generate();
        cache.insert(id, 9, None);

        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.take(id), None);
        assert_eq!(evictions.lock()[0].2, EvictionReason::Expired);
    }

    #[test]
    fn test_per_entry_ttl_override() {
        let (cache, _evictions) = recording_lazy_cache(Duration::from_millis(10));
        let short = CorrelationId::generate();
        let long = CorrelationId::generate();

        cache.insert(short, 1, None);
        cache.insert(long, 2, Some(Duration::from_secs(60)));

        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.try_get(long), Some(2));
        assert_eq!(cache.try_get(short), None);
    }

    #[test]
    fn test_remove_where() {
        let (cache, evictions) = recording_lazy_cache(Duration::from_secs(60));
        for value in 0..6u32 {
            cache.insert(CorrelationId::generate(), value, None);
        }

        let removed = cache.remove_where(|value| value % 2 == 0);

        assert_eq!(removed, 3);
        assert_eq!(cache.len(), 3);
        let evictions = evictions.lock();
        assert!(evictions
            .iter()
            .all(|(_, value, reason)| value % 2 == 0
                && *reason == EvictionReason::ExplicitlyRemoved));
    }

    #[test]
    fn test_on_evict_replaces_handler() {
        let (cache, first) = recording_lazy_cache(Duration::from_secs(60));
        let second: Evictions = Arc::new(Mutex::new(Vec::new()));
        let sink = second.clone();
        cache.on_evict(move |id, value, reason| sink.lock().push((id, value, reason)));

        let id = CorrelationId::generate();
        cache.insert(id, 4, None);
        cache.remove(id);

        assert!(first.lock().is_empty());
        assert_eq!(second.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_expires_without_access() {
        let (cache, evictions) = recording_cache(Duration::from_millis(50));
        assert!(cache.has_sweeper());

        let id = CorrelationId::generate();
        cache.insert(id, 11, None);

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(cache.is_empty());
        assert_eq!(
            *evictions.lock(),
            vec![(id, 11, EvictionReason::Expired)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_picks_up_earlier_deadline() {
        let (cache, evictions) = recording_cache(Duration::from_secs(10));
        cache.insert(CorrelationId::generate(), 1, None);

        // Let the sweeper park on the 10s deadline first
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.insert(CorrelationId::generate(), 2, Some(Duration::from_millis(20)));

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(evictions.lock().len(), 1);
        assert_eq!(evictions.lock()[0].1, 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_callback_does_not_stop_sweeper() {
        let cache: ExpiringCache<u32> = ExpiringCache::new(Duration::from_millis(10));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        cache.on_evict(move |_, value, _| {
            sink.lock().push(value);
            if value == 1 {
                panic!("subscriber blew up");
            }
        });

        cache.insert(CorrelationId::generate(), 1, None);
        tokio::time::sleep(Duration::from_millis(20)).await;

        cache.insert(CorrelationId::generate(), 2, None);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*seen.lock(), vec![1, 2]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweeper_thread_without_runtime() {
        let (cache, evictions) = recording_cache(Duration::from_millis(20));
        assert!(cache.has_sweeper());

        let id = CorrelationId::generate();
        cache.insert(id, 8, None);

        // Nothing touches the entry; only the sweeper thread can evict it
        std::thread::sleep(Duration::from_millis(200));

        assert!(cache.is_empty());
        assert_eq!(
            *evictions.lock(),
            vec![(id, 8, EvictionReason::Expired)]
        );
    }
}
