use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast};
use tokio_stream::wrappers::BroadcastStream;

use crate::error::QueryError;

use super::config::{QueryConfig, RetryPolicy};
use super::key::QueryKey;

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, QueryError>>>;

/// A fetch that is currently running for one key.
struct InFlight<T> {
    id: u64,
    future: SharedFetch<T>,
}

/// A cached entry with timestamp and staleness information.
pub struct CacheEntry<T> {
    pub data: Option<T>,
    pub timestamp: Instant,
    pub is_stale: bool,
    in_flight: Option<InFlight<T>>,
}

impl<T> CacheEntry<T> {
    /// Creates an entry holding `data`.
    pub fn new(data: T) -> Self {
        Self {
            data: Some(data),
            timestamp: Instant::now(),
            is_stale: false,
            in_flight: None,
        }
    }

    /// Creates an entry with no data yet.
    pub fn empty() -> Self {
        Self {
            data: None,
            timestamp: Instant::now(),
            is_stale: false,
            in_flight: None,
        }
    }

    /// Checks if this entry is stale based on the given stale time.
    pub fn check_staleness(&mut self, stale_time: Duration) -> bool {
        if self.timestamp.elapsed() > stale_time {
            self.is_stale = true;
        }
        self.is_stale
    }

    /// Marks the data stale and detaches any running fetch, whose result
    /// may predate the change that made the data stale.
    pub fn mark_stale(&mut self) {
        self.is_stale = true;
        self.in_flight = None;
    }

    /// Updates the entry with new data, resetting timestamp and staleness.
    pub fn update(&mut self, data: Option<T>) {
        self.data = data;
        self.timestamp = Instant::now();
        self.is_stale = false;
    }

    /// Returns `true` while a fetch for this entry is running.
    pub const fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Checks if this entry should be garbage collected based on cache time.
    pub fn should_gc(&self, cache_time: Duration) -> bool {
        !self.is_fetching() && self.timestamp.elapsed() > cache_time
    }
}

/// Type-erased view of a [`CacheEntry`] so entries of different value types
/// can share one map.
trait ErasedEntry: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn detach_fetch(&mut self) -> bool;
    fn mark_stale(&mut self);
    fn is_fetching(&self) -> bool;
    fn should_gc(&self, cache_time: Duration) -> bool;
}

impl<T> ErasedEntry for CacheEntry<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn detach_fetch(&mut self) -> bool {
        self.in_flight.take().is_some()
    }

    fn mark_stale(&mut self) {
        CacheEntry::mark_stale(self);
    }

    fn is_fetching(&self) -> bool {
        CacheEntry::is_fetching(self)
    }

    fn should_gc(&self, cache_time: Duration) -> bool {
        CacheEntry::should_gc(self, cache_time)
    }
}

/// Runs `f` against the typed entry in `slot`, replacing the slot if it holds
/// a different value type.
fn with_entry<T, R>(slot: &mut Box<dyn ErasedEntry>, f: impl FnOnce(&mut CacheEntry<T>) -> R) -> R
where
    T: Clone + Send + Sync + 'static,
{
    if let Some(entry) = slot.as_any_mut().downcast_mut::<CacheEntry<T>>() {
        return f(entry);
    }
    tracing::warn!(
        value_type = std::any::type_name::<T>(),
        "replacing cache entry holding a different value type"
    );
    let mut entry = CacheEntry::empty();
    let result = f(&mut entry);
    *slot = Box::new(entry);
    result
}

/// A change applied to the cache, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// Data for the key was stored by a fetch or a direct write.
    Updated(QueryKey),
    /// The key's data was kept but marked stale; the next fetch runs the
    /// producer again.
    Stale(QueryKey),
    /// The key was dropped; the next fetch runs the producer again.
    Invalidated(QueryKey),
    /// Every key was dropped.
    Cleared,
}

impl CacheEvent {
    /// Returns `true` if this event concerns `key`.
    #[must_use]
    pub fn affects(&self, key: &QueryKey) -> bool {
        match self {
            Self::Updated(k) | Self::Stale(k) | Self::Invalidated(k) => k == key,
            Self::Cleared => true,
        }
    }
}

/// How [`QueryCache::write`] computes the new value.
pub enum Updater<T> {
    /// Replace with this value.
    Value(T),
    /// Compute from the previous value, if any.
    With(Box<dyn FnOnce(Option<&T>) -> T + Send>),
}

impl<T> Updater<T> {
    pub fn with<F>(f: F) -> Self
    where
        F: FnOnce(Option<&T>) -> T + Send + 'static,
    {
        Self::With(Box::new(f))
    }

    fn apply(self, previous: Option<&T>) -> T {
        match self {
            Self::Value(value) => value,
            Self::With(f) => f(previous),
        }
    }
}

enum Lookup<T> {
    Hit(T),
    Join { id: u64, future: SharedFetch<T> },
}

/// A process-wide cache of query results.
///
/// The cache is constructed explicitly and shared through an `Arc`: create it
/// when the application starts, hand it to every consumer, and
/// [`clear`](Self::clear) it on logout so no data survives into another
/// session.
///
/// All reads and writes are synchronous; map locks are never held across an
/// await. At most one fetch runs per key: concurrent callers of
/// [`fetch`](Self::fetch) share the same in-flight future.
///
/// # Example
///
/// ```
/// use bookshelf::query::{QueryCache, QueryKey};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = QueryCache::new();
/// let key = QueryKey::new("book").param("bookId", "1");
///
/// let title = cache
///     .fetch(&key, || async { Ok("Dune".to_string()) })
///     .await
///     .unwrap();
///
/// assert_eq!(title, "Dune");
/// assert_eq!(cache.read::<String>(&key).as_deref(), Some("Dune"));
/// # }
/// ```
pub struct QueryCache {
    entries: DashMap<QueryKey, Box<dyn ErasedEntry>>,
    locks: DashMap<QueryKey, Arc<Mutex<()>>>,
    events: broadcast::Sender<CacheEvent>,
    next_fetch_id: AtomicU64,
    generation: AtomicU64,
    config: QueryConfig,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.entries.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    /// Creates a new cache with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(QueryConfig::default())
    }

    /// Creates a new cache with the given configuration.
    #[must_use]
    pub fn with_config(config: QueryConfig) -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            entries: DashMap::new(),
            locks: DashMap::new(),
            events,
            next_fetch_id: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Returns cached data for `key`, joining or starting a fetch when needed.
    ///
    /// 1. Fresh cached data is returned without calling `producer`.
    /// 2. If a fetch for `key` is already running, its outcome is shared.
    /// 3. Otherwise `producer` is called (again on retryable failures, per the
    ///    configured [`RetryPolicy`]) and a successful result is stored.
    ///
    /// Failed fetches are never cached. A fetch detached by
    /// [`invalidate`](Self::invalidate), [`cancel`](Self::cancel) or
    /// [`clear`](Self::clear) still resolves for its callers but does not
    /// write its result.
    ///
    /// # Errors
    ///
    /// Returns the producer's last error once retries are exhausted.
    #[tracing::instrument(level = "debug", skip_all, fields(key = %key))]
    pub async fn fetch<T, F, Fut>(&self, key: &QueryKey, producer: F) -> Result<T, QueryError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let lookup = {
            let mut slot = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| Box::new(CacheEntry::<T>::empty()));
            with_entry(slot.value_mut(), |entry: &mut CacheEntry<T>| {
                let fresh = !entry.check_staleness(self.config.stale_time);
                if let Some(data) = entry.data.as_ref().filter(|_| fresh) {
                    return Lookup::Hit(data.clone());
                }
                if let Some(in_flight) = &entry.in_flight {
                    tracing::trace!("joining in-flight fetch");
                    return Lookup::Join {
                        id: in_flight.id,
                        future: in_flight.future.clone(),
                    };
                }
                let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
                let future = attempt(key.clone(), producer, self.config.retry)
                    .boxed()
                    .shared();
                entry.in_flight = Some(InFlight {
                    id,
                    future: future.clone(),
                });
                tracing::debug!(fetch_id = id, "starting fetch");
                Lookup::Join { id, future }
            })
        };

        match lookup {
            Lookup::Hit(data) => Ok(data),
            Lookup::Join { id, future } => {
                let result = future.await;
                self.settle(key, id, &result);
                result
            }
        }
    }

    /// Warms the cache for `key`, discarding the value.
    ///
    /// # Errors
    ///
    /// Returns the fetch error, if any.
    pub async fn prefetch<T, F, Fut>(&self, key: &QueryKey, producer: F) -> Result<(), QueryError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        self.fetch(key, producer).await.map(|_| ())
    }

    /// Stores the outcome of fetch `id` unless it has been detached meanwhile.
    fn settle<T>(&self, key: &QueryKey, id: u64, result: &Result<T, QueryError>)
    where
        T: Clone + Send + Sync + 'static,
    {
        let updated = {
            let Some(mut slot) = self.entries.get_mut(key) else {
                tracing::trace!(fetch_id = id, "entry dropped before fetch settled");
                return;
            };
            with_entry(slot.value_mut(), |entry: &mut CacheEntry<T>| {
                if entry.in_flight.as_ref().map(|f| f.id) != Some(id) {
                    return false;
                }
                entry.in_flight = None;
                match result {
                    Ok(data) => {
                        entry.update(Some(data.clone()));
                        true
                    }
                    Err(err) => {
                        tracing::debug!(fetch_id = id, error = %err, "fetch failed; nothing cached");
                        false
                    }
                }
            })
        };
        if updated {
            self.emit(CacheEvent::Updated(key.clone()));
        }
    }

    /// Synchronous lookup. Never triggers a fetch.
    #[must_use]
    pub fn read<T>(&self, key: &QueryKey) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.entries.get(key).and_then(|slot| {
            slot.as_any()
                .downcast_ref::<CacheEntry<T>>()
                .and_then(|entry| entry.data.clone())
        })
    }

    /// Replaces the cached data for `key`.
    ///
    /// Used to populate one query from another's results and to apply
    /// optimistic edits.
    pub fn write<T>(&self, key: &QueryKey, updater: Updater<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        {
            let mut slot = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| Box::new(CacheEntry::<T>::empty()));
            with_entry(slot.value_mut(), |entry: &mut CacheEntry<T>| {
                let next = updater.apply(entry.data.as_ref());
                entry.update(Some(next));
            });
        }
        tracing::trace!(key = %key, "cache write");
        self.emit(CacheEvent::Updated(key.clone()));
    }

    /// Puts back a snapshot taken with [`read`](Self::read), including the
    /// absence of data.
    pub fn restore<T>(&self, key: &QueryKey, snapshot: Option<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        match snapshot {
            Some(value) => self.write(key, Updater::Value(value)),
            None => {
                if let Some(mut slot) = self.entries.get_mut(key) {
                    with_entry(slot.value_mut(), |entry: &mut CacheEntry<T>| entry.update(None));
                }
                self.emit(CacheEvent::Updated(key.clone()));
            }
        }
    }

    /// Marks `key` stale without discarding its data.
    ///
    /// [`read`](Self::read) keeps returning the current value while the next
    /// [`fetch`](Self::fetch) calls the producer again. A fetch already running
    /// for `key` is detached. Returns `true` if an entry existed.
    pub fn mark_stale(&self, key: &QueryKey) -> bool {
        let existed = self
            .entries
            .get_mut(key)
            .is_some_and(|mut slot| {
                slot.mark_stale();
                true
            });
        tracing::debug!(key = %key, existed, "marked query stale");
        if existed {
            self.emit(CacheEvent::Stale(key.clone()));
        }
        existed
    }

    /// Drops the entry and any in-flight marker for `key`.
    ///
    /// Returns `true` if an entry existed.
    pub fn invalidate(&self, key: &QueryKey) -> bool {
        let existed = self.entries.remove(key).is_some();
        tracing::debug!(key = %key, existed, "invalidated query");
        self.emit(CacheEvent::Invalidated(key.clone()));
        existed
    }

    /// Drops every entry whose key has the given name.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_queries(&self, name: &str) -> usize {
        let keys: Vec<QueryKey> = self
            .entries
            .iter()
            .filter(|slot| slot.key().name() == name)
            .map(|slot| slot.key().clone())
            .collect();
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
            self.emit(CacheEvent::Invalidated(key));
        }
        tracing::debug!(name, removed, "invalidated queries");
        removed
    }

    /// Detaches the in-flight fetch for `key` so its result is not stored.
    ///
    /// Callers already awaiting the fetch still receive its outcome. Returns
    /// `true` if a fetch was detached.
    pub fn cancel(&self, key: &QueryKey) -> bool {
        let detached = self
            .entries
            .get_mut(key)
            .is_some_and(|mut slot| slot.detach_fetch());
        if detached {
            tracing::debug!(key = %key, "detached in-flight fetch");
        }
        detached
    }

    /// Drops every entry.
    ///
    /// Optimistic edits begun before the clear are neither confirmed nor
    /// rolled back afterwards.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
        tracing::debug!("query cache cleared");
        self.emit(CacheEvent::Cleared);
    }

    /// Drops entries older than the configured cache time that are not being
    /// fetched. Returns the number of entries removed.
    pub fn gc(&self) -> usize {
        let before = self.entries.len();
        let cache_time = self.config.cache_time;
        self.entries.retain(|_, slot| !slot.should_gc(cache_time));
        before.saturating_sub(self.entries.len())
    }

    /// Returns `true` if a fetch for `key` is running.
    #[must_use]
    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.entries.get(key).is_some_and(|slot| slot.is_fetching())
    }

    #[must_use]
    pub fn contains(&self, key: &QueryKey) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subscribes to cache changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Cache changes as a stream. Lagged notifications are skipped.
    #[must_use]
    pub fn events(&self) -> BoxStream<'static, CacheEvent> {
        BroadcastStream::new(self.events.subscribe())
            .filter_map(|event| async move { event.ok() })
            .boxed()
    }

    /// Number of times the cache has been cleared.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Acquires the mutation lock for `key`.
    ///
    /// Mutations touching the same key hold this lock from their speculative
    /// write until settlement, so they run one after another.
    pub(crate) async fn lock(self: &Arc<Self>, key: &QueryKey) -> KeyGuard {
        let guard = self.key_lock(key).lock_owned().await;
        KeyGuard::new(self, key, guard)
    }

    /// Acquires the mutation lock for `key` if no other mutation holds it.
    pub(crate) fn try_lock(self: &Arc<Self>, key: &QueryKey) -> Option<KeyGuard> {
        let guard = self.key_lock(key).try_lock_owned().ok()?;
        Some(KeyGuard::new(self, key, guard))
    }

    fn key_lock(&self, key: &QueryKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// A held mutation lock. Releasing the last handle to a key's lock removes it
/// from the cache.
pub(crate) struct KeyGuard {
    cache: Arc<QueryCache>,
    key: QueryKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyGuard {
    fn new(cache: &Arc<QueryCache>, key: &QueryKey, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            cache: cache.clone(),
            key: key.clone(),
            guard: Some(guard),
        }
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own handle, so the lock stays while anyone queues.
        self.cache
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Calls `producer` until it succeeds or `retry` gives up.
fn attempt<T, F, Fut>(
    key: QueryKey,
    mut producer: F,
    retry: RetryPolicy,
) -> impl Future<Output = Result<T, QueryError>> + Send + 'static
where
    T: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
{
    async move {
        let mut failures = 0;
        loop {
            match producer().await {
                Ok(data) => return Ok(data),
                Err(err) => {
                    failures += 1;
                    if !retry.should_retry(failures, &err) {
                        return Err(err);
                    }
                    tracing::debug!(key = %key, failures, error = %err, "retrying fetch");
                    if !retry.delay.is_zero() {
                        tokio::time::sleep(retry.delay).await;
                    }
                }
            }
        }
    }
}
