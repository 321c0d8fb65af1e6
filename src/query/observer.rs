//! Stream-based observation of one query.
//!
//! A [`QueryObserver`] is how a rendering layer keeps itself in sync with a
//! cached query. Its stream:
//!
//! 1. emits cached data immediately if there is any,
//! 2. otherwise emits `Loading`, fetches through the cache and emits the outcome,
//! 3. then watches the cache: direct writes to the key are re-emitted, a stale
//!    mark refetches in the background (keeping the data visible), and
//!    invalidation or a cleared cache emits `Loading` and refetches.

use std::sync::Arc;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use tokio::sync::broadcast;

use crate::error::QueryError;

use super::cache::{CacheEvent, QueryCache};
use super::key::QueryKey;

/// The state of a query result.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
    /// Query is loading (fetching data).
    Loading,
    /// Query succeeded with data.
    Success(T),
    /// Query failed with an error.
    Error(QueryError),
}

/// A query result containing the current state.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    /// The current state of the query.
    pub state: QueryState<T>,
}

impl<T> QueryResult<T> {
    const fn new(state: QueryState<T>) -> Self {
        Self { state }
    }

    /// Returns the data if the query succeeded, otherwise `None`.
    pub const fn data(&self) -> Option<&T> {
        match &self.state {
            QueryState::Success(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the error if the query failed, otherwise `None`.
    pub const fn error(&self) -> Option<&QueryError> {
        match &self.state {
            QueryState::Error(err) => Some(err),
            _ => None,
        }
    }

    pub const fn is_loading(&self) -> bool {
        matches!(self.state, QueryState::Loading)
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.state, QueryState::Success(_))
    }

    pub const fn is_error(&self) -> bool {
        matches!(self.state, QueryState::Error(_))
    }
}

type Fetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync>;

/// Observes one query key through a [`QueryCache`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use futures::StreamExt;
/// use bookshelf::query::{QueryCache, QueryKey, QueryObserver};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = Arc::new(QueryCache::new());
/// let observer = QueryObserver::new(
///     QueryKey::new("list-items"),
///     || Box::pin(async { Ok(vec![1, 2, 3]) }),
///     cache.clone(),
/// );
///
/// let mut results = observer.stream();
/// assert!(results.next().await.unwrap().is_loading());
/// assert_eq!(results.next().await.unwrap().data(), Some(&vec![1, 2, 3]));
/// # }
/// ```
pub struct QueryObserver<T> {
    key: QueryKey,
    fetcher: Fetcher<T>,
    cache: Arc<QueryCache>,
}

impl<T> Clone for QueryObserver<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            fetcher: self.fetcher.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<T> QueryObserver<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates an observer for `key`, fetching with `fetcher` when needed.
    pub fn new<F>(key: QueryKey, fetcher: F, cache: Arc<QueryCache>) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync + 'static,
    {
        Self {
            key,
            fetcher: Arc::new(fetcher),
            cache,
        }
    }

    #[must_use]
    pub const fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Reads the query once through the cache without observing it.
    ///
    /// # Errors
    ///
    /// Returns the fetch error when there is no fresh data to fall back on.
    pub async fn fetch(&self) -> Result<T, QueryError> {
        let fetcher = self.fetcher.clone();
        self.cache.fetch(&self.key, move || fetcher()).await
    }

    /// Starts observing. The stream runs until it is dropped.
    #[must_use]
    pub fn stream(&self) -> BoxStream<'static, QueryResult<T>> {
        let key = self.key.clone();
        let fetcher = self.fetcher.clone();
        let cache = self.cache.clone();

        stream::unfold(State::Initial, move |state| {
            let key = key.clone();
            let fetcher = fetcher.clone();
            let cache = cache.clone();

            async move {
                match state {
                    State::Initial => {
                        let rx = cache.subscribe();
                        if let Some(data) = cache.read::<T>(&key) {
                            Some((QueryResult::new(QueryState::Success(data)), State::Watching { rx }))
                        } else {
                            Some((QueryResult::new(QueryState::Loading), State::Fetching { rx }))
                        }
                    }

                    // Error or not, wait for invalidation before trying again.
                    State::Fetching { mut rx } => {
                        let result = fetch_latest(&cache, &key, &fetcher, &mut rx).await;
                        Some((result, State::Watching { rx }))
                    }

                    State::Watching { mut rx } => loop {
                        match rx.recv().await {
                            Ok(event) if event.affects(&key) => match event {
                                CacheEvent::Updated(_) => {
                                    if let Some(data) = cache.read::<T>(&key) {
                                        let result = QueryResult::new(QueryState::Success(data));
                                        return Some((result, State::Watching { rx }));
                                    }
                                }
                                CacheEvent::Stale(_) => {
                                    let result = fetch_latest(&cache, &key, &fetcher, &mut rx).await;
                                    return Some((result, State::Watching { rx }));
                                }
                                CacheEvent::Invalidated(_) | CacheEvent::Cleared => {
                                    return Some((QueryResult::new(QueryState::Loading), State::Fetching { rx }));
                                }
                            },
                            Ok(_) => {}
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                tracing::debug!(key = %key, skipped, "observer lagged; refetching");
                                return Some((QueryResult::new(QueryState::Loading), State::Fetching { rx }));
                            }
                            Err(broadcast::error::RecvError::Closed) => return None,
                        }
                    },
                }
            }
        })
        .boxed()
    }
}

/// What happened to the key while a fetch was running.
enum Interim {
    Nothing,
    Written,
    Invalidated,
}

/// Drains the events received during a fetch.
fn interim(rx: &mut broadcast::Receiver<CacheEvent>, key: &QueryKey) -> Interim {
    let mut seen = Interim::Nothing;
    loop {
        match rx.try_recv() {
            Ok(event) if event.affects(key) => match event {
                CacheEvent::Updated(_) => {
                    if matches!(seen, Interim::Nothing) {
                        seen = Interim::Written;
                    }
                }
                CacheEvent::Stale(_) | CacheEvent::Invalidated(_) | CacheEvent::Cleared => {
                    seen = Interim::Invalidated;
                }
            },
            Ok(_) => {}
            Err(broadcast::error::TryRecvError::Lagged(_)) => seen = Interim::Invalidated,
            Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => return seen,
        }
    }
}

/// Fetches `key`, starting over whenever it is invalidated before the fetch
/// settles.
///
/// A write that lands while the fetch runs wins over the fetched value.
async fn fetch_latest<T>(
    cache: &QueryCache,
    key: &QueryKey,
    fetcher: &Fetcher<T>,
    rx: &mut broadcast::Receiver<CacheEvent>,
) -> QueryResult<T>
where
    T: Clone + Send + Sync + 'static,
{
    loop {
        let fetcher = fetcher.clone();
        let result = cache.fetch(key, move || fetcher()).await;
        match interim(rx, key) {
            Interim::Invalidated => {
                tracing::debug!(key = %key, "query invalidated while fetching; refetching");
            }
            Interim::Written => {
                if let Some(data) = cache.read::<T>(key) {
                    return QueryResult::new(QueryState::Success(data));
                }
                return into_result(result);
            }
            Interim::Nothing => return into_result(result),
        }
    }
}

fn into_result<T>(result: Result<T, QueryError>) -> QueryResult<T> {
    match result {
        Ok(data) => QueryResult::new(QueryState::Success(data)),
        Err(err) => QueryResult::new(QueryState::Error(err)),
    }
}

/// Internal state machine for the observer stream.
enum State {
    Initial,
    Fetching { rx: broadcast::Receiver<CacheEvent> },
    Watching { rx: broadcast::Receiver<CacheEvent> },
}
