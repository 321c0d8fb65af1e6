//! Remote mutations with optimistic cache updates.
//!
//! A [`Mutation`] wraps a remote call that changes server state (POST, PUT,
//! DELETE). It can carry a [`Speculation`]: an edit applied to one cached query
//! *before* the remote call settles, so consumers see the change immediately.
//!
//! # Protocol
//!
//! For every call to [`Mutation::mutate`]:
//!
//! 1. wait for earlier mutations on the same key to settle,
//! 2. detach any in-flight fetch of the key so it cannot overwrite the edit,
//! 3. snapshot the cached value and apply the speculative edit,
//! 4. issue the remote call,
//! 5. on success keep the edit (or replace it with the server's answer),
//!    on failure restore this call's own snapshot,
//! 6. mark the affected queries stale so the next read re-syncs, and hand the
//!    outcome back to the caller.
//!
//! Because step 1 queues mutations per key, a rollback never erases the
//! settled change of an earlier mutation.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use bookshelf::mutation::{Mutation, Speculation};
//! use bookshelf::query::{QueryCache, QueryKey, Updater};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = Arc::new(QueryCache::new());
//! let key = QueryKey::new("names");
//! cache.write(&key, Updater::Value(vec!["a".to_string()]));
//!
//! let add = Mutation::new(cache.clone(), |name: String| {
//!     Box::pin(async move { Ok(name) })
//! })
//! .optimistic(Speculation::new(key.clone(), |names: Option<&Vec<String>>, name: &String| {
//!     names.map(|names| {
//!         let mut names = names.clone();
//!         names.push(name.clone());
//!         names
//!     })
//! }));
//!
//! add.mutate("b".to_string()).await.unwrap();
//! assert_eq!(cache.read::<Vec<String>>(&key).unwrap(), vec!["a", "b"]);
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::watch;

use crate::error::QueryError;
use crate::operation::{AsyncOperation, AsyncState, Status};
use crate::query::{QueryCache, QueryKey, Updater};

type Mutator<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<O, QueryError>> + Send + Sync>;
type EditFn<T, A> = Arc<dyn Fn(Option<&T>, &A) -> Option<T> + Send + Sync>;
type Rollback = Box<dyn FnOnce(&QueryCache) + Send>;

/// A speculative edit of one cached query.
///
/// `T` is the cached value type, `I` the mutation input and `O` its output.
pub struct Speculation<I, O, T> {
    key: QueryKey,
    update: EditFn<T, I>,
    confirm: Option<EditFn<T, O>>,
}

impl<I, O, T> Speculation<I, O, T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a speculation that edits `key` with `update`.
    ///
    /// `update` receives the current cached value and the mutation input. If it
    /// returns `None` the cache is left untouched.
    pub fn new<F>(key: QueryKey, update: F) -> Self
    where
        F: Fn(Option<&T>, &I) -> Option<T> + Send + Sync + 'static,
    {
        Self {
            key,
            update: Arc::new(update),
            confirm: None,
        }
    }

    /// Replaces the speculative value with one derived from the server's
    /// answer once the mutation succeeds.
    #[must_use]
    pub fn confirm_with<F>(mut self, confirm: F) -> Self
    where
        F: Fn(Option<&T>, &O) -> Option<T> + Send + Sync + 'static,
    {
        self.confirm = Some(Arc::new(confirm));
        self
    }
}

/// Object-safe view of a [`Speculation`], erasing the cached value type.
trait Speculate<I, O>: Send + Sync {
    fn key(&self) -> &QueryKey;

    /// Snapshots, applies the edit and returns how to undo it.
    fn apply(&self, cache: &QueryCache, input: &I) -> Rollback;

    fn confirm(&self, cache: &QueryCache, output: &O);
}

impl<I, O, T> Speculate<I, O> for Speculation<I, O, T>
where
    I: Send + Sync,
    O: Send + Sync,
    T: Clone + Send + Sync + 'static,
{
    fn key(&self) -> &QueryKey {
        &self.key
    }

    fn apply(&self, cache: &QueryCache, input: &I) -> Rollback {
        let snapshot = cache.read::<T>(&self.key);
        if let Some(next) = (self.update)(snapshot.as_ref(), input) {
            cache.write(&self.key, Updater::Value(next));
        }
        let key = self.key.clone();
        Box::new(move |cache: &QueryCache| cache.restore(&key, snapshot))
    }

    fn confirm(&self, cache: &QueryCache, output: &O) {
        let Some(confirm) = &self.confirm else {
            return;
        };
        let current = cache.read::<T>(&self.key);
        if let Some(next) = confirm(current.as_ref(), output) {
            cache.write(&self.key, Updater::Value(next));
        }
    }
}

/// A speculative edit in flight. Dropping it restores the snapshot taken
/// before the edit, unless the cache was cleared in the meantime.
struct Edit {
    cache: Arc<QueryCache>,
    generation: u64,
    rollback: Option<Rollback>,
}

impl Edit {
    fn begin<I, O>(cache: &Arc<QueryCache>, speculation: &dyn Speculate<I, O>, input: &I) -> Self {
        cache.cancel(speculation.key());
        Self {
            cache: cache.clone(),
            generation: cache.generation(),
            rollback: Some(speculation.apply(cache, input)),
        }
    }

    /// Returns `false` once the cache has been cleared since the edit began.
    fn is_current(&self) -> bool {
        self.cache.generation() == self.generation
    }

    fn keep(mut self) {
        self.rollback = None;
    }
}

impl Drop for Edit {
    fn drop(&mut self) {
        let Some(rollback) = self.rollback.take() else {
            return;
        };
        if self.is_current() {
            rollback(&self.cache);
        } else {
            tracing::debug!("cache cleared during mutation; skipping rollback");
        }
    }
}

/// A remote mutation, optionally with an optimistic cache edit.
///
/// The mutation's progress is tracked by an [`AsyncOperation`]:
/// `Idle -> Pending -> Resolved | Rejected`. Cloning yields another handle to
/// the same mutation and state.
pub struct Mutation<I, O> {
    cache: Arc<QueryCache>,
    mutator: Mutator<I, O>,
    speculation: Option<Arc<dyn Speculate<I, O>>>,
    invalidates: Arc<[QueryKey]>,
    operation: AsyncOperation<O, QueryError>,
}

impl<I, O> Clone for Mutation<I, O> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            mutator: self.mutator.clone(),
            speculation: self.speculation.clone(),
            invalidates: self.invalidates.clone(),
            operation: self.operation.clone(),
        }
    }
}

impl<I, O> Mutation<I, O>
where
    I: Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Creates a mutation that performs `mutator` against the server.
    pub fn new<F>(cache: Arc<QueryCache>, mutator: F) -> Self
    where
        F: Fn(I) -> BoxFuture<'static, Result<O, QueryError>> + Send + Sync + 'static,
    {
        Self {
            cache,
            mutator: Arc::new(mutator),
            speculation: None,
            invalidates: Arc::from(Vec::new()),
            operation: AsyncOperation::new(),
        }
    }

    /// Applies `speculation` before each remote call. Its key is also marked
    /// stale on settlement.
    #[must_use]
    pub fn optimistic<T>(mut self, speculation: Speculation<I, O, T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.speculation = Some(Arc::new(speculation));
        self
    }

    /// Marks `key` stale when a call settles, successfully or not.
    #[must_use]
    pub fn invalidates(mut self, key: QueryKey) -> Self {
        let mut keys = self.invalidates.to_vec();
        keys.push(key);
        self.invalidates = Arc::from(keys);
        self
    }

    /// Runs the mutation.
    ///
    /// The state becomes `Pending` before this method returns. When no earlier
    /// mutation on the same key is still running, the speculative edit is
    /// visible in the cache before this method returns too; otherwise it is
    /// applied once the earlier ones settle.
    ///
    /// Dropping the returned future before it settles undoes the edit.
    ///
    /// # Errors
    ///
    /// Returns the remote error after rolling back the speculative edit.
    pub fn mutate(&self, input: I) -> impl Future<Output = Result<O, QueryError>> + Send + 'static {
        let cache = self.cache.clone();
        let mutator = self.mutator.clone();
        let speculation = self.speculation.clone();
        let invalidates = self.invalidates.clone();

        let applied = speculation.as_ref().and_then(|speculation| {
            let queue = cache.try_lock(speculation.key())?;
            Some((queue, Edit::begin(&cache, speculation.as_ref(), &input)))
        });

        self.operation.run(async move {
            let (_queue, edit) = match (applied, &speculation) {
                (Some((queue, edit)), _) => (Some(queue), Some(edit)),
                (None, Some(speculation)) => {
                    tracing::trace!(key = %speculation.key(), "waiting for earlier mutation");
                    let queue = cache.lock(speculation.key()).await;
                    (Some(queue), Some(Edit::begin(&cache, speculation.as_ref(), &input)))
                }
                (None, None) => (None, None),
            };

            let result = mutator(input).await;

            match &result {
                Ok(output) => {
                    tracing::debug!("mutation succeeded");
                    if let (Some(edit), Some(speculation)) = (edit, &speculation) {
                        if edit.is_current() {
                            speculation.confirm(&cache, output);
                        }
                        edit.keep();
                    }
                }
                Err(err) => {
                    tracing::debug!(error = %err, "mutation failed; rolling back");
                    drop(edit);
                }
            }

            if let Some(speculation) = &speculation {
                cache.mark_stale(speculation.key());
            }
            for key in invalidates.iter() {
                cache.mark_stale(key);
            }

            result
        })
    }

    #[must_use]
    pub fn state(&self) -> AsyncState<O, QueryError> {
        self.operation.state()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.operation.status()
    }

    /// Returns to `Idle`.
    pub fn reset(&self) {
        self.operation.reset();
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AsyncState<O, QueryError>> {
        self.operation.subscribe()
    }

    /// The operation tracking this mutation.
    #[must_use]
    pub const fn operation(&self) -> &AsyncOperation<O, QueryError> {
        &self.operation
    }
}
