//! State tracking for a single asynchronous computation.
//!
//! An [`AsyncOperation`] follows one computation through
//! `Idle -> Pending -> Resolved | Rejected`. The state lives in a
//! [`tokio::sync::watch`] channel, so any number of consumers can observe it
//! while the operation itself stays the only writer.
//!
//! # Example
//!
//! ```
//! use bookshelf::operation::{AsyncOperation, Status};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let op = AsyncOperation::<u32, String>::new();
//!
//! let pending = op.run(async { Ok(42) });
//! assert_eq!(op.status(), Status::Pending);
//!
//! assert_eq!(pending.await, Ok(42));
//! assert_eq!(op.data(), Some(42));
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::RunError;
use crate::guard::MountGuard;

/// Lifecycle status of an asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    /// Nothing has been started yet.
    #[default]
    Idle,
    /// A computation is in flight.
    Pending,
    /// The last computation succeeded.
    Resolved,
    /// The last computation failed.
    Rejected,
}

/// Snapshot of an operation's state.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncState<T, E> {
    pub status: Status,
    pub data: Option<T>,
    pub error: Option<E>,
}

impl<T, E> AsyncState<T, E> {
    /// The default initial state.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            status: Status::Idle,
            data: None,
            error: None,
        }
    }

    /// A pending state, useful as a custom initial state.
    #[must_use]
    pub const fn pending() -> Self {
        Self {
            status: Status::Pending,
            data: None,
            error: None,
        }
    }

    #[must_use]
    pub const fn resolved(data: T) -> Self {
        Self {
            status: Status::Resolved,
            data: Some(data),
            error: None,
        }
    }

    #[must_use]
    pub const fn rejected(error: E) -> Self {
        Self {
            status: Status::Rejected,
            data: None,
            error: Some(error),
        }
    }

    pub const fn is_idle(&self) -> bool {
        matches!(self.status, Status::Idle)
    }

    pub const fn is_loading(&self) -> bool {
        matches!(self.status, Status::Pending)
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.status, Status::Resolved)
    }

    pub const fn is_error(&self) -> bool {
        matches!(self.status, Status::Rejected)
    }
}

impl<T, E> Default for AsyncState<T, E> {
    fn default() -> Self {
        Self::idle()
    }
}

/// Tracks the lifecycle of asynchronous computations.
///
/// Every transition goes through a [`MountGuard`]: once
/// [`unmount`](Self::unmount) has been called, setters and late settlements of
/// [`run`](Self::run) are dropped without error.
///
/// Cloning yields another handle to the same state.
pub struct AsyncOperation<T, E> {
    state: Arc<watch::Sender<AsyncState<T, E>>>,
    initial: Arc<AsyncState<T, E>>,
    guard: MountGuard,
}

impl<T, E> Clone for AsyncOperation<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            initial: self.initial.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<T, E> std::fmt::Debug for AsyncOperation<T, E>
where
    T: std::fmt::Debug,
    E: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncOperation")
            .field("state", &*self.state.borrow())
            .field("mounted", &self.guard.is_mounted())
            .finish()
    }
}

impl<T, E> Default for AsyncOperation<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> AsyncOperation<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates an idle operation.
    #[must_use]
    pub fn new() -> Self {
        Self::with_initial(AsyncState::idle())
    }

    /// Creates an operation starting from a custom state.
    ///
    /// [`reset`](Self::reset) returns to exactly this snapshot.
    #[must_use]
    pub fn with_initial(initial: AsyncState<T, E>) -> Self {
        let (state, _) = watch::channel(initial.clone());
        Self {
            state: Arc::new(state),
            initial: Arc::new(initial),
            guard: MountGuard::new(),
        }
    }

    /// Returns a snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> AsyncState<T, E> {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.state.borrow().status
    }

    #[must_use]
    pub fn data(&self) -> Option<T> {
        self.state.borrow().data.clone()
    }

    #[must_use]
    pub fn error(&self) -> Option<E> {
        self.state.borrow().error.clone()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state.borrow().is_idle()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state.borrow().is_success()
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.state.borrow().is_error()
    }

    /// Subscribes to state changes.
    ///
    /// The receiver sees the current state immediately and is notified of every
    /// transition that is actually applied.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AsyncState<T, E>> {
        self.state.subscribe()
    }

    /// Forces a transition to `Resolved` with the given data.
    pub fn set_data(&self, data: T) {
        self.transition(AsyncState::resolved(data));
    }

    /// Forces a transition to `Rejected` with the given error.
    pub fn set_error(&self, error: E) {
        self.transition(AsyncState::rejected(error));
    }

    /// Returns to the snapshot captured at creation.
    pub fn reset(&self) {
        self.transition((*self.initial).clone());
    }

    /// Tracks `future` through this operation.
    ///
    /// The state becomes `Pending` before this method returns. The returned
    /// future resolves to the computation's own result: an error is stored in
    /// the state *and* handed back so call sites can chain their own handling.
    pub fn run<F>(&self, future: F) -> impl Future<Output = Result<T, E>> + Send + 'static
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.transition(AsyncState::pending());

        let this = self.clone();
        async move {
            match future.await {
                Ok(data) => {
                    this.set_data(data.clone());
                    Ok(data)
                }
                Err(error) => {
                    this.set_error(error.clone());
                    Err(error)
                }
            }
        }
    }

    /// Like [`run`](Self::run), for callers whose future comes from a factory
    /// that may produce nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::MissingFuture`] immediately, before any transition,
    /// when `future` is `None`.
    pub fn try_run<F>(
        &self,
        future: Option<F>,
    ) -> Result<impl Future<Output = Result<T, E>> + Send + 'static, RunError>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let future = future.ok_or(RunError::MissingFuture)?;
        Ok(self.run(future))
    }

    /// Tears the operation down. Later transitions are silently dropped.
    pub fn unmount(&self) {
        self.guard.unmount();
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.guard.is_mounted()
    }

    /// The guard protecting this operation's state.
    #[must_use]
    pub const fn guard(&self) -> &MountGuard {
        &self.guard
    }

    fn transition(&self, next: AsyncState<T, E>) {
        self.guard.apply(|| {
            tracing::trace!(from = ?self.state.borrow().status, to = ?next.status, "async state transition");
            self.state.send_replace(next);
        });
    }
}
