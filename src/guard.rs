//! Liveness guard for state setters.
//!
//! A [`MountGuard`] is created alongside the state it protects and torn down
//! when the owner goes away. Setters wrapped by the guard become silent no-ops
//! after teardown, so a future that settles late cannot write into state that
//! nobody observes anymore.
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use bookshelf::guard::MountGuard;
//!
//! let value = Arc::new(Mutex::new(0));
//! let guard = MountGuard::new();
//!
//! let sink = value.clone();
//! let set = guard.guard(move |v: i32| *sink.lock().unwrap() = v);
//!
//! set(1);
//! guard.unmount();
//! set(2);
//!
//! assert_eq!(*value.lock().unwrap(), 1);
//! ```

use tokio_util::sync::CancellationToken;

/// Tracks whether the owner of some state is still alive.
///
/// Clones share the same liveness flag.
#[derive(Debug, Clone, Default)]
pub struct MountGuard {
    token: CancellationToken,
}

impl MountGuard {
    /// Creates a guard in the mounted state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Returns `true` until [`unmount`](Self::unmount) is called.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Marks the owner as torn down. Idempotent.
    pub fn unmount(&self) {
        self.token.cancel();
    }

    /// Resolves once the guard has been torn down.
    pub async fn unmounted(&self) {
        self.token.cancelled().await;
    }

    /// Runs `f` only while mounted. Returns `None` when the call was dropped.
    pub fn apply<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if self.is_mounted() {
            Some(f())
        } else {
            tracing::trace!("dropping state update after unmount");
            None
        }
    }

    /// Wraps a setter so it becomes a no-op once the guard is torn down.
    pub fn guard<A, F>(&self, f: F) -> impl Fn(A) + Send + Sync + 'static
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        let guard = self.clone();
        move |arg| {
            guard.apply(|| f(arg));
        }
    }
}
