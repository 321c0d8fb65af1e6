//! Accounts kept in process memory.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::watch;

use crate::error::AuthError;

use super::{AuthProvider, Credentials, User};

struct Account {
    password: String,
    user: User,
}

/// An [`AuthProvider`] that stores accounts in memory.
///
/// Every successful login or registration issues a fresh token.
pub struct InMemoryAuth {
    accounts: DashMap<String, Account>,
    token: watch::Sender<Option<String>>,
    next_id: AtomicU64,
}

impl Default for InMemoryAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryAuth")
            .field("accounts", &self.accounts.len())
            .field("signed_in", &self.token.borrow().is_some())
            .finish()
    }
}

impl InMemoryAuth {
    #[must_use]
    pub fn new() -> Self {
        let (token, _) = watch::channel(None);
        Self {
            accounts: DashMap::new(),
            token,
            next_id: AtomicU64::new(1),
        }
    }

    /// Issues and stores a new token for `user`.
    fn sign_in(&self, user: &User) -> User {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = format!("token-{}-{n}", user.id);
        self.token.send_replace(Some(token.clone()));
        User {
            token,
            ..user.clone()
        }
    }
}

impl AuthProvider for InMemoryAuth {
    fn get_token(&self) -> BoxFuture<'static, Result<Option<String>, AuthError>> {
        let token = self.token.borrow().clone();
        async move { Ok(token) }.boxed()
    }

    fn login(&self, credentials: Credentials) -> BoxFuture<'static, Result<User, AuthError>> {
        let result = match self.accounts.get(&credentials.username) {
            Some(account) if account.password == credentials.password => Ok(self.sign_in(&account.user)),
            _ => Err(AuthError::InvalidCredentials),
        };
        async move { result }.boxed()
    }

    fn register(&self, credentials: Credentials) -> BoxFuture<'static, Result<User, AuthError>> {
        let result = match self.accounts.entry(credentials.username.clone()) {
            Entry::Occupied(_) => Err(AuthError::UsernameTaken(credentials.username)),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
                let user = User {
                    id,
                    username: credentials.username,
                    token: String::new(),
                };
                let account = slot.insert(Account {
                    password: credentials.password,
                    user,
                });
                Ok(self.sign_in(&account.user))
            }
        };
        async move { result }.boxed()
    }

    fn logout(&self) -> BoxFuture<'static, Result<(), AuthError>> {
        self.token.send_replace(None);
        async { Ok(()) }.boxed()
    }
}
