//! Authentication and the current session.
//!
//! An [`AuthProvider`] owns credentials and the stored token. A [`Session`]
//! tracks the signed-in user through an [`AsyncOperation`], so consumers see
//! the bootstrap as `Pending` and then either a user (or `None`) or an error.
//!
//! Two providers are included: [`memory::InMemoryAuth`] keeps accounts in
//! process, [`remote::RemoteAuth`] talks to an auth server through a
//! [`Transport`](crate::client::Transport).

pub mod memory;
pub mod remote;

use std::future::Future;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::client::{ApiClient, RequestConfig};
use crate::error::{AuthError, QueryError};
use crate::operation::{AsyncOperation, AsyncState, Status};

/// A signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    /// Bearer token for API calls. Absent from some server payloads.
    #[serde(default)]
    pub token: String,
}

/// Username and password, as submitted by a login or registration form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Source of identity.
///
/// Implementations store the token of the last successful login or
/// registration until [`logout`](Self::logout).
pub trait AuthProvider: Send + Sync {
    /// The stored token, if a user is signed in.
    fn get_token(&self) -> BoxFuture<'static, Result<Option<String>, AuthError>>;

    fn login(&self, credentials: Credentials) -> BoxFuture<'static, Result<User, AuthError>>;

    fn register(&self, credentials: Credentials) -> BoxFuture<'static, Result<User, AuthError>>;

    /// Forgets the stored token.
    fn logout(&self) -> BoxFuture<'static, Result<(), AuthError>>;
}

#[derive(Deserialize)]
struct MeResponse {
    user: User,
}

/// The current user, tracked as an [`AsyncOperation`].
///
/// `None` data means nobody is signed in. Cloning yields another handle to the
/// same session.
#[derive(Debug, Clone)]
pub struct Session {
    client: ApiClient,
    operation: AsyncOperation<Option<User>, QueryError>,
}

impl Session {
    /// Creates a signed-out session. It ends itself whenever `client` gets a
    /// `401`.
    #[must_use]
    pub fn new(client: ApiClient) -> Self {
        let operation: AsyncOperation<Option<User>, QueryError> = AsyncOperation::new();
        let teardown = operation.clone();
        client.on_unauthorized(move || {
            tracing::info!("session rejected by the API");
            teardown.set_data(None);
        });
        Self { client, operation }
    }

    /// Resolves the current user from the stored token.
    ///
    /// With no token the session resolves to `None` without calling the API;
    /// otherwise `me` is requested with the token. The state is `Pending`
    /// before this method returns.
    pub fn bootstrap(&self) -> impl Future<Output = Result<Option<User>, QueryError>> + Send + 'static {
        let client = self.client.clone();
        self.operation.run(async move {
            let Some(token) = client.auth().get_token().await? else {
                tracing::debug!("no stored token");
                return Ok(None);
            };
            let me: MeResponse = client.request("me", RequestConfig::new().token(token.clone())).await?;
            Ok::<_, QueryError>(Some(User { token, ..me.user }))
        })
    }

    /// Signs in and makes the returned user current.
    ///
    /// # Errors
    ///
    /// Returns the provider's error; the session state is left unchanged.
    pub async fn login(&self, credentials: Credentials) -> Result<User, QueryError> {
        let user = self.client.auth().login(credentials).await?;
        tracing::info!(username = %user.username, "logged in");
        self.operation.set_data(Some(user.clone()));
        Ok(user)
    }

    /// Creates an account and makes it current.
    ///
    /// # Errors
    ///
    /// Returns the provider's error; the session state is left unchanged.
    pub async fn register(&self, credentials: Credentials) -> Result<User, QueryError> {
        let user = self.client.auth().register(credentials).await?;
        tracing::info!(username = %user.username, "registered");
        self.operation.set_data(Some(user.clone()));
        Ok(user)
    }

    /// Signs out: forgets the token, clears every cached query and resolves
    /// the session to `None`.
    ///
    /// # Errors
    ///
    /// Returns the provider's error. The cache is cleared and the session
    /// ended regardless.
    pub async fn logout(&self) -> Result<(), QueryError> {
        let result = self.client.auth().logout().await;
        self.client.cache().clear();
        self.operation.set_data(None);
        tracing::info!("logged out");
        result.map_err(QueryError::from)
    }

    /// The signed-in user, if any.
    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.operation.data().flatten()
    }

    /// The signed-in user's token, if any.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.user().map(|user| user.token)
    }

    #[must_use]
    pub fn state(&self) -> AsyncState<Option<User>, QueryError> {
        self.operation.state()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.operation.status()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AsyncState<Option<User>, QueryError>> {
        self.operation.subscribe()
    }

    #[must_use]
    pub const fn client(&self) -> &ApiClient {
        &self.client
    }
}
