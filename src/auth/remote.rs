//! Accounts held by an auth server.
//!
//! `login` and `register` post the credentials as JSON to `<auth_url>/login`
//! and `<auth_url>/register`. A success answers `{"user": {...}}` and the
//! user's token is kept until logout; a failure's `message` is surfaced as
//! [`AuthError::Rejected`].

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::client::{Method, Request, Transport};
use crate::error::AuthError;

use super::{AuthProvider, Credentials, User};

/// Environment variable read by [`RemoteAuth::from_env`].
pub const AUTH_URL_VAR: &str = "BOOKSHELF_AUTH_URL";

const DEFAULT_AUTH_URL: &str = "http://localhost:3000/auth";

#[derive(Deserialize)]
struct UserResponse {
    user: User,
}

/// An [`AuthProvider`] backed by an auth server.
#[derive(Clone)]
pub struct RemoteAuth {
    transport: Arc<dyn Transport>,
    auth_url: String,
    token: Arc<watch::Sender<Option<String>>>,
}

impl std::fmt::Debug for RemoteAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAuth")
            .field("auth_url", &self.auth_url)
            .finish_non_exhaustive()
    }
}

impl RemoteAuth {
    pub fn new(transport: Arc<dyn Transport>, auth_url: impl Into<String>) -> Self {
        let (token, _) = watch::channel(None);
        Self {
            transport,
            auth_url: auth_url.into(),
            token: Arc::new(token),
        }
    }

    /// Reads the auth server root from `BOOKSHELF_AUTH_URL`.
    pub fn from_env(transport: Arc<dyn Transport>) -> Self {
        let auth_url = std::env::var(AUTH_URL_VAR).unwrap_or_else(|_| DEFAULT_AUTH_URL.to_string());
        Self::new(transport, auth_url)
    }

    /// Starts from a token persisted by an earlier run.
    #[must_use]
    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.token.send_replace(Some(token.into()));
        self
    }

    fn post(&self, endpoint: &str, credentials: Credentials) -> BoxFuture<'static, Result<User, AuthError>> {
        let body = serde_json::to_value(&credentials).map_err(|e| AuthError::Provider(e.to_string()));
        let url = format!("{}/{endpoint}", self.auth_url.trim_end_matches('/'));
        let transport = self.transport.clone();
        let token = self.token.clone();
        let endpoint = endpoint.to_string();

        async move {
            let request = Request {
                method: Method::Post,
                endpoint,
                url,
                query: Vec::new(),
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body: Some(body?),
            };
            let response = transport
                .send(request)
                .await
                .map_err(|e| AuthError::Provider(e.to_string()))?;

            if !response.is_success() {
                let message = response
                    .body
                    .get("message")
                    .and_then(Value::as_str)
                    .map_or_else(|| format!("HTTP {}", response.status), ToString::to_string);
                return Err(AuthError::Rejected(message));
            }

            let UserResponse { user } =
                serde_json::from_value(response.body).map_err(|e| AuthError::Provider(e.to_string()))?;
            token.send_replace(Some(user.token.clone()));
            Ok(user)
        }
        .boxed()
    }
}

impl AuthProvider for RemoteAuth {
    fn get_token(&self) -> BoxFuture<'static, Result<Option<String>, AuthError>> {
        let token = self.token.borrow().clone();
        async move { Ok(token) }.boxed()
    }

    fn login(&self, credentials: Credentials) -> BoxFuture<'static, Result<User, AuthError>> {
        self.post("login", credentials)
    }

    fn register(&self, credentials: Credentials) -> BoxFuture<'static, Result<User, AuthError>> {
        self.post("register", credentials)
    }

    fn logout(&self) -> BoxFuture<'static, Result<(), AuthError>> {
        self.token.send_replace(None);
        async { Ok(()) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::client::Response;
    use crate::client::mock::MockTransport;

    fn server() -> MockTransport {
        MockTransport::new().on(Method::Post, "login", |req| {
            let body = req.body.clone().unwrap_or_default();
            if body["password"] == "pw" {
                Response::ok(json!({
                    "user": { "id": "u1", "username": body["username"], "token": "t1" }
                }))
            } else {
                Response::new(400, json!({ "message": "Invalid username or password" }))
            }
        })
    }

    #[tokio::test]
    async fn test_login_stores_token() {
        let transport = server();
        let auth = RemoteAuth::new(Arc::new(transport.clone()), "http://auth/");

        let user = auth.login(Credentials::new("jo", "pw")).await.expect("logs in");
        assert_eq!(user.username, "jo");
        assert_eq!(auth.get_token().await, Ok(Some("t1".to_string())));

        let request = transport.last_request().expect("login was posted");
        assert_eq!(request.url, "http://auth/login");
        assert_eq!(request.body, Some(json!({ "username": "jo", "password": "pw" })));
    }

    #[tokio::test]
    async fn test_rejection_message_is_surfaced() {
        let auth = RemoteAuth::new(Arc::new(server()), "http://auth");
        assert_eq!(
            auth.login(Credentials::new("jo", "nope")).await,
            Err(AuthError::Rejected("Invalid username or password".to_string()))
        );
        assert_eq!(auth.get_token().await, Ok(None));
    }

    #[tokio::test]
    async fn test_unknown_endpoint() {
        let auth = RemoteAuth::new(Arc::new(server()), "http://auth");
        assert_eq!(
            auth.register(Credentials::new("jo", "pw")).await,
            Err(AuthError::Rejected("Not found".to_string()))
        );
    }

    #[tokio::test]
    async fn test_persisted_token_and_logout() {
        let auth = RemoteAuth::new(Arc::new(server()), "http://auth").with_token("saved");
        assert_eq!(auth.get_token().await, Ok(Some("saved".to_string())));

        auth.logout().await.expect("logs out");
        assert_eq!(auth.get_token().await, Ok(None));
    }
}
