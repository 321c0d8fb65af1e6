//! The API client.
//!
//! [`ApiClient`] turns an endpoint and a [`RequestConfig`] into a [`Request`],
//! hands it to a [`Transport`] and decodes the JSON answer. It owns the rules
//! every call to the bookshelf API follows:
//!
//! - the method defaults to `GET`, or `POST` when a body is given,
//! - a bearer token is attached when one is supplied,
//! - JSON is declared as the content type, and custom headers override it,
//! - non-success answers become [`QueryError::Remote`] carrying the parsed body,
//! - a `401` tears the session down: the query cache is cleared, the auth
//!   provider is logged out, [`on_unauthorized`](ApiClient::on_unauthorized)
//!   hooks run and [`QueryError::Unauthorized`] is returned.

#[cfg(feature = "http")]
pub mod http;
pub mod mock;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth::AuthProvider;
use crate::error::QueryError;
use crate::query::QueryCache;

/// Environment variable read by [`ClientConfig::from_env`].
pub const API_URL_VAR: &str = "BOOKSHELF_API_URL";

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved request, as handed to a [`Transport`].
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    /// The endpoint relative to the API root, e.g. `list-items/3`.
    pub endpoint: String,
    /// The absolute URL.
    pub url: String,
    /// Query-string parameters, encoded by the transport.
    pub query: Vec<(String, String)>,
    /// Header names are lower-case.
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Request {
    /// Returns the value of header `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the query-string parameter `name`.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A response with its body already parsed.
///
/// An empty body is represented as [`Value::Null`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    #[must_use]
    pub const fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// A `200 OK` response.
    #[must_use]
    pub const fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Sends requests somewhere.
///
/// [`mock::MockTransport`] answers from in-process handlers; `http::HttpTransport`
/// (feature `http`) talks to a real server.
pub trait Transport: Send + Sync {
    /// Sends `request`. Only failures to obtain a response are errors;
    /// non-success statuses are returned as responses.
    fn send(&self, request: Request) -> BoxFuture<'static, Result<Response, QueryError>>;
}

/// Where the API lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// API root, e.g. `https://bookshelf.example/api`.
    pub api_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000/api".to_string(),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
        }
    }

    /// Reads the API root from `BOOKSHELF_API_URL`, falling back to the default.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var(API_URL_VAR).map_or_else(|_| Self::default(), Self::new)
    }

    /// Joins `endpoint` onto the API root.
    #[must_use]
    pub fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.api_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

/// Per-request options.
///
/// ```
/// use bookshelf::client::{Method, RequestConfig};
/// use serde_json::json;
///
/// let config = RequestConfig::new()
///     .token("abc")
///     .data(json!({ "bookId": "1" }));
/// assert_eq!(config.resolved_method(), Method::Post);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestConfig {
    pub method: Option<Method>,
    pub token: Option<String>,
    pub data: Option<Value>,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl RequestConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Like [`token`](Self::token), for callers that may not have one.
    #[must_use]
    pub fn maybe_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Adds a header. It replaces a default header of the same name.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The method that will be used: the explicit one, else `POST` with a body
    /// and `GET` without.
    #[must_use]
    pub const fn resolved_method(&self) -> Method {
        match (self.method, &self.data) {
            (Some(method), _) => method,
            (None, Some(_)) => Method::Post,
            (None, None) => Method::Get,
        }
    }

    fn into_request(self, config: &ClientConfig, endpoint: &str) -> Request {
        let method = self.resolved_method();
        let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
        if let Some(token) = &self.token {
            headers.push(("authorization".to_string(), format!("Bearer {token}")));
        }
        for (name, value) in self.headers {
            let name = name.to_ascii_lowercase();
            headers.retain(|(k, _)| *k != name);
            headers.push((name, value));
        }

        Request {
            method,
            endpoint: endpoint.to_string(),
            url: config.url(endpoint),
            query: self.query,
            headers,
            body: self.data,
        }
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// Client for the bookshelf API.
///
/// Cloning is cheap; clones share the transport, cache, auth provider and
/// rejection hooks.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    cache: Arc<QueryCache>,
    auth: Arc<dyn AuthProvider>,
    unauthorized: Arc<RwLock<Vec<Hook>>>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
        cache: Arc<QueryCache>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        Self {
            transport,
            config,
            cache,
            auth,
            unauthorized: Arc::default(),
        }
    }

    /// Registers `hook` to run whenever the API rejects the session.
    ///
    /// Hooks run after the cache has been cleared and the provider logged out.
    pub fn on_unauthorized(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.unauthorized
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(hook));
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The cache this client clears when the session is rejected.
    #[must_use]
    pub const fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    #[must_use]
    pub const fn auth(&self) -> &Arc<dyn AuthProvider> {
        &self.auth
    }

    /// Calls `endpoint` and decodes the JSON answer as `T`.
    ///
    /// # Errors
    ///
    /// - [`QueryError::Unauthorized`] on a `401`, after clearing the cache and
    ///   logging out,
    /// - [`QueryError::Remote`] on any other non-success status,
    /// - [`QueryError::Network`] when no response was obtained,
    /// - [`QueryError::Decode`] when the body does not match `T`.
    #[tracing::instrument(level = "debug", skip(self, config), fields(method))]
    pub async fn request<T>(&self, endpoint: &str, config: RequestConfig) -> Result<T, QueryError>
    where
        T: DeserializeOwned,
    {
        let request = config.into_request(&self.config, endpoint);
        tracing::Span::current().record("method", request.method.as_str());

        let response = self.transport.send(request).await?;

        if response.status == 401 {
            tracing::warn!("session rejected; clearing cache and logging out");
            self.cache.clear();
            if let Err(err) = self.auth.logout().await {
                tracing::warn!(error = %err, "logout after rejected session failed");
            }
            for hook in self.unauthorized.read().unwrap_or_else(PoisonError::into_inner).iter() {
                hook();
            }
            return Err(QueryError::Unauthorized);
        }

        if !response.is_success() {
            tracing::debug!(status = response.status, "request failed");
            return Err(QueryError::remote(response.status, response.body));
        }

        Ok(serde_json::from_value(response.body)?)
    }
}
