//! In-process transport for testing.
//!
//! [`MockTransport`] answers requests from handlers registered per method and
//! path, and records every request it sees. It needs no network and no
//! runtime beyond the caller's.
//!
//! # Routing
//!
//! Paths are matched segment by segment against the request's endpoint
//! (without its query string). A `*` segment matches any single segment:
//!
//! ```
//! use bookshelf::client::{Method, Response, mock::MockTransport};
//! use serde_json::json;
//!
//! let transport = MockTransport::new()
//!     .on(Method::Get, "books/*", |req| {
//!         let id = req.endpoint.rsplit('/').next().unwrap_or_default();
//!         Response::ok(json!({ "book": { "id": id } }))
//!     });
//! # let _ = transport;
//! ```
//!
//! Unmatched requests get a `404` with a JSON message.

use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::json;

use crate::error::QueryError;

use super::{Method, Request, Response, Transport};

type Handler = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

struct Route {
    method: Method,
    segments: Vec<String>,
    handler: Handler,
}

impl Route {
    fn matches(&self, request: &Request) -> bool {
        if self.method != request.method {
            return false;
        }
        let path = request.endpoint.split('?').next().unwrap_or_default();
        let mut actual = path.trim_matches('/').split('/');
        let mut expected = self.segments.iter();
        loop {
            match (expected.next(), actual.next()) {
                (None, None) => return true,
                (Some(e), Some(a)) if e == "*" || e == a => {}
                _ => return false,
            }
        }
    }
}

/// A transport that answers from registered handlers.
///
/// Cloning yields another handle to the same routes and request log, so a test
/// can keep one clone while the client owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    routes: Arc<Mutex<Vec<Route>>>,
    requests: Arc<Mutex<Vec<Request>>>,
    offline: Arc<Mutex<Option<String>>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("requests", &self.requests().len())
            .finish_non_exhaustive()
    }
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method` on `path`. Later registrations take
    /// precedence over earlier ones for the same request.
    #[must_use]
    pub fn on<F>(self, method: Method, path: &str, handler: F) -> Self
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        self.route(method, path, handler);
        self
    }

    /// Like [`on`](Self::on), through a shared handle.
    pub fn route<F>(&self, method: Method, path: &str, handler: F)
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        let route = Route {
            method,
            segments: path
                .trim_matches('/')
                .split('/')
                .map(ToString::to_string)
                .collect(),
            handler: Arc::new(handler),
        };
        lock(&self.routes).push(route);
    }

    /// Makes every following request fail with [`QueryError::Network`], until
    /// [`reconnect`](Self::reconnect).
    pub fn disconnect(&self, reason: impl Into<String>) {
        *lock(&self.offline) = Some(reason.into());
    }

    pub fn reconnect(&self) {
        *lock(&self.offline) = None;
    }

    /// Every request sent so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        lock(&self.requests).clone()
    }

    /// The most recent request, if any.
    #[must_use]
    pub fn last_request(&self) -> Option<Request> {
        lock(&self.requests).last().cloned()
    }

    fn respond(&self, request: &Request) -> Result<Response, QueryError> {
        if let Some(reason) = lock(&self.offline).clone() {
            return Err(QueryError::Network(reason));
        }
        let handler = lock(&self.routes)
            .iter()
            .rev()
            .find(|route| route.matches(request))
            .map(|route| route.handler.clone());

        Ok(match handler {
            Some(handler) => handler(request),
            None => {
                tracing::debug!(method = %request.method, endpoint = %request.endpoint, "no mock route");
                Response::new(404, json!({ "message": "Not found" }))
            }
        })
    }
}

impl Transport for MockTransport {
    fn send(&self, request: Request) -> BoxFuture<'static, Result<Response, QueryError>> {
        let result = self.respond(&request);
        lock(&self.requests).push(request);
        async move { result }.boxed()
    }
}

/// Locks `mutex`, ignoring poisoning. Every critical section is a single push,
/// clone or assignment.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
