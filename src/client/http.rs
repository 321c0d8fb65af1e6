//! A [`Transport`] over HTTP, backed by `reqwest`.

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::QueryError;

use super::{Method, Request, Response, Transport};

/// Sends requests with a shared [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured client, e.g. one with timeouts set.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

const fn method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Parses a response body. Empty bodies become `null`; non-JSON error pages
/// are kept as a string so their text still reaches the caller.
fn decode(status: u16, text: String) -> Result<Value, QueryError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    match serde_json::from_str(&text) {
        Ok(body) => Ok(body),
        Err(_) if !(200..300).contains(&status) => Ok(Value::String(text)),
        Err(err) => Err(err.into()),
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: Request) -> BoxFuture<'static, Result<Response, QueryError>> {
        let mut builder = self
            .client
            .request(method(request.method), &request.url)
            .query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.to_string());
        }

        async move {
            let response = builder
                .send()
                .await
                .map_err(|e| QueryError::Network(e.to_string()))?;
            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .map_err(|e| QueryError::Network(e.to_string()))?;

            let body = decode(status, text)?;
            tracing::trace!(status, "http response");
            Ok(Response::new(status, body))
        }
        .boxed()
    }
}
