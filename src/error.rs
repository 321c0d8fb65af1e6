//! Error types shared by operations, the query cache and the API client.

use serde_json::Value;
use thiserror::Error;

/// Message delivered to callers when the server rejects the session.
pub const REAUTHENTICATE_MESSAGE: &str = "Please re-authenticate.";

/// Error type for queries, mutations and API requests.
///
/// This is `Clone` because a single in-flight fetch is shared by every caller
/// that asked for the same key while it was running.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The request never produced a response.
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("Request failed with status {status}: {message}")]
    Remote {
        status: u16,
        message: String,
        /// The parsed error body, as sent by the server.
        body: Value,
    },

    /// The server answered 401; the session has been torn down.
    #[error("Please re-authenticate.")]
    Unauthorized,

    /// The response body could not be decoded into the expected type.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The operation was superseded before it could settle.
    #[error("Operation was cancelled")]
    Cancelled,
}

impl QueryError {
    /// Builds a [`QueryError::Remote`] from a status code and a response body.
    ///
    /// The message is taken from the body's `message` field when it has one.
    #[must_use]
    pub fn remote(status: u16, body: Value) -> Self {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| format!("HTTP {status}"), ToString::to_string);
        Self::Remote {
            status,
            message,
            body,
        }
    }

    /// Returns the HTTP status carried by this error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } => Some(*status),
            Self::Unauthorized => Some(401),
            _ => None,
        }
    }

    /// Returns `true` for a 404 answer.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(404))
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Error returned synchronously by [`AsyncOperation::try_run`](crate::operation::AsyncOperation::try_run).
///
/// This is a programmer error and is never stored in operation state.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunError {
    #[error(
        "The argument passed to AsyncOperation::run must be a future. Maybe a function that's passed isn't returning anything?"
    )]
    MissingFuture,
}

/// Error type for auth provider operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Username is already taken: {0}")]
    UsernameTaken(String),

    /// The auth server refused the request with this message.
    #[error("{0}")]
    Rejected(String),

    #[error("Auth provider failure: {0}")]
    Provider(String),
}

impl From<AuthError> for QueryError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials | AuthError::UsernameTaken(_) | AuthError::Rejected(_) => {
                Self::remote(400, serde_json::json!({ "message": err.to_string() }))
            }
            AuthError::Provider(message) => Self::Network(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remote_uses_body_message() {
        let err = QueryError::remote(400, json!({ "message": "this is the response!" }));
        assert_eq!(
            err.to_string(),
            "Request failed with status 400: this is the response!"
        );
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn test_remote_without_message() {
        let err = QueryError::remote(500, json!({}));
        match err {
            QueryError::Remote { message, .. } => assert_eq!(message, "HTTP 500"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unauthorized_display() {
        assert_eq!(QueryError::Unauthorized.to_string(), "Please re-authenticate.");
        assert_eq!(QueryError::Unauthorized.status(), Some(401));
    }

    #[test]
    fn test_not_found() {
        assert!(QueryError::remote(404, json!({})).is_not_found());
        assert!(!QueryError::Network("down".to_string()).is_not_found());
    }

    #[test]
    fn test_auth_error_conversion() {
        let err: QueryError = AuthError::InvalidCredentials.into();
        assert_eq!(err.status(), Some(400));

        let err: QueryError = AuthError::Rejected("password is required".to_string()).into();
        assert_eq!(err.to_string(), "Request failed with status 400: password is required");

        let err: QueryError = AuthError::Provider("storage".to_string()).into();
        assert_eq!(err, QueryError::Network("storage".to_string()));
    }
}
