//! # Bookshelf - async state for a reading-list client
//!
//! Bookshelf is the data layer of a reading-list application: it tracks
//! asynchronous operations, caches server data by key, and applies optimistic
//! edits that are rolled back when the server refuses them. It is built on
//! [tokio](https://tokio.rs/) and works the same on the current-thread and the
//! multi-threaded runtime.
//!
//! ## Core Components
//!
//! - [`AsyncOperation`](operation::AsyncOperation): lifecycle of one computation
//!   (`Idle`, `Pending`, `Resolved`, `Rejected`)
//! - [`MountGuard`](guard::MountGuard): drops state updates once the owner is gone
//! - [`QueryCache`](query::QueryCache): keyed cache with request de-duplication,
//!   invalidation and direct writes
//! - [`Mutation`](mutation::Mutation): remote changes with optimistic cache edits
//!
//! On top of these sit the [`ApiClient`](client::ApiClient), the
//! [`Session`](auth::Session) and the [`Bookshelf`](books::Bookshelf) queries.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use bookshelf::prelude::*;
//! use bookshelf::client::{mock::MockTransport, Method, Response};
//! use bookshelf::auth::memory::InMemoryAuth;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), QueryError> {
//! let transport = MockTransport::new().on(Method::Get, "list-items", |_| {
//!     Response::ok(json!({ "listItems": [] }))
//! });
//! let client = ApiClient::new(
//!     Arc::new(transport),
//!     ClientConfig::default(),
//!     Arc::new(QueryCache::new()),
//!     Arc::new(InMemoryAuth::new()),
//! );
//!
//! let session = Session::new(client);
//! session.register(Credentials::new("reader", "secret")).await?;
//!
//! let shelf = Bookshelf::for_session(&session);
//! let items = shelf.list_items().fetch().await?;
//! assert!(items.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod books;
pub mod client;
pub mod error;
pub mod guard;
pub mod mutation;
pub mod operation;
pub mod prelude;
pub mod query;
