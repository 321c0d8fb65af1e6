//! Query caching.
//!
//! This module provides the [`QueryCache`], the keyed store every read goes
//! through, and [`QueryObserver`], a stream that keeps a consumer in sync with
//! one key.
//!
//! # Features
//!
//! - **Structural keys**: [`QueryKey`] compares names and parameter records by value
//! - **De-duplication**: concurrent fetches of one key share a single producer call
//! - **Direct writes**: populate one query from another's results, or apply optimistic edits
//! - **Invalidation**: drop a key (or every key with a name) so the next read refetches
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use bookshelf::query::{QueryCache, QueryKey, Updater};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = Arc::new(QueryCache::new());
//! let key = QueryKey::new("book").param("bookId", "1");
//!
//! cache.write(&key, Updater::Value("Dune".to_string()));
//! let title = cache
//!     .fetch(&key, || async { Ok("never called".to_string()) })
//!     .await;
//! assert_eq!(title.as_deref(), Ok("Dune"));
//!
//! cache.invalidate(&key);
//! assert_eq!(cache.read::<String>(&key), None);
//! # }
//! ```

mod cache;
mod config;
mod key;
pub mod observer;

pub use cache::{CacheEntry, CacheEvent, QueryCache, Updater};
pub use config::{QueryConfig, RetryPolicy};
pub use key::QueryKey;
pub use observer::{QueryObserver, QueryResult, QueryState};
