//! Prelude module for convenient imports.
//!
//! ```
//! use bookshelf::prelude::*;
//! ```

pub use crate::auth::{AuthProvider, Credentials, Session, User};
pub use crate::books::{Book, Bookshelf, ListItem, ListItemUpdate};
pub use crate::client::{ApiClient, ClientConfig, RequestConfig, Transport};
pub use crate::error::{AuthError, QueryError, RunError};
pub use crate::guard::MountGuard;
pub use crate::mutation::{Mutation, Speculation};
pub use crate::operation::{AsyncOperation, AsyncState, Status};
pub use crate::query::{QueryCache, QueryConfig, QueryKey, QueryObserver, QueryResult, QueryState, Updater};
