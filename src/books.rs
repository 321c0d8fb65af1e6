//! Bookshelf queries and mutations.
//!
//! [`Bookshelf`] binds an [`ApiClient`] to the signed-in user's token and
//! exposes the reading-list API through the query cache:
//!
//! | Operation | Key | Endpoint |
//! |---|---|---|
//! | [`book`](Bookshelf::book) | `book:{"bookId":..}` | `GET books/{id}` |
//! | [`book_search`](Bookshelf::book_search) | `bookSearch:{"query":..}` | `GET books?query=..` |
//! | [`list_items`](Bookshelf::list_items) | `list-items` | `GET list-items` |
//! | [`update_list_item`](Bookshelf::update_list_item) | `list-items` (optimistic) | `PUT list-items/{id}` |
//! | [`remove_list_item`](Bookshelf::remove_list_item) | `list-items` | `DELETE list-items/{id}` |
//! | [`create_list_item`](Bookshelf::create_list_item) | `list-items` | `POST list-items` |
//!
//! Search results and list items also populate the per-book entries, so
//! opening a book found through either needs no extra request.

mod model;

use std::sync::Arc;

use serde::Deserialize;
use serde::de::IgnoredAny;
use serde_json::json;

use crate::auth::Session;
use crate::client::{ApiClient, Method, RequestConfig};
use crate::error::QueryError;
use crate::mutation::{Mutation, Speculation};
use crate::query::{QueryCache, QueryKey, QueryObserver, Updater};

pub use model::{Book, ListItem, ListItemUpdate};

/// Key of one catalog record.
#[must_use]
pub fn book_key(book_id: &str) -> QueryKey {
    QueryKey::new("book").param("bookId", book_id)
}

/// Key of one search.
#[must_use]
pub fn book_search_key(query: &str) -> QueryKey {
    QueryKey::new("bookSearch").param("query", query)
}

/// Key of the signed-in user's reading list.
#[must_use]
pub fn list_items_key() -> QueryKey {
    QueryKey::new("list-items")
}

#[derive(Deserialize)]
struct BookResponse {
    book: Book,
}

#[derive(Deserialize)]
struct BooksResponse {
    books: Vec<Book>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListItemsResponse {
    list_items: Vec<ListItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListItemResponse {
    list_item: ListItem,
}

fn store_books<'a>(cache: &QueryCache, books: impl IntoIterator<Item = &'a Book>) {
    for book in books {
        cache.write(&book_key(&book.id), Updater::Value(book.clone()));
    }
}

/// The reading-list API for one user.
#[derive(Debug, Clone)]
pub struct Bookshelf {
    client: ApiClient,
    token: Option<String>,
}

impl Bookshelf {
    #[must_use]
    pub const fn new(client: ApiClient, token: Option<String>) -> Self {
        Self { client, token }
    }

    /// Binds to the session's current user.
    #[must_use]
    pub fn for_session(session: &Session) -> Self {
        Self::new(session.client().clone(), session.token())
    }

    #[must_use]
    pub const fn client(&self) -> &ApiClient {
        &self.client
    }

    fn cache(&self) -> Arc<QueryCache> {
        self.client.cache().clone()
    }

    fn config(&self) -> RequestConfig {
        RequestConfig::new().maybe_token(self.token.clone())
    }

    /// One book by id.
    #[must_use]
    pub fn book(&self, book_id: &str) -> QueryObserver<Book> {
        let client = self.client.clone();
        let config = self.config();
        let endpoint = format!("books/{book_id}");

        QueryObserver::new(
            book_key(book_id),
            move || {
                let client = client.clone();
                let config = config.clone();
                let endpoint = endpoint.clone();
                Box::pin(async move {
                    let BookResponse { book } = client.request(&endpoint, config).await?;
                    Ok(book)
                })
            },
            self.cache(),
        )
    }

    /// Books matching `query`. An empty query lists the catalog.
    ///
    /// Every book found is also stored under its [`book_key`].
    #[must_use]
    pub fn book_search(&self, query: &str) -> QueryObserver<Vec<Book>> {
        let client = self.client.clone();
        let config = self.config().query("query", query);
        let cache = self.cache();

        QueryObserver::new(
            book_search_key(query),
            move || {
                let client = client.clone();
                let config = config.clone();
                let cache = cache.clone();
                Box::pin(async move {
                    let BooksResponse { books } = client.request("books", config).await?;
                    store_books(&cache, &books);
                    Ok(books)
                })
            },
            self.cache(),
        )
    }

    /// Drops the catalog listing and loads it again.
    ///
    /// # Errors
    ///
    /// Returns the fetch error.
    pub async fn refetch_book_search(&self) -> Result<(), QueryError> {
        let cache = self.cache();
        cache.invalidate_queries("bookSearch");
        self.book_search("").fetch().await.map(|_| ())
    }

    /// The reading list.
    ///
    /// Every embedded book is also stored under its [`book_key`].
    #[must_use]
    pub fn list_items(&self) -> QueryObserver<Vec<ListItem>> {
        let client = self.client.clone();
        let config = self.config();
        let cache = self.cache();

        QueryObserver::new(
            list_items_key(),
            move || {
                let client = client.clone();
                let config = config.clone();
                let cache = cache.clone();
                Box::pin(async move {
                    let ListItemsResponse { list_items } = client.request("list-items", config).await?;
                    store_books(&cache, list_items.iter().map(|item| &item.book));
                    Ok(list_items)
                })
            },
            self.cache(),
        )
    }

    /// The reading-list entry for `book_id`, if the book is on the list.
    ///
    /// # Errors
    ///
    /// Returns the error of loading the reading list.
    pub async fn list_item(&self, book_id: &str) -> Result<Option<ListItem>, QueryError> {
        let items = self.list_items().fetch().await?;
        Ok(items.into_iter().find(|item| item.book_id == book_id))
    }

    /// Edits a reading-list entry.
    ///
    /// The edit is applied to the cached list immediately and rolled back if
    /// the server refuses it.
    #[must_use]
    pub fn update_list_item(&self) -> Mutation<ListItemUpdate, ListItem> {
        let client = self.client.clone();
        let config = self.config();

        Mutation::new(self.cache(), move |update: ListItemUpdate| {
            let client = client.clone();
            let config = config.clone();
            Box::pin(async move {
                let endpoint = format!("list-items/{}", update.id);
                let data = serde_json::to_value(&update)?;
                let ListItemResponse { list_item } = client
                    .request(&endpoint, config.method(Method::Put).data(data))
                    .await?;
                Ok(list_item)
            })
        })
        .optimistic(Speculation::new(
            list_items_key(),
            |items: Option<&Vec<ListItem>>, update: &ListItemUpdate| {
                items.map(|items| {
                    items
                        .iter()
                        .map(|item| {
                            if item.id == update.id {
                                update.apply(item)
                            } else {
                                item.clone()
                            }
                        })
                        .collect()
                })
            },
        ))
    }

    /// Removes a reading-list entry by its id.
    #[must_use]
    pub fn remove_list_item(&self) -> Mutation<String, ()> {
        let client = self.client.clone();
        let config = self.config();

        Mutation::new(self.cache(), move |id: String| {
            let client = client.clone();
            let config = config.clone();
            Box::pin(async move {
                let _: IgnoredAny = client
                    .request(&format!("list-items/{id}"), config.method(Method::Delete))
                    .await?;
                Ok(())
            })
        })
        .invalidates(list_items_key())
    }

    /// Adds a book to the reading list by its id.
    #[must_use]
    pub fn create_list_item(&self) -> Mutation<String, ListItem> {
        let client = self.client.clone();
        let config = self.config();

        Mutation::new(self.cache(), move |book_id: String| {
            let client = client.clone();
            let config = config.clone();
            Box::pin(async move {
                let ListItemResponse { list_item } = client
                    .request("list-items", config.data(json!({ "bookId": book_id })))
                    .await?;
                Ok(list_item)
            })
        })
        .invalidates(list_items_key())
    }
}
