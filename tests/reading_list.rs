// End-to-end test of the reading list against an in-process fake server

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bookshelf::auth::memory::InMemoryAuth;
use bookshelf::auth::{Credentials, Session};
use bookshelf::books::{Bookshelf, ListItem, ListItemUpdate, list_items_key};
use bookshelf::client::mock::MockTransport;
use bookshelf::client::{ApiClient, ClientConfig, Method, Request, Response};
use bookshelf::query::{QueryCache, QueryResult};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::{Value, json};
use tokio::time::{Duration, timeout};

const BOOK_ID: &str = "B1";

fn catalog_book() -> Value {
    json!({
        "id": BOOK_ID,
        "title": "The Left Hand of Darkness",
        "author": "Ursula K. Le Guin",
        "publisher": "Ace",
        "synopsis": "An envoy visits Gethen.",
        "coverImageUrl": "https://covers.test/B1.jpg",
        "pageCount": 304
    })
}

/// A tiny reading-list server keeping its items in memory.
fn server() -> MockTransport {
    let items: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let next_id = Arc::new(AtomicU64::new(1));

    let authorized = |req: &Request| req.header("authorization").is_some();

    let list = items.clone();
    let create = items.clone();
    let update = items.clone();
    let remove = items;

    MockTransport::new()
        .on(Method::Get, "me", |_| Response::new(401, json!({})))
        .on(Method::Get, "books", move |req| {
            if !authorized(req) {
                return Response::new(401, json!({}));
            }
            Response::ok(json!({ "books": [catalog_book()] }))
        })
        .on(Method::Get, "list-items", move |req| {
            if !authorized(req) {
                return Response::new(401, json!({}));
            }
            let items = list.lock().expect("not poisoned").clone();
            Response::ok(json!({ "listItems": items }))
        })
        .on(Method::Post, "list-items", move |req| {
            let book_id = req.body.as_ref().map(|b| b["bookId"].clone()).unwrap_or_default();
            let id = format!("LI{}", next_id.fetch_add(1, Ordering::SeqCst));
            let item = json!({
                "id": id,
                "bookId": book_id,
                "ownerId": "U1",
                "notes": "",
                "rating": -1,
                "startedDate": 1_000,
                "finishedDate": null,
                "book": catalog_book(),
            });
            create.lock().expect("not poisoned").push(item.clone());
            Response::ok(json!({ "listItem": item }))
        })
        .on(Method::Put, "list-items/*", move |req| {
            let id = req.endpoint.rsplit('/').next().unwrap_or_default().to_string();
            let patch = req.body.clone().unwrap_or_default();
            let mut items = update.lock().expect("not poisoned");
            let Some(item) = items.iter_mut().find(|i| i["id"] == id.as_str()) else {
                return Response::new(404, json!({ "message": "No list item" }));
            };
            if let (Some(item), Some(patch)) = (item.as_object_mut(), patch.as_object()) {
                for (k, v) in patch {
                    item.insert(k.clone(), v.clone());
                }
            }
            Response::ok(json!({ "listItem": item.clone() }))
        })
        .on(Method::Delete, "list-items/*", move |req| {
            let id = req.endpoint.rsplit('/').next().unwrap_or_default().to_string();
            remove.lock().expect("not poisoned").retain(|i| i["id"] != id.as_str());
            Response::ok(json!({ "success": true }))
        })
}

async fn next<T>(stream: &mut BoxStream<'static, QueryResult<T>>) -> QueryResult<T> {
    timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("emits within timeout")
        .expect("stream continues")
}

fn cached_items(shelf: &Bookshelf) -> Vec<ListItem> {
    shelf
        .client()
        .cache()
        .read::<Vec<ListItem>>(&list_items_key())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_read_a_book_and_take_it_off_the_list() {
    let client = ApiClient::new(
        Arc::new(server()),
        ClientConfig::default(),
        Arc::new(QueryCache::new()),
        Arc::new(InMemoryAuth::new()),
    );
    let session = Session::new(client);

    assert_eq!(session.bootstrap().await, Ok(None));
    session
        .register(Credentials::new("reader", "secret"))
        .await
        .expect("registration succeeds");
    let shelf = Bookshelf::for_session(&session);

    // Discover and add the book.
    let books = shelf.book_search("").fetch().await.expect("catalog loads");
    assert_eq!(books[0].id, BOOK_ID);
    assert!(shelf.list_items().fetch().await.expect("list loads").is_empty());

    let created = shelf
        .create_list_item()
        .mutate(BOOK_ID.to_string())
        .await
        .expect("book added");
    let item = shelf
        .list_item(BOOK_ID)
        .await
        .expect("list loads")
        .expect("book is on the list");
    assert_eq!(item.id, created.id);
    assert!(!item.is_finished());

    // Mark it read; the cached list shows it at once.
    let mark_read = shelf.update_list_item();
    let pending = mark_read.mutate(ListItemUpdate::new(&item.id).finished_at(2_000));
    assert_eq!(cached_items(&shelf)[0].finished_date, Some(2_000));
    pending.await.expect("server accepts");

    let item = shelf
        .list_item(BOOK_ID)
        .await
        .expect("list loads")
        .expect("book is still on the list");
    assert_eq!(item.finished_date, Some(2_000));
    assert_eq!(item.rating, -1);

    let rated = shelf
        .update_list_item()
        .mutate(ListItemUpdate::new(&item.id).rating(5))
        .await
        .expect("server accepts");
    assert_eq!(rated.rating, 5);

    // Take it off the list.
    shelf
        .remove_list_item()
        .mutate(item.id.clone())
        .await
        .expect("book removed");
    let items = shelf.list_items().fetch().await.expect("list loads");
    assert!(items.iter().all(|i| i.id != item.id));
    assert!(cached_items(&shelf).iter().all(|i| i.id != item.id));

    session.logout().await.expect("logout succeeds");
    assert!(shelf.client().cache().is_empty());
}

#[tokio::test]
async fn test_observer_follows_mutations() {
    let client = ApiClient::new(
        Arc::new(server()),
        ClientConfig::default(),
        Arc::new(QueryCache::new()),
        Arc::new(InMemoryAuth::new()),
    );
    let session = Session::new(client);
    session
        .register(Credentials::new("reader", "secret"))
        .await
        .expect("registration succeeds");
    let shelf = Bookshelf::for_session(&session);

    let mut results = shelf.list_items().stream();

    assert!(next(&mut results).await.is_loading());
    assert_eq!(next(&mut results).await.data().map(Vec::len), Some(0));

    shelf
        .create_list_item()
        .mutate(BOOK_ID.to_string())
        .await
        .expect("book added");

    // The list is marked stale and refetched in the background.
    assert_eq!(next(&mut results).await.data().map(Vec::len), Some(1));
}
