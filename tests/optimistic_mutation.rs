// Integration tests for optimistic mutations against the reading list

use std::sync::Arc;

use bookshelf::auth::memory::InMemoryAuth;
use bookshelf::books::{Bookshelf, ListItem, ListItemUpdate, list_items_key};
use bookshelf::client::mock::MockTransport;
use bookshelf::client::{ApiClient, ClientConfig, Method, Response};
use bookshelf::error::QueryError;
use bookshelf::operation::Status;
use bookshelf::query::{QueryCache, Updater};
use serde_json::json;

fn list_item(id: &str, notes: &str) -> ListItem {
    serde_json::from_value(json!({
        "id": id,
        "bookId": format!("book-{id}"),
        "ownerId": "u-1",
        "notes": notes,
        "startedDate": 0,
        "finishedDate": null,
        "book": { "id": format!("book-{id}"), "title": "Dune", "author": "Frank Herbert" }
    }))
    .expect("valid list item")
}

fn shelf(transport: MockTransport) -> Bookshelf {
    let client = ApiClient::new(
        Arc::new(transport),
        ClientConfig::default(),
        Arc::new(QueryCache::new()),
        Arc::new(InMemoryAuth::new()),
    );
    Bookshelf::new(client, Some("tok".to_string()))
}

fn notes(shelf: &Bookshelf) -> Option<Vec<String>> {
    shelf
        .client()
        .cache()
        .read::<Vec<ListItem>>(&list_items_key())
        .map(|items| items.into_iter().map(|i| i.notes).collect())
}

#[tokio::test]
async fn test_edit_is_visible_before_the_server_answers_and_reverted_on_failure() {
    let transport = MockTransport::new().on(Method::Put, "list-items/*", |_| {
        Response::new(500, json!({ "message": "database is down" }))
    });
    let shelf = shelf(transport);
    shelf
        .client()
        .cache()
        .write(&list_items_key(), Updater::Value(vec![list_item("1", "a")]));

    let update = shelf.update_list_item();
    let pending = update.mutate(ListItemUpdate::new("1").notes("b"));

    assert_eq!(notes(&shelf), Some(vec!["b".to_string()]));
    assert_eq!(update.status(), Status::Pending);

    // The request goes out only when the mutation is awaited.
    let err = pending.await.expect_err("server refuses the edit");
    assert_eq!(err.status(), Some(500));
    assert_eq!(err.to_string(), "Request failed with status 500: database is down");

    assert_eq!(notes(&shelf), Some(vec!["a".to_string()]));
    assert_eq!(update.status(), Status::Rejected);
}

#[tokio::test]
async fn test_accepted_edit_is_kept() {
    let transport = MockTransport::new().on(Method::Put, "list-items/*", |req| {
        let body = req.body.clone().unwrap_or_default();
        Response::ok(json!({ "listItem": {
            "id": body["id"], "bookId": "book-1", "ownerId": "u-1",
            "notes": body["notes"], "startedDate": 0, "finishedDate": null,
            "book": { "id": "book-1", "title": "Dune", "author": "Frank Herbert" }
        } }))
    });
    let shelf = shelf(transport.clone());
    shelf.client().cache().write(
        &list_items_key(),
        Updater::Value(vec![list_item("1", "a"), list_item("2", "x")]),
    );

    let saved = shelf
        .update_list_item()
        .mutate(ListItemUpdate::new("1").notes("b"))
        .await
        .expect("server accepts the edit");
    assert_eq!(saved.notes, "b");
    assert_eq!(notes(&shelf), Some(vec!["b".to_string(), "x".to_string()]));

    let request = transport.last_request().expect("request was sent");
    assert_eq!(request.method, Method::Put);
    assert_eq!(request.endpoint, "list-items/1");
    assert_eq!(request.body, Some(json!({ "id": "1", "notes": "b" })));
}

#[tokio::test]
async fn test_rejected_session_leaves_cache_empty() {
    let transport = MockTransport::new().on(Method::Put, "list-items/*", |_| Response::new(401, json!({})));
    let shelf = shelf(transport);
    shelf.client().cache().write(
        &list_items_key(),
        Updater::Value(vec![list_item("1", "private notes")]),
    );

    let err = shelf
        .update_list_item()
        .mutate(ListItemUpdate::new("1").notes("edited"))
        .await
        .expect_err("session is rejected");

    assert_eq!(err, QueryError::Unauthorized);
    assert!(shelf.client().cache().is_empty());
    assert_eq!(notes(&shelf), None);
}
