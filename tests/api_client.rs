// Integration tests for ApiClient request building and error handling

use std::sync::Arc;

use bookshelf::auth::memory::InMemoryAuth;
use bookshelf::auth::{AuthProvider, Credentials};
use bookshelf::client::mock::MockTransport;
use bookshelf::client::{ApiClient, ClientConfig, Method, RequestConfig, Response};
use bookshelf::error::QueryError;
use bookshelf::query::{QueryCache, QueryKey, Updater};
use serde_json::{Value, json};

fn client(transport: &MockTransport, auth: Arc<InMemoryAuth>) -> ApiClient {
    ApiClient::new(
        Arc::new(transport.clone()),
        ClientConfig::new("https://bookshelf.test/api"),
        Arc::new(QueryCache::new()),
        auth,
    )
}

#[tokio::test]
async fn test_get_with_token() {
    let transport = MockTransport::new().on(Method::Get, "books", |_| Response::ok(json!({ "books": [] })));
    let client = client(&transport, Arc::new(InMemoryAuth::new()));

    let body: Value = client
        .request("books", RequestConfig::new().token("FAKE_TOKEN"))
        .await
        .expect("request succeeds");
    assert_eq!(body, json!({ "books": [] }));

    let request = transport.last_request().expect("request was sent");
    assert_eq!(request.method, Method::Get);
    assert_eq!(request.url, "https://bookshelf.test/api/books");
    assert_eq!(request.header("Authorization"), Some("Bearer FAKE_TOKEN"));
    assert_eq!(request.header("Content-Type"), Some("application/json"));
    assert_eq!(request.body, None);
}

#[tokio::test]
async fn test_data_makes_a_post() {
    let transport = MockTransport::new().on(Method::Post, "list-items", |req| {
        Response::ok(req.body.clone().unwrap_or_default())
    });
    let client = client(&transport, Arc::new(InMemoryAuth::new()));

    let data = json!({ "bookId": "b-1" });
    let echoed: Value = client
        .request("list-items", RequestConfig::new().data(data.clone()))
        .await
        .expect("request succeeds");
    assert_eq!(echoed, data);
    assert_eq!(transport.last_request().map(|r| r.method), Some(Method::Post));
}

#[tokio::test]
async fn test_error_body_is_propagated() {
    let transport = MockTransport::new().on(Method::Get, "books/*", |_| {
        Response::new(400, json!({ "message": "THIS IS AN ERROR" }))
    });
    let client = client(&transport, Arc::new(InMemoryAuth::new()));

    let err = client
        .request::<Value>("books/1", RequestConfig::new())
        .await
        .expect_err("bad request");
    assert_eq!(
        err,
        QueryError::Remote {
            status: 400,
            message: "THIS IS AN ERROR".to_string(),
            body: json!({ "message": "THIS IS AN ERROR" }),
        }
    );
}

#[tokio::test]
async fn test_unauthorized_clears_cache_and_logs_out() {
    let transport = MockTransport::new().on(Method::Get, "me", |_| Response::new(401, json!({})));
    let auth = Arc::new(InMemoryAuth::new());
    auth.register(Credentials::new("jo", "pw"))
        .await
        .expect("registration succeeds");
    let client = client(&transport, auth.clone());
    client
        .cache()
        .write(&QueryKey::new("list-items"), Updater::Value(vec![1, 2, 3]));

    let err = client
        .request::<Value>("me", RequestConfig::new().token("stale"))
        .await
        .expect_err("session rejected");

    assert_eq!(err, QueryError::Unauthorized);
    assert_eq!(err.to_string(), "Please re-authenticate.");
    assert!(client.cache().is_empty());
    assert_eq!(auth.get_token().await, Ok(None));
}

#[tokio::test]
async fn test_undecodable_body() {
    let transport = MockTransport::new().on(Method::Get, "books", |_| Response::ok(json!("not a list")));
    let client = client(&transport, Arc::new(InMemoryAuth::new()));

    let err = client
        .request::<Vec<String>>("books", RequestConfig::new())
        .await
        .expect_err("wrong shape");
    assert!(matches!(err, QueryError::Decode(_)));
}

#[tokio::test]
async fn test_network_failure() {
    let transport = MockTransport::new();
    transport.disconnect("connection refused");
    let client = client(&transport, Arc::new(InMemoryAuth::new()));

    let err = client
        .request::<Value>("books", RequestConfig::new())
        .await
        .expect_err("offline");
    assert_eq!(err, QueryError::Network("connection refused".to_string()));
}
