//! HTTP tests of the administrative API against a live listener.

#![allow(clippy::panic)]

mod common;

use std::net::SocketAddr;

use reqwest::StatusCode;
use serde_json::{Value, json};

use busnotify::api;
use busnotify::app_state::AppState;

use common::Harness;

struct Server {
    harness: Harness,
    base: String,
    http: reqwest::Client,
}

impl Server {
    async fn start() -> Self {
        let harness = Harness::start().await;
        let app = api::app(
            AppState::new(harness.service.clone()),
            std::time::Duration::from_secs(10),
        );
        let Ok(listener) = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await
        else {
            panic!("bind failed");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("no local address");
        };
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            harness,
            base: format!("http://{addr}"),
            http: reqwest::Client::new(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> (StatusCode, Value) {
        let Ok(response) = request.send().await else {
            panic!("request failed");
        };
        let status = response.status();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.send(self.http.get(format!("{}{path}", self.base))).await
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(self.http.post(format!("{}{path}", self.base)).json(&body))
            .await
    }

    async fn put(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(self.http.put(format!("{}{path}", self.base)).json(&body))
            .await
    }

    async fn delete(&self, path: &str) -> StatusCode {
        self.send(self.http.delete(format!("{}{path}", self.base)))
            .await
            .0
    }
}

fn important() -> Value {
    json!({
        "exchange": "notifications",
        "key": "important",
        "exchange_type": "direct",
        "durable": true,
        "description": "Important things"
    })
}

fn id_of(body: &Value) -> String {
    let Some(id) = body.get("id").and_then(Value::as_str) else {
        panic!("response has no id: {body}");
    };
    id.to_string()
}

#[tokio::test]
async fn health_reports_healthy() {
    let server = Server::start().await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.get("status"), Some(&json!("healthy")));
    server.harness.stop().await;
}

#[tokio::test]
async fn duplicate_filter_returns_existing_id() {
    let server = Server::start().await;
    let (status, first) = server.post("/api/v1/filters", important()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first.get("created"), Some(&json!(true)));

    let (status, second) = server.post("/api/v1/filters", important()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second.get("created"), Some(&json!(false)));
    assert_eq!(id_of(&first), id_of(&second));

    let (_, list) = server.get("/api/v1/filters").await;
    assert_eq!(list.pointer("/pagination/total"), Some(&json!(1)));
    server.harness.stop().await;
}

#[tokio::test]
async fn batch_filter_create_returns_array() {
    let server = Server::start().await;
    let (status, body) = server
        .post(
            "/api/v1/filters",
            json!([
                important(),
                {"exchange": "broadcast", "exchange_type": "fanout", "durable": false}
            ]),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body.as_array().map(Vec::len), Some(2));
    server.harness.stop().await;
}

#[tokio::test]
async fn invalid_filter_is_unprocessable() {
    let server = Server::start().await;
    let (status, body) = server
        .post(
            "/api/v1/filters",
            json!({"exchange": "", "key": "k", "exchange_type": "direct", "durable": true}),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body.pointer("/error/code"), Some(&json!(1002)));
    server.harness.stop().await;
}

#[tokio::test]
async fn missing_entities_are_not_found() {
    let server = Server::start().await;
    let id = uuid::Uuid::new_v4();
    for path in [
        format!("/api/v1/filters/{id}"),
        format!("/api/v1/users/{id}"),
        format!("/api/v1/subscriptions/{id}"),
        format!("/api/v1/templates/{id}"),
        format!("/api/v1/filters/{id}/users"),
    ] {
        let (status, body) = server.get(&path).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{path}");
        assert_eq!(body.pointer("/error/code"), Some(&json!(2001)));
    }
    assert_eq!(
        server.delete(&format!("/api/v1/users/{id}")).await,
        StatusCode::NOT_FOUND
    );
    server.harness.stop().await;
}

#[tokio::test]
async fn subscribe_then_publish_delivers_notification() {
    let server = Server::start().await;
    let (_, created) = server.post("/api/v1/filters", important()).await;
    let filter_id = id_of(&created);

    let (status, template) = server
        .post(
            &format!("/api/v1/filters/{filter_id}/template"),
            json!({"name": "alert", "text": "{{ filter.description }}: {{ body }}"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, attached) = server
        .get(&format!("/api/v1/filters/{filter_id}/template"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(attached, template);

    let (status, detail) = server
        .post(
            &format!("/api/v1/filters/{filter_id}/users"),
            json!({"name": "Demo", "email": "demo@example.com"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(detail.pointer("/user/email"), Some(&json!("demo@example.com")));

    let Ok(filter_id) = filter_id.parse::<uuid::Uuid>() else {
        panic!("filter id is not a uuid");
    };
    server
        .harness
        .listening(busnotify::domain::FilterId::from(filter_id), 1)
        .await;

    let (_, consumers) = server.get("/api/v1/consumers").await;
    assert_eq!(consumers.as_array().map(Vec::len), Some(1));
    assert_eq!(consumers.pointer("/0/state"), Some(&json!("listening")));

    let (status, published) = server
        .post(
            "/api/v1/bus/publish",
            json!({"exchange": "notifications", "routing_key": "important", "body": "X"}),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(published.get("queued"), Some(&json!(1)));

    let deliveries = server.harness.settle(1).await;
    let Some(delivery) = deliveries.first() else {
        panic!("one delivery");
    };
    assert_eq!(delivery.recipient, "demo@example.com");
    assert_eq!(delivery.body, "Important things: X");
    server.harness.stop().await;
}

#[tokio::test]
async fn publish_to_undeclared_exchange_is_not_found() {
    let server = Server::start().await;
    let (status, body) = server
        .post(
            "/api/v1/bus/publish",
            json!({"exchange": "nowhere", "routing_key": "k", "body": "x"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body.pointer("/error/code"), Some(&json!(2003)));
    server.harness.stop().await;
}

#[tokio::test]
async fn user_crud_round_trip() {
    let server = Server::start().await;
    let (status, user) = server
        .post("/api/v1/users", json!({"name": "Ada", "email": "ada@example.com"}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = id_of(&user);

    let (status, updated) = server
        .put(
            &format!("/api/v1/users/{id}"),
            json!({"name": "Ada L.", "email": "ada@example.com"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated.get("name"), Some(&json!("Ada L.")));

    let (status, filters) = server.get(&format!("/api/v1/users/{id}/filters")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(filters, json!([]));

    assert_eq!(
        server.delete(&format!("/api/v1/users/{id}")).await,
        StatusCode::NO_CONTENT
    );
    let (status, _) = server.get(&format!("/api/v1/users/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    server.harness.stop().await;
}

#[tokio::test]
async fn subscription_with_unknown_user_is_not_found() {
    let server = Server::start().await;
    let (_, created) = server.post("/api/v1/filters", important()).await;
    let (status, _) = server
        .post(
            "/api/v1/subscriptions",
            json!({"user_id": uuid::Uuid::new_v4(), "filter_id": id_of(&created)}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    server.harness.stop().await;
}

#[tokio::test]
async fn list_endpoints_paginate() {
    let server = Server::start().await;
    for i in 0..3 {
        server
            .post(
                "/api/v1/templates",
                json!({"name": format!("t{i}"), "text": "{{ body }}"}),
            )
            .await;
    }
    let (status, page) = server.get("/api/v1/templates?page=2&per_page=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page.get("data").and_then(Value::as_array).map(Vec::len), Some(1));
    assert_eq!(page.pointer("/pagination/total_pages"), Some(&json!(2)));
    server.harness.stop().await;
}
