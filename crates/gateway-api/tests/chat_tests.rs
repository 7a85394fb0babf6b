mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{build_app, TENANT_KEY};
use serde_json::{json, Value};
use tower::ServiceExt;

fn chat_request(content: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat")
        .header("authorization", format!("Bearer {TENANT_KEY}"))
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "model": "mock-1",
                "messages": [{"role": "user", "content": content}],
            })
            .to_string(),
        ))
        .unwrap()
}

#[tokio::test]
async fn rejects_missing_api_key() {
    let app = build_app(0.0, 0.0).await;
    let req = Request::builder()
        .method("POST")
        .uri("/v1/chat")
        .header("content-type", "application/json")
        .body(Body::from(json!({"model": "mock-1", "messages": [{"role": "user", "content": "hi"}]}).to_string()))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn s3_identical_cacheable_request_is_served_from_cache_on_second_call() {
    let app = build_app(0.0, 0.0).await;

    let first = app.clone().oneshot(chat_request("hello there")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers().get("x-cache").unwrap(), "miss");

    let second = app.clone().oneshot(chat_request("hello there")).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers().get("x-cache").unwrap(), "hit");

    let body = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert!(value["content"].is_string());
}

#[tokio::test]
async fn falls_back_to_second_provider_when_primary_errors() {
    let app = build_app(1.0, 0.0).await;
    let response = app.oneshot(chat_request("route me")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-provider").unwrap(), "fallback");
}

#[tokio::test]
async fn returns_bad_gateway_when_every_provider_fails() {
    let app = build_app(1.0, 1.0).await;
    let response = app.oneshot(chat_request("doomed")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn rejects_empty_message_content() {
    let app = build_app(0.0, 0.0).await;
    let req = Request::builder()
        .method("POST")
        .uri("/v1/chat")
        .header("authorization", format!("Bearer {TENANT_KEY}"))
        .header("content-type", "application/json")
        .body(Body::from(json!({"model": "mock-1", "messages": [{"role": "user", "content": "  "}]}).to_string()))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
