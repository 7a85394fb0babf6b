mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{build_app, TENANT_KEY};
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn streams_sse_chunks_terminated_by_done() {
    let app = build_app(0.0, 0.0).await;
    let req = Request::builder()
        .method("POST")
        .uri("/v1/chat/stream")
        .header("authorization", format!("Bearer {TENANT_KEY}"))
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"model": "mock-1", "messages": [{"role": "user", "content": "stream this"}]}).to_string(),
        ))
        .unwrap();

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-cache").unwrap(), "bypass");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert!(text.contains("\"done\":true"));
    assert!(text.trim_end().ends_with("data: [DONE]"));
}
