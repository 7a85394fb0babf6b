mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::TENANT_KEY;
use gateway_api::auth::auth_middleware;
use gateway_api::chat::chat_handler;
use gateway_api::config::{AppConfig, ProviderMode};
use gateway_api::rate_limiting::rate_limit_middleware;
use gateway_api::state::AppState;
use gateway_core::health::HealthTracker;
use gateway_core::keyhash::hash_key;
use gateway_core::models::{ApiKey, Tier};
use gateway_core::provider::Provider;
use gateway_providers::MockProvider;
use gateway_store::{InMemoryCache, SqliteStore, Store};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

async fn build_app_with_low_limits(requests_per_minute: i64) -> axum::Router {
    let mut config = AppConfig::from_env();
    config.provider_mode = ProviderMode::Mock;
    config.requests_per_minute = requests_per_minute;
    config.tokens_per_minute = 100_000;
    let config = Arc::new(config);

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let tenant = store.create_tenant("acme", Tier::Free).await.unwrap();
    let hash = hash_key(TENANT_KEY, &config.admin_api_key);
    store.create_key(&ApiKey::new(tenant.id, "default", hash, None)).await.unwrap();

    let cache = Arc::new(InMemoryCache::new());
    let health = Arc::new(HealthTracker::new(config.health_window_size, config.health_min_samples));
    let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
    providers.insert("primary".to_string(), Arc::new(MockProvider::new("primary", 1, 0.0)));
    providers.insert("fallback".to_string(), Arc::new(MockProvider::new("fallback", 1, 0.0)));

    let state = Arc::new(AppState::new(store as Arc<dyn Store>, cache, health, providers, config));

    axum::Router::new()
        .route("/v1/chat", axum::routing::post(chat_handler))
        .layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

fn chat_request(content: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat")
        .header("authorization", format!("Bearer {TENANT_KEY}"))
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"model": "mock-1", "messages": [{"role": "user", "content": content}]}).to_string(),
        ))
        .unwrap()
}

#[tokio::test]
async fn s4_exceeding_requests_per_minute_returns_429_with_retry_after() {
    let app = build_app_with_low_limits(1).await;

    let first = app.clone().oneshot(chat_request("one")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.oneshot(chat_request("two")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("retry-after"));
}
