use axum::body::Body;
use axum::http::{Request, StatusCode};
use gateway_api::admin;
use gateway_api::auth::{auth_middleware, require_admin};
use gateway_api::config::AppConfig;
use gateway_api::state::AppState;
use gateway_core::health::HealthTracker;
use gateway_core::keyhash::hash_key;
use gateway_core::models::{ApiKey, Tier, ADMIN_TENANT_NAME};
use gateway_core::provider::Provider;
use gateway_store::{InMemoryCache, SqliteStore, Store};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

const ADMIN_KEY: &str = "sk-gw-test-admin-key";

async fn build_admin_app() -> axum::Router {
    let config = Arc::new(AppConfig::from_env());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let tenant = store.create_tenant(ADMIN_TENANT_NAME, Tier::Pro).await.unwrap();
    let hash = hash_key(ADMIN_KEY, &config.admin_api_key);
    store.create_key(&ApiKey::new(tenant.id, "bootstrap", hash, None)).await.unwrap();

    let cache = Arc::new(InMemoryCache::new());
    let health = Arc::new(HealthTracker::new(config.health_window_size, config.health_min_samples));
    let providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
    let state = Arc::new(AppState::new(store as Arc<dyn Store>, cache, health, providers, config));

    axum::Router::new()
        .route("/v1/admin/tenants", axum::routing::post(admin::create_tenant).get(admin::list_tenants))
        .layer(axum::middleware::from_fn(require_admin))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

fn create_tenant_request(name: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/admin/tenants")
        .header("authorization", format!("Bearer {ADMIN_KEY}"))
        .header("content-type", "application/json")
        .body(Body::from(json!({"name": name}).to_string()))
        .unwrap()
}

#[tokio::test]
async fn creates_tenant_and_rejects_duplicate_name() {
    let app = build_admin_app().await;

    let first = app.clone().oneshot(create_tenant_request("widgets")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.oneshot(create_tenant_request("widgets")).await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn non_admin_tenant_is_forbidden_from_admin_routes() {
    let config = Arc::new(AppConfig::from_env());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let tenant = store.create_tenant("regular", Tier::Free).await.unwrap();
    let hash = hash_key("sk-gw-regular", &config.admin_api_key);
    store.create_key(&ApiKey::new(tenant.id, "default", hash, None)).await.unwrap();

    let cache = Arc::new(InMemoryCache::new());
    let health = Arc::new(HealthTracker::new(config.health_window_size, config.health_min_samples));
    let providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
    let state = Arc::new(AppState::new(store as Arc<dyn Store>, cache, health, providers, config));

    let app = axum::Router::new()
        .route("/v1/admin/tenants", axum::routing::post(admin::create_tenant).get(admin::list_tenants))
        .layer(axum::middleware::from_fn(require_admin))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state);

    let req = Request::builder()
        .method("POST")
        .uri("/v1/admin/tenants")
        .header("authorization", "Bearer sk-gw-regular")
        .header("content-type", "application/json")
        .body(Body::from(json!({"name": "sneaky"}).to_string()))
        .unwrap();

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
