use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use gateway_api::auth::{auth_middleware, require_admin};
use gateway_api::chat::chat_handler;
use gateway_api::chat_stream::chat_stream_handler;
use gateway_api::config::{AppConfig, ProviderMode};
use gateway_api::quota::quota_middleware;
use gateway_api::rate_limiting::rate_limit_middleware;
use gateway_api::state::AppState;
use gateway_core::health::HealthTracker;
use gateway_core::keyhash::hash_key;
use gateway_core::models::{ApiKey, Tier};
use gateway_core::provider::Provider;
use gateway_providers::MockProvider;
use gateway_store::{InMemoryCache, SqliteStore, Store};

pub const TENANT_KEY: &str = "sk-gw-test-tenant-key";

/// Builds a fully wired router over an in-memory store/cache with one
/// pre-seeded `free`-tier tenant and API key, for scenario tests to drive
/// with `tower::ServiceExt::oneshot`.
pub async fn build_app(primary_fail_rate: f64, fallback_fail_rate: f64) -> Router {
    let mut config = AppConfig::from_env();
    config.database_url = ":memory:".to_string();
    config.provider_mode = ProviderMode::Mock;
    config.primary_fail_rate = primary_fail_rate;
    config.fallback_fail_rate = fallback_fail_rate;
    config.requests_per_minute = 1000;
    config.tokens_per_minute = 100_000;
    let config = Arc::new(config);

    let store = Arc::new(SqliteStore::open_in_memory().expect("open in-memory store"));
    let tenant = store.create_tenant("acme", Tier::Free).await.expect("create tenant");
    let salt = config.admin_api_key.clone();
    let hash = hash_key(TENANT_KEY, &salt);
    let key = ApiKey::new(tenant.id, "default", hash, None);
    store.create_key(&key).await.expect("create key");

    let cache = Arc::new(InMemoryCache::new());
    let health = Arc::new(HealthTracker::new(config.health_window_size, config.health_min_samples));

    let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
    providers.insert("primary".to_string(), Arc::new(MockProvider::new("primary", 1, primary_fail_rate)));
    providers.insert("fallback".to_string(), Arc::new(MockProvider::new("fallback", 1, fallback_fail_rate)));

    let state = Arc::new(AppState::new(store as Arc<dyn Store>, cache, health, providers, config));

    let chat_routes = Router::new()
        .route("/v1/chat", post(chat_handler))
        .route("/v1/chat/stream", post(chat_stream_handler))
        .layer(middleware::from_fn_with_state(state.clone(), quota_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/v1/admin/tenants", post(gateway_api::admin::create_tenant).get(gateway_api::admin::list_tenants))
        .layer(middleware::from_fn(require_admin))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(chat_routes)
        .merge(admin_routes)
        .with_state(state)
}
