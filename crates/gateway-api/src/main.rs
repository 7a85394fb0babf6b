//! `llm-gateway` binary entry point: wires storage, providers, and the
//! middleware pipeline into an axum [`Router`] and serves it.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use gateway_core::health::HealthTracker;
use gateway_core::keyhash::hash_key;
use gateway_core::models::{ApiKey, Tenant, Tier, ADMIN_TENANT_NAME};
use gateway_core::provider::Provider;
use gateway_core::reliability::{CircuitBreaker, ResilientProvider, RetryConfig};
use gateway_providers::{MockProvider, OllamaProvider};
use gateway_store::{Cache, InMemoryCache, RedisCache, SqliteStore, Store};
use tracing_subscriber::EnvFilter;

use gateway_api::admin;
use gateway_api::auth::{auth_middleware, require_admin};
use gateway_api::chat::chat_handler;
use gateway_api::chat_stream::chat_stream_handler;
use gateway_api::config::{AppConfig, ProviderMode};
use gateway_api::metrics::{metrics_handler, track_metrics};
use gateway_api::quota::quota_middleware;
use gateway_api::rate_limiting::rate_limit_middleware;
use gateway_api::request_log::request_log_middleware;
use gateway_api::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(AppConfig::from_env());

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(&config.database_url).expect("failed to open gateway database"),
    );

    let cache: Arc<dyn Cache> = match &config.redis_url {
        Some(url) => {
            tracing::info!("using Redis-backed cache at {}", url);
            Arc::new(RedisCache::connect(url).await.expect("failed to connect to Redis"))
        }
        None => {
            tracing::info!("using in-process cache (single-process deployment only)");
            Arc::new(InMemoryCache::new())
        }
    };

    let health = Arc::new(HealthTracker::new(config.health_window_size, config.health_min_samples));

    let providers = build_providers(&config);

    bootstrap_admin(store.as_ref(), &config.admin_api_key).await;

    let state = Arc::new(AppState::new(store, cache, health, providers, config.clone()));

    let chat_routes = Router::new()
        .route("/v1/chat", post(chat_handler))
        .route("/v1/chat/stream", post(chat_stream_handler))
        .layer(middleware::from_fn_with_state(state.clone(), quota_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/v1/admin/tenants", post(admin::create_tenant).get(admin::list_tenants))
        .route("/v1/admin/tenants/{name}/keys", post(admin::create_key).get(admin::list_keys))
        .route("/v1/admin/tenants/{name}/keys/revoke", post(admin::revoke_by_name))
        .route("/v1/admin/keys/revoke", post(admin::revoke_by_plaintext))
        .route("/v1/admin/keys/rotate", post(admin::rotate_admin_key))
        .route("/v1/admin/limits", post(admin::set_limits))
        .route("/v1/admin/health/reset", post(admin::reset_health))
        .route("/v1/admin/pricing", post(admin::set_pricing))
        .route("/v1/admin/usage/{name}", get(admin::usage_summary))
        .layer(middleware::from_fn(require_admin))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .merge(chat_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn(track_metrics))
        .layer(middleware::from_fn(request_log_middleware))
        .with_state(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("llm-gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind port");
    axum::serve(listener, app).await.expect("server error");
}

async fn health_check() -> &'static str {
    "ok"
}

fn build_providers(config: &AppConfig) -> HashMap<String, Arc<dyn Provider>> {
    let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();

    let primary: Arc<dyn Provider> = match config.provider_mode {
        ProviderMode::Ollama => Arc::new(ResilientProvider::new(
            OllamaProvider::new("primary", &config.ollama_url, &config.ollama_model, 30),
            RetryConfig::default(),
            CircuitBreaker::new(5, 30),
        )),
        ProviderMode::Mock => Arc::new(ResilientProvider::new(
            MockProvider::new("primary", 50, config.primary_fail_rate),
            RetryConfig::default(),
            CircuitBreaker::new(5, 30),
        )),
    };

    // The fallback slot is always the in-process mock: an Ollama deployment
    // has exactly one real upstream, so the fallback exists to keep routing
    // available when that upstream is unhealthy, not to shadow it with a
    // second real backend.
    let fallback: Arc<dyn Provider> = Arc::new(ResilientProvider::new(
        MockProvider::new("fallback", 50, config.fallback_fail_rate),
        RetryConfig::default(),
        CircuitBreaker::new(5, 30),
    ));

    providers.insert("primary".to_string(), primary);
    providers.insert("fallback".to_string(), fallback);
    providers
}

/// Ensures the distinguished admin tenant exists and, if `ADMIN_API_KEY`
/// doesn't already resolve to an active key, mints one so the configured
/// secret authenticates admin routes on first boot.
async fn bootstrap_admin(store: &dyn Store, admin_api_key: &str) {
    let tenant = match store.get_tenant_by_name(ADMIN_TENANT_NAME).await.expect("store query failed") {
        Some(tenant) => tenant,
        None => store
            .create_tenant(ADMIN_TENANT_NAME, Tier::Pro)
            .await
            .unwrap_or_else(|_| Tenant::new(ADMIN_TENANT_NAME, Tier::Pro)),
    };

    let hash = hash_key(admin_api_key, admin_api_key);
    if store.get_key_by_hash(&hash).await.expect("store query failed").is_none() {
        let key = ApiKey::new(tenant.id, "bootstrap", hash, None);
        let _ = store.create_key(&key).await;
        tracing::info!("minted bootstrap admin key from ADMIN_API_KEY");
    }
}
