//! Single-shot chat orchestrator (C12): assembles routing, caching,
//! provider dispatch with fallback, accounting, and metrics on the hot
//! path for `POST /v1/chat`.

use std::sync::Arc;

use axum::{
    extract::{Extension, State},
    http::HeaderValue,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use gateway_core::fingerprint::{cache_key, fingerprint};
use gateway_core::models::{RequestRecord, RequestStatus, UsageEvent};
use gateway_core::routing::{self, PRIMARY_PROVIDER};
use gateway_core::schemas::{CacheEntry, ChatRequest, ChatResponse};
use gateway_core::GatewayError;

use crate::auth::ResolvedTenant;
use crate::config::ProviderMode;
use crate::error_response::{provider_error_to_gateway, ApiError};
use crate::metrics::{COST_TOTAL, FALLBACK_TOTAL, TENANT_COST_TOTAL, TENANT_REQUESTS_TOTAL, TENANT_TOKENS_TOTAL, TOKENS_TOTAL};
use crate::state::AppState;

pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Extension(resolved): Extension<ResolvedTenant>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    request.validate()?;
    let tenant = resolved.tenant;
    let started = std::time::Instant::now();

    let decision = routing::choose(tenant.tier, &state.health, state.config.health_error_threshold);

    let model_name = if decision.provider == PRIMARY_PROVIDER && state.config.provider_mode == ProviderMode::Ollama {
        state.config.ollama_model.clone()
    } else {
        decision.model.clone()
    };

    let cacheable = request.is_cacheable();
    let fp = cacheable.then(|| fingerprint(&request));
    let tenant_id_str = tenant.id.to_string();
    let cache_lookup_key = fp.as_ref().map(|fp| cache_key(&tenant_id_str, fp));

    let mut record = RequestRecord::new(
        tenant.id,
        model_name.clone(),
        serde_json::to_string(&request).unwrap_or_default(),
    );

    if let Some(key) = &cache_lookup_key {
        if let Ok(Some(entry)) = state.cache.get_entry(key).await {
            record.status = RequestStatus::Completed;
            record.response_payload = Some(entry.response.clone());
            record.latency_ms = Some(started.elapsed().as_millis() as i64);
            record.prompt_tokens = Some(entry.prompt_tokens);
            record.completion_tokens = Some(entry.completion_tokens);
            record.total_tokens = Some(entry.total_tokens);
            record.cost_usd = Some(entry.cost_usd);
            record.completed_at = Some(Utc::now());
            let _ = state.store.insert_request(&record).await;

            let usage = UsageEvent::new(tenant.id, record.id, &model_name, entry.total_tokens, entry.cost_usd);
            state.store.insert_usage_event(&usage).await?;

            TOKENS_TOTAL.with_label_values(&[&model_name]).inc_by(entry.total_tokens as f64);
            COST_TOTAL.with_label_values(&[&model_name]).inc_by(entry.cost_usd);
            TENANT_REQUESTS_TOTAL.with_label_values(&[&tenant.name]).inc();
            TENANT_TOKENS_TOTAL.with_label_values(&[&tenant.name]).inc_by(entry.total_tokens as f64);
            TENANT_COST_TOTAL.with_label_values(&[&tenant.name]).inc_by(entry.cost_usd);

            let response = ChatResponse {
                id: record.id.to_string(),
                model: model_name.clone(),
                created: record.created_at.timestamp(),
                content: entry.response,
            };
            let mut http_response = Json(response).into_response();
            set_route_headers(&mut http_response, &model_name, "cache_hit", "cache", "hit");
            return Ok(http_response);
        }
    }

    state.store.insert_request(&record).await?;

    let run = run_with_fallback(&state, &decision, &model_name, &request).await;

    let (used_provider, result) = match run {
        Ok(pair) => pair,
        Err(err) => {
            record.status = RequestStatus::Failed;
            record.completed_at = Some(Utc::now());
            let _ = state.store.finalize_request(&record).await;
            return Err(err.into());
        }
    };

    let pricing = state.pricing.read().clone();
    let cost = gateway_core::pricing::cost_usd(&pricing, &model_name, result.prompt_tokens, result.completion_tokens, 0);

    if let Some(key) = &cache_lookup_key {
        let entry = CacheEntry {
            response: result.response.clone(),
            prompt_tokens: result.prompt_tokens,
            completion_tokens: result.completion_tokens,
            total_tokens: result.total_tokens,
            cost_usd: cost,
        };
        let _ = state.cache.put_entry(key, &entry, state.config.cache_ttl_seconds).await;
    }

    record.status = RequestStatus::Completed;
    record.response_payload = Some(result.response.clone());
    record.latency_ms = Some(started.elapsed().as_millis() as i64);
    record.prompt_tokens = Some(result.prompt_tokens);
    record.completion_tokens = Some(result.completion_tokens);
    record.total_tokens = Some(result.total_tokens);
    record.cost_usd = Some(cost);
    record.completed_at = Some(Utc::now());
    state.store.finalize_request(&record).await?;

    let usage = UsageEvent::new(tenant.id, record.id, &model_name, result.total_tokens, cost);
    state.store.insert_usage_event(&usage).await?;

    TOKENS_TOTAL.with_label_values(&[&model_name]).inc_by(result.total_tokens as f64);
    COST_TOTAL.with_label_values(&[&model_name]).inc_by(cost);
    TENANT_REQUESTS_TOTAL.with_label_values(&[&tenant.name]).inc();
    TENANT_TOKENS_TOTAL.with_label_values(&[&tenant.name]).inc_by(result.total_tokens as f64);
    TENANT_COST_TOTAL.with_label_values(&[&tenant.name]).inc_by(cost);

    let response = ChatResponse {
        id: record.id.to_string(),
        model: model_name.clone(),
        created: record.created_at.timestamp(),
        content: result.response,
    };
    let mut http_response = Json(response).into_response();
    set_route_headers(&mut http_response, &model_name, &decision.reason, &used_provider, "miss");
    Ok(http_response)
}

/// Dispatches to the routed provider, recording health outcomes and
/// falling back on error per §4.11 step 5. Returns the provider that
/// ultimately served the request alongside its result.
async fn run_with_fallback(
    state: &AppState,
    decision: &gateway_core::routing::RouteDecision,
    model_name: &str,
    request: &ChatRequest,
) -> Result<(String, gateway_core::provider::ProviderResult), GatewayError> {
    if decision.reason == "primary_unhealthy" {
        FALLBACK_TOTAL
            .with_label_values(&["primary_unhealthy", PRIMARY_PROVIDER, &decision.provider])
            .inc();
    }

    let primary = state
        .provider(&decision.provider)
        .ok_or_else(|| GatewayError::Internal(format!("no provider registered for {}", decision.provider)))?;

    let mut effective_request = request.clone();
    effective_request.model = model_name.to_string();

    match primary.generate(&effective_request).await {
        Ok(result) => {
            state.health.record(&decision.provider, true);
            Ok((decision.provider.clone(), result))
        }
        Err(err) => {
            state.health.record(&decision.provider, false);
            let Some(fallback_name) = &decision.fallback_provider else {
                return Err(provider_error_to_gateway(err));
            };
            if decision.reason != "primary_unhealthy" {
                FALLBACK_TOTAL
                    .with_label_values(&["primary_error", &decision.provider, fallback_name])
                    .inc();
            }

            let fallback = state
                .provider(fallback_name)
                .ok_or_else(|| GatewayError::Internal(format!("no provider registered for {fallback_name}")))?;
            let mut fallback_request = request.clone();
            fallback_request.model = decision.model.clone();

            match fallback.generate(&fallback_request).await {
                Ok(result) => {
                    state.health.record(fallback_name, true);
                    Ok((fallback_name.clone(), result))
                }
                Err(err) => {
                    state.health.record(fallback_name, false);
                    Err(provider_error_to_gateway(err))
                }
            }
        }
    }
}

fn set_route_headers(response: &mut Response, model: &str, reason: &str, provider: &str, cache: &str) {
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(model) {
        headers.insert("x-model-chosen", v);
    }
    if let Ok(v) = HeaderValue::from_str(reason) {
        headers.insert("x-route-reason", v);
    }
    if let Ok(v) = HeaderValue::from_str(provider) {
        headers.insert("x-provider", v);
    }
    if let Ok(v) = HeaderValue::from_str(cache) {
        headers.insert("x-cache", v);
    }
}
