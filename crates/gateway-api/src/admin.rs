//! Admin operations (C14): tenant/key CRUD, daily limits, key rotation,
//! pricing overlay, health reset, and usage summaries. Every mutation
//! appends an `AdminAction` row directly — there is no separate audit
//! module, this is the audit log.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    response::{IntoResponse, Response},
    Json,
};
use gateway_core::keyhash::{generate_plaintext_key, hash_key};
use gateway_core::models::{AdminAction, ApiKey, Tenant, Tier};
use gateway_core::pricing::{merge_pricing, PricingMap};
use gateway_core::schemas::{
    CreateKeyRequest, CreateKeyResponse, CreateTenantRequest, KeyView, RevokeByNameRequest, RevokeByPlaintextRequest,
    RotateKeyResponse, SetLimitsRequest, TenantView, UsageSummaryResponse,
};
use gateway_core::GatewayError;

use crate::auth::ResolvedTenant;
use crate::error_response::ApiError;
use crate::state::AppState;

fn tenant_view(tenant: &Tenant) -> TenantView {
    TenantView {
        id: tenant.id.to_string(),
        name: tenant.name.clone(),
        tier: tenant.tier.as_str().to_string(),
        created_at: tenant.created_at,
        token_limit_per_day: tenant.token_limit_per_day,
        spend_limit_per_day_usd: tenant.spend_limit_per_day_usd,
    }
}

fn key_view(key: &ApiKey) -> KeyView {
    KeyView {
        id: key.id.to_string(),
        name: key.name.clone(),
        key_last6: key.key_last6(),
        active: key.active,
        created_at: key.created_at,
        last_used_at: key.last_used_at,
    }
}

async fn audit(state: &AppState, actor: &ResolvedTenant, action: &str, target_type: &str, target_id: Option<String>, metadata: Option<serde_json::Value>) {
    let metadata_json = metadata.map(|v| v.to_string());
    let entry = AdminAction::new(actor.tenant.id, action, target_type, target_id, metadata_json);
    let _ = state.store.append_admin_action(&entry).await;
}

pub async fn create_tenant(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<ResolvedTenant>,
    Json(body): Json<CreateTenantRequest>,
) -> Result<Response, ApiError> {
    if state.store.get_tenant_by_name(&body.name).await?.is_some() {
        return Err(GatewayError::Conflict(format!("tenant {} already exists", body.name)).into());
    }
    let tier = match body.tier.as_deref() {
        Some(raw) => raw.parse::<Tier>().map_err(GatewayError::Validation)?,
        None => Tier::Free,
    };
    let tenant = state.store.create_tenant(&body.name, tier).await?;
    audit(&state, &actor, "create_tenant", "tenant", Some(tenant.id.to_string()), None).await;
    Ok(Json(tenant_view(&tenant)).into_response())
}

pub async fn list_tenants(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let tenants = state.store.list_tenants().await?;
    let views: Vec<TenantView> = tenants.iter().map(tenant_view).collect();
    Ok(Json(views).into_response())
}

pub async fn create_key(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<ResolvedTenant>,
    Path(tenant_name): Path<String>,
    Json(body): Json<CreateKeyRequest>,
) -> Result<Response, ApiError> {
    let tenant = state
        .store
        .get_tenant_by_name(&tenant_name)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("tenant {tenant_name}")))?;

    if state.store.get_key_by_tenant_and_name(tenant.id, &body.name).await?.is_some() {
        return Err(GatewayError::Conflict(format!("key {} already exists for tenant {tenant_name}", body.name)).into());
    }

    let plaintext = generate_plaintext_key();
    let hash = hash_key(&plaintext, &state.key_salt);
    let key = ApiKey::new(tenant.id, &body.name, hash, Some(actor.tenant.id));
    state.store.create_key(&key).await?;
    audit(&state, &actor, "create_key", "api_key", Some(key.id.to_string()), None).await;

    Ok(Json(CreateKeyResponse {
        id: key.id.to_string(),
        tenant: tenant.name,
        name: key.name,
        key: plaintext,
    })
    .into_response())
}

pub async fn list_keys(State(state): State<Arc<AppState>>, Path(tenant_name): Path<String>) -> Result<Response, ApiError> {
    let tenant = state
        .store
        .get_tenant_by_name(&tenant_name)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("tenant {tenant_name}")))?;
    let keys = state.store.list_keys_for_tenant(tenant.id).await?;
    let views: Vec<KeyView> = keys.iter().map(key_view).collect();
    Ok(Json(views).into_response())
}

pub async fn revoke_by_plaintext(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<ResolvedTenant>,
    Json(body): Json<RevokeByPlaintextRequest>,
) -> Result<Response, ApiError> {
    let hash = hash_key(&body.key, &state.key_salt);
    let key = state
        .store
        .get_key_by_hash(&hash)
        .await?
        .ok_or_else(|| GatewayError::NotFound("api key".to_string()))?;
    state.store.revoke_key(key.id, body.reason.clone()).await?;
    audit(&state, &actor, "revoke_key", "api_key", Some(key.id.to_string()), None).await;
    Ok(axum::http::StatusCode::NO_CONTENT.into_response())
}

pub async fn revoke_by_name(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<ResolvedTenant>,
    Path(tenant_name): Path<String>,
    Json(body): Json<RevokeByNameRequest>,
) -> Result<Response, ApiError> {
    let tenant = state
        .store
        .get_tenant_by_name(&tenant_name)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("tenant {tenant_name}")))?;
    let key = state
        .store
        .get_key_by_tenant_and_name(tenant.id, &body.name)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("key {}", body.name)))?;
    state.store.revoke_key(key.id, body.reason.clone()).await?;
    audit(&state, &actor, "revoke_key", "api_key", Some(key.id.to_string()), None).await;
    Ok(axum::http::StatusCode::NO_CONTENT.into_response())
}

/// Rotates the distinguished admin tenant's keys: deactivates every active
/// key it holds and mints a fresh one. §9 leaves the in-flight-request race
/// against the old key undefined; this implementation accepts it.
pub async fn rotate_admin_key(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<ResolvedTenant>,
) -> Result<Response, ApiError> {
    let admin_tenant = state
        .store
        .get_tenant_by_name(gateway_core::models::ADMIN_TENANT_NAME)
        .await?
        .ok_or_else(|| GatewayError::NotFound("admin tenant".to_string()))?;

    state.store.deactivate_all_keys_for_tenant(admin_tenant.id).await?;

    let plaintext = generate_plaintext_key();
    let hash = hash_key(&plaintext, &state.key_salt);
    let key = ApiKey::new(admin_tenant.id, "rotated", hash, Some(actor.tenant.id));
    state.store.create_key(&key).await?;
    audit(&state, &actor, "rotate_admin_key", "api_key", Some(key.id.to_string()), None).await;

    Ok(Json(RotateKeyResponse { key: plaintext }).into_response())
}

pub async fn set_limits(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<ResolvedTenant>,
    Json(body): Json<SetLimitsRequest>,
) -> Result<Response, ApiError> {
    let tenant = state
        .store
        .get_tenant_by_name(&body.tenant)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("tenant {}", body.tenant)))?;
    state
        .store
        .set_tenant_limits(tenant.id, body.token_limit_per_day, body.spend_limit_per_day_usd)
        .await?;
    audit(
        &state,
        &actor,
        "set_limits",
        "tenant",
        Some(tenant.id.to_string()),
        Some(serde_json::json!({
            "token_limit_per_day": body.token_limit_per_day,
            "spend_limit_per_day_usd": body.spend_limit_per_day_usd,
        })),
    )
    .await;
    Ok(axum::http::StatusCode::NO_CONTENT.into_response())
}

pub async fn reset_health(State(state): State<Arc<AppState>>, Extension(actor): Extension<ResolvedTenant>) -> Result<Response, ApiError> {
    state.health.reset();
    audit(&state, &actor, "reset_health", "health", None, None).await;
    Ok(axum::http::StatusCode::NO_CONTENT.into_response())
}

/// Supplemental: layers submitted pricing entries on top of the default
/// table, mirroring `merge_pricing`'s read-through overlay semantics.
pub async fn set_pricing(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<ResolvedTenant>,
    Json(overrides): Json<PricingMap>,
) -> Result<Response, ApiError> {
    let mut pricing = state.pricing.write();
    *pricing = merge_pricing(&pricing, &overrides);
    let snapshot = pricing.clone();
    drop(pricing);
    audit(&state, &actor, "set_pricing", "pricing", None, None).await;
    Ok(Json(snapshot).into_response())
}

pub async fn usage_summary(State(state): State<Arc<AppState>>, Path(tenant_name): Path<String>) -> Result<Response, ApiError> {
    let tenant = state
        .store
        .get_tenant_by_name(&tenant_name)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("tenant {tenant_name}")))?;
    let today = chrono::Utc::now().date_naive();
    let usage = state.store.daily_usage(tenant.id, today).await?;
    Ok(Json(UsageSummaryResponse {
        tenant: tenant.name,
        date: today.to_string(),
        tokens_used: usage.tokens,
        cost_usd: usage.cost_usd,
        token_limit_per_day: tenant.token_limit_per_day,
        spend_limit_per_day_usd: tenant.spend_limit_per_day_usd,
    })
    .into_response())
}
