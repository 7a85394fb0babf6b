//! Auth middleware (C11): resolves an API key to its tenant and bumps
//! `last_used_at` best-effort. Admin routes additionally require the
//! resolved tenant to be the distinguished `admin` tenant.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use gateway_core::keyhash::hash_key;
use gateway_core::models::{ApiKey, Tenant};
use gateway_core::GatewayError;

use crate::error_response::ApiError;
use crate::state::AppState;

#[derive(Clone)]
pub struct ResolvedTenant {
    pub tenant: Tenant,
    pub key: ApiKey,
}

fn extract_plaintext_key(req: &Request) -> Option<String> {
    if let Some(value) = req.headers().get(axum::http::header::AUTHORIZATION) {
        if let Ok(s) = value.to_str() {
            if let Some(rest) = s.strip_prefix("Bearer ") {
                return Some(rest.to_string());
            }
        }
    }
    req.headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Resolves the bearer key to a tenant and inserts a [`ResolvedTenant`] into
/// request extensions. Runs ahead of rate limiting and quota so those
/// stages can key off the resolved tenant.
pub async fn auth_middleware(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let plaintext = extract_plaintext_key(&req).ok_or(GatewayError::Unauthorized)?;
    let hash = hash_key(&plaintext, &state.key_salt);

    let key = state.store.get_key_by_hash(&hash).await?.ok_or(GatewayError::Unauthorized)?;
    if !key.active {
        return Err(ApiError(GatewayError::Unauthorized));
    }

    let tenant = state
        .store
        .get_tenant(key.tenant_id)
        .await?
        .ok_or(GatewayError::Unauthorized)?;

    // Best-effort: auth must never fail because this write failed.
    let _ = state.store.touch_last_used(key.id).await;

    req.extensions_mut().insert(ResolvedTenant { tenant, key });
    Ok(next.run(req).await)
}

/// Layered only on `/v1/admin/*`: rejects any resolved tenant other than
/// the distinguished admin tenant.
pub async fn require_admin(req: Request, next: Next) -> Result<Response, ApiError> {
    let is_admin = req
        .extensions()
        .get::<ResolvedTenant>()
        .map(|r| r.tenant.is_admin())
        .unwrap_or(false);

    if !is_admin {
        return Err(ApiError(GatewayError::Forbidden));
    }
    Ok(next.run(req).await)
}
