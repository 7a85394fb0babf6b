//! Per-tenant sliding-window rate limiter (C8): minute-bucket counters for
//! requests and estimated tokens, held in the KV [`Cache`] so limits are
//! shared across processes when backed by Redis.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use gateway_core::GatewayError;

use crate::auth::ResolvedTenant;
use crate::error_response::ApiError;
use crate::metrics::RATE_LIMITED_TOTAL;
use crate::state::AppState;

/// Fixed per-request token estimate charged before the provider call
/// reports an actual count.
const PRE_REQUEST_TOKEN_ESTIMATE: i64 = 2;
const WINDOW_SECS: u64 = 60;

fn epoch_minute(now: i64) -> i64 {
    now / WINDOW_SECS as i64
}

pub async fn rate_limit_middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Result<Response, ApiError> {
    let tenant_id = req
        .extensions()
        .get::<ResolvedTenant>()
        .map(|r| r.tenant.id)
        .ok_or(GatewayError::Unauthorized)?;

    let now = chrono::Utc::now().timestamp();
    let bucket = epoch_minute(now);
    let retry_after = (WINDOW_SECS as i64 - now.rem_euclid(WINDOW_SECS as i64)) as u64;

    let req_key = format!("rl:req:{tenant_id}:{bucket}");
    let req_count = state
        .cache
        .incr_with_ttl(&req_key, 1, WINDOW_SECS)
        .await
        .map_err(|_| GatewayError::RateLimitUnavailable)?;

    if req_count > state.config.requests_per_minute {
        RATE_LIMITED_TOTAL.with_label_values(&["requests_per_minute"]).inc();
        return Err(ApiError(GatewayError::RateLimited { retry_after_secs: retry_after }));
    }

    let token_key = format!("rl:tokens:{tenant_id}:{bucket}");
    let token_count = state
        .cache
        .incr_with_ttl(&token_key, PRE_REQUEST_TOKEN_ESTIMATE, WINDOW_SECS)
        .await
        .map_err(|_| GatewayError::RateLimitUnavailable)?;

    if token_count > state.config.tokens_per_minute {
        RATE_LIMITED_TOTAL.with_label_values(&["tokens_per_minute"]).inc();
        return Err(ApiError(GatewayError::RateLimited { retry_after_secs: retry_after }));
    }

    Ok(next.run(req).await)
}
