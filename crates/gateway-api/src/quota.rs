//! Daily quota guard (C9): aggregates today's usage for the resolved
//! tenant and denies once the configured token or spend ceiling is met.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use gateway_core::GatewayError;

use crate::auth::ResolvedTenant;
use crate::error_response::ApiError;
use crate::metrics::QUOTA_DENIED_TOTAL;
use crate::state::AppState;

pub async fn quota_middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Result<Response, ApiError> {
    let tenant = req
        .extensions()
        .get::<ResolvedTenant>()
        .map(|r| r.tenant.clone())
        .ok_or(GatewayError::Unauthorized)?;

    if tenant.token_limit_per_day.is_none() && tenant.spend_limit_per_day_usd.is_none() {
        return Ok(next.run(req).await);
    }

    let today = chrono::Utc::now().date_naive();
    let usage = state.store.daily_usage(tenant.id, today).await?;

    if let Some(limit) = tenant.token_limit_per_day {
        if usage.tokens >= limit {
            QUOTA_DENIED_TOTAL.with_label_values(&["token_limit"]).inc();
            return Ok(quota_exceeded_response(Some(0), None));
        }
    }

    if let Some(limit) = tenant.spend_limit_per_day_usd {
        if usage.cost_usd >= limit {
            QUOTA_DENIED_TOTAL.with_label_values(&["spend_limit"]).inc();
            return Ok(quota_exceeded_response(None, Some(0.0)));
        }
    }

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    if let Some(limit) = tenant.token_limit_per_day {
        let remaining = (limit - usage.tokens).max(0);
        if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
            headers.insert("x-ratelimit-tokens-remaining", value);
        }
    }
    if let Some(limit) = tenant.spend_limit_per_day_usd {
        let remaining = (limit - usage.cost_usd).max(0.0);
        if let Ok(value) = HeaderValue::from_str(&format!("{remaining:.6}")) {
            headers.insert("x-ratelimit-spend-remaining", value);
        }
    }

    Ok(response)
}

fn quota_exceeded_response(tokens_remaining: Option<i64>, spend_remaining: Option<f64>) -> Response {
    let mut response = ApiError(GatewayError::QuotaExceeded).into_response();
    let headers = response.headers_mut();
    if let Some(tokens) = tokens_remaining {
        if let Ok(value) = HeaderValue::from_str(&tokens.to_string()) {
            headers.insert("x-ratelimit-tokens-remaining", value);
        }
    }
    if let Some(spend) = spend_remaining {
        if let Ok(value) = HeaderValue::from_str(&format!("{spend:.6}")) {
            headers.insert("x-ratelimit-spend-remaining", value);
        }
    }
    response
}
