//! Prometheus metrics for the gateway.
//!
//! Every counter named in the external-interfaces contract is registered
//! here and nowhere else, so `/metrics` is the single source of truth for
//! what the gateway reports.

use axum::{
    extract::{MatchedPath, Request},
    http::StatusCode,
    middleware::Next,
    response::IntoResponse,
};
use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder};
use std::time::Instant;

lazy_static! {
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latency in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    pub static ref TOKENS_TOTAL: CounterVec = register_counter_vec!(
        "tokens_total",
        "Total tokens billed across completed requests",
        &["model"]
    )
    .unwrap();

    pub static ref COST_TOTAL: CounterVec = register_counter_vec!(
        "cost_total",
        "Total cost in USD across completed requests",
        &["model"]
    )
    .unwrap();

    pub static ref TENANT_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "tenant_requests_total",
        "Total completed chat requests per tenant",
        &["tenant"]
    )
    .unwrap();

    pub static ref TENANT_TOKENS_TOTAL: CounterVec = register_counter_vec!(
        "tenant_tokens_total",
        "Total tokens billed per tenant",
        &["tenant"]
    )
    .unwrap();

    pub static ref TENANT_COST_TOTAL: CounterVec = register_counter_vec!(
        "tenant_cost_total",
        "Total cost in USD per tenant",
        &["tenant"]
    )
    .unwrap();

    pub static ref RATE_LIMITED_TOTAL: CounterVec = register_counter_vec!(
        "rate_limited_total",
        "Requests denied by the per-minute rate limiter",
        &["reason"]
    )
    .unwrap();

    pub static ref QUOTA_DENIED_TOTAL: CounterVec = register_counter_vec!(
        "quota_denied_total",
        "Requests denied by the daily quota guard",
        &["reason"]
    )
    .unwrap();

    pub static ref FALLBACK_TOTAL: CounterVec = register_counter_vec!(
        "fallback_total",
        "Requests that fell back from one provider to another",
        &["reason", "from", "to"]
    )
    .unwrap();
}

/// Axum middleware recording `http_requests_total` and
/// `http_request_duration_seconds` for every request.
pub async fn track_metrics(req: Request, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL.with_label_values(&[&method, &path, &status]).inc();
    HTTP_REQUEST_DURATION_SECONDS.with_label_values(&[&method, &path]).observe(duration);

    response
}

/// Handler for the `/metrics` endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (StatusCode::OK, [("content-type", encoder.format_type())], buffer).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to encode metrics: {e}")).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_counters_render_by_name() {
        TOKENS_TOTAL.with_label_values(&["mock-1"]).inc();
        FALLBACK_TOTAL.with_label_values(&["primary_unhealthy", "primary", "fallback"]).inc();

        let encoder = TextEncoder::new();
        let families = prometheus::gather();
        let mut buffer = vec![];
        encoder.encode(&families, &mut buffer).unwrap();
        let body = String::from_utf8(buffer).unwrap();

        assert!(body.contains("tokens_total"));
        assert!(body.contains("fallback_total"));
    }
}
