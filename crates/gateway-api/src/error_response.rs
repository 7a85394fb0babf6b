//! Maps the workspace's error types onto the wire error taxonomy (§7):
//! `{"error":{code,message}}` plus a stable HTTP status, with `Retry-After`
//! attached for rate limiting.

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use gateway_core::schemas::ErrorResponse;
use gateway_core::GatewayError;
use gateway_store::{CacheError, StoreError};

pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let mapped = match err {
            StoreError::NotFound(what) => GatewayError::NotFound(what),
            StoreError::Conflict(what) => GatewayError::Conflict(what),
            StoreError::Sqlite(e) => GatewayError::Store(e.to_string()),
        };
        ApiError(mapped)
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        let CacheError::Unavailable(msg) = err;
        ApiError(GatewayError::Store(msg))
    }
}

/// Maps a provider-adapter failure onto the gateway's error taxonomy. Used
/// directly by the orchestrators (rather than through `ApiError`) because
/// they need the `GatewayError` to decide on a fallback before it ever
/// reaches an HTTP response.
pub fn provider_error_to_gateway(err: gateway_core::provider::ProviderError) -> GatewayError {
    use gateway_core::provider::ProviderError as PE;
    match err {
        PE::CircuitOpen => GatewayError::CircuitOpen,
        PE::Timeout => GatewayError::Provider("upstream timed out".to_string()),
        PE::Upstream(msg) => GatewayError::Provider(msg),
    }
}

impl From<gateway_core::provider::ProviderError> for ApiError {
    fn from(err: gateway_core::provider::ProviderError) -> Self {
        ApiError(provider_error_to_gateway(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse::new(err.code(), err.to_string());
        let mut response = (status, Json(body)).into_response();

        if let GatewayError::RateLimited { retry_after_secs } = err {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }

        response
    }
}
