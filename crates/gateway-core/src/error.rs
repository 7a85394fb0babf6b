//! The gateway's single error taxonomy.
//!
//! Every fallible operation across the workspace returns (or converts into)
//! a [`GatewayError`]. Each variant carries a stable wire `code` and an HTTP
//! status, so the API crate can turn any error into `{"error":{code,message}}`
//! without re-deriving the mapping at the edge.

use thiserror::Error;

/// Errors surfaced anywhere in the request-processing pipeline.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("missing or invalid API key")]
    Unauthorized,

    #[error("admin access required")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("daily quota exceeded")]
    QuotaExceeded,

    #[error("rate limiter store is unavailable")]
    RateLimitUnavailable,

    #[error("request body failed validation: {0}")]
    Validation(String),

    #[error("stream failed after content was already sent")]
    StreamError,

    #[error("upstream provider circuit is open")]
    CircuitOpen,

    #[error("provider error: {0}")]
    Provider(String),

    #[error("storage error: {0}")]
    Store(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable error code, part of the wire contract.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::Forbidden => "forbidden",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Conflict(_) => "conflict",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::QuotaExceeded => "quota_exceeded",
            GatewayError::RateLimitUnavailable => "rate_limit_unavailable",
            GatewayError::Validation(_) => "validation_error",
            GatewayError::StreamError => "stream_error",
            GatewayError::CircuitOpen => "circuit_open",
            GatewayError::Provider(_) => "provider_error",
            GatewayError::Store(_) => "internal_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status this error maps to at the API edge.
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::Unauthorized => 401,
            GatewayError::Forbidden => 403,
            GatewayError::NotFound(_) => 404,
            GatewayError::Conflict(_) => 409,
            GatewayError::Validation(_) => 400,
            GatewayError::RateLimited { .. } => 429,
            GatewayError::QuotaExceeded => 429,
            GatewayError::RateLimitUnavailable => 503,
            GatewayError::StreamError => 500,
            GatewayError::CircuitOpen => 503,
            GatewayError::Provider(_) => 502,
            GatewayError::Store(_) => 500,
            GatewayError::Internal(_) => 500,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(GatewayError::Unauthorized.code(), "unauthorized");
        assert_eq!(GatewayError::QuotaExceeded.code(), "quota_exceeded");
        assert_eq!(
            GatewayError::RateLimited { retry_after_secs: 30 }.code(),
            "rate_limited"
        );
    }

    #[test]
    fn status_matches_taxonomy() {
        assert_eq!(GatewayError::Unauthorized.status(), 401);
        assert_eq!(GatewayError::Forbidden.status(), 403);
        assert_eq!(GatewayError::RateLimitUnavailable.status(), 503);
        assert_eq!(GatewayError::CircuitOpen.status(), 503);
    }
}
