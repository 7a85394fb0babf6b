//! Provider adapter contract (C3): a uniform `generate`/`stream` interface
//! over whatever actually talks to an LLM backend. `gateway-providers`
//! supplies the concrete mock and HTTP-backed implementations.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::schemas::ChatRequest;

#[derive(Debug, Clone)]
pub struct ProviderResult {
    pub response: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    /// Opaque id minted by the provider adapter (or synthesized locally for
    /// HTTP-backed upstreams that don't return one).
    pub response_id: String,
}

/// A single streamed chunk. The final chunk in a stream MUST carry
/// `done: true`; it may be a standalone terminating chunk with empty
/// content.
#[derive(Debug, Clone)]
pub struct ProviderChunk {
    pub content: String,
    pub done: bool,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub model: Option<String>,
}

impl ProviderChunk {
    pub fn content(content: impl Into<String>) -> Self {
        ProviderChunk {
            content: content.into(),
            done: false,
            prompt_tokens: None,
            completion_tokens: None,
            model: None,
        }
    }

    pub fn done(prompt_tokens: Option<i64>, completion_tokens: Option<i64>, model: Option<String>) -> Self {
        ProviderChunk {
            content: String::new(),
            done: true,
            prompt_tokens,
            completion_tokens,
            model,
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("upstream call failed: {0}")]
    Upstream(String),

    #[error("upstream call timed out")]
    Timeout,

    #[error("circuit breaker open")]
    CircuitOpen,
}

pub type ProviderStream = BoxStream<'static, Result<ProviderChunk, ProviderError>>;

/// Estimates `total_tokens` when the upstream reports zero: roughly one
/// token per four characters of the concatenated text, floored at 1.
pub fn estimate_tokens(text: &str) -> i64 {
    std::cmp::max(1, (text.len() as i64) / 4)
}

/// Uniform contract over an LLM backend. Implementations must be safe for
/// concurrent calls — the gateway shares one instance across every request
/// routed to it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable name used in routing decisions, metrics, and response headers.
    fn name(&self) -> &str;

    async fn generate(&self, request: &ChatRequest) -> Result<ProviderResult, ProviderError>;

    async fn stream(&self, request: &ChatRequest) -> Result<ProviderStream, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_floors_at_one() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abc"), 1);
    }

    #[test]
    fn estimate_tokens_is_roughly_four_chars_per_token() {
        assert_eq!(estimate_tokens(&"a".repeat(40)), 10);
    }
}
