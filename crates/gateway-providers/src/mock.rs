//! A provider with no real upstream: fails with a configurable probability,
//! otherwise echoes a fixed response after a small simulated delay. Used for
//! both the `primary` and `fallback` provider slots in tests and in
//! `PROVIDER_MODE=mock` deployments.

use std::time::Duration;

use async_trait::async_trait;
use gateway_core::provider::{estimate_tokens, Provider, ProviderChunk, ProviderError, ProviderResult, ProviderStream};
use gateway_core::schemas::ChatRequest;
use rand::Rng;
use uuid::Uuid;

const MOCK_CONTENT: &str = "mock response";

pub struct MockProvider {
    name: String,
    delay_ms: u64,
    fail_rate: f64,
}

impl MockProvider {
    pub fn new(name: impl Into<String>, delay_ms: u64, fail_rate: f64) -> Self {
        MockProvider {
            name: name.into(),
            delay_ms,
            fail_rate,
        }
    }

    fn maybe_fail(&self) -> Result<(), ProviderError> {
        if self.fail_rate > 0.0 && rand::thread_rng().gen::<f64>() < self.fail_rate {
            return Err(ProviderError::Upstream("mock provider failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, _request: &ChatRequest) -> Result<ProviderResult, ProviderError> {
        self.maybe_fail()?;
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }

        Ok(ProviderResult {
            response: MOCK_CONTENT.to_string(),
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
            response_id: Uuid::new_v4().to_string(),
        })
    }

    async fn stream(&self, _request: &ChatRequest) -> Result<ProviderStream, ProviderError> {
        self.maybe_fail()?;

        let delay = self.delay_ms;
        let s = async_stream::stream! {
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            yield Ok(ProviderChunk::content("mock "));
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            yield Ok(ProviderChunk::content("response"));
            let total = estimate_tokens(MOCK_CONTENT);
            yield Ok(ProviderChunk::done(Some(1), Some(total - 1), None));
        };
        Ok(Box::pin(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use gateway_core::schemas::{ChatMessage, Role};

    fn request() -> ChatRequest {
        ChatRequest {
            model: "mock-1".to_string(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: "hi".to_string(),
            }],
            temperature: None,
            max_tokens: None,
            stream: false,
        }
    }

    #[tokio::test]
    async fn zero_fail_rate_always_succeeds() {
        let provider = MockProvider::new("primary", 0, 0.0);
        let result = provider.generate(&request()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn fail_rate_one_always_fails() {
        let provider = MockProvider::new("primary", 0, 1.0);
        let result = provider.generate(&request()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stream_yields_content_then_a_done_chunk() {
        let provider = MockProvider::new("primary", 0, 0.0);
        let mut stream = provider.stream(&request()).await.unwrap();
        let mut chunks = Vec::new();
        while let Some(item) = stream.next().await {
            chunks.push(item.unwrap());
        }
        assert!(chunks.len() >= 2);
        assert!(chunks.last().unwrap().done);
        assert!(!chunks[0].done);
    }
}
