//! Reliability wrapper (C6): retry with exponential backoff plus a circuit
//! breaker, layered transparently over any [`Provider`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use rand::Rng;

use crate::provider::{Provider, ProviderError, ProviderResult, ProviderStream};
use crate::schemas::ChatRequest;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 2000,
            jitter_ratio: 0.1,
        }
    }
}

impl RetryConfig {
    /// `min(max_delay_ms, base_delay_ms * 2^(attempt-1))` plus additive
    /// jitter up to `jitter_ratio * delay`.
    fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(32);
        let exponential = self.base_delay_ms.saturating_mul(1u64 << shift);
        let base = exponential.min(self.max_delay_ms);
        let jitter_cap = (base as f64 * self.jitter_ratio).round() as u64;
        if jitter_cap == 0 {
            base
        } else {
            base + rand::thread_rng().gen_range(0..=jitter_cap)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

/// Failure gate with `closed/open/half_open` transitions, shared across
/// every call a [`ResilientProvider`] makes to its inner provider.
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout_s: u64) -> Self {
        CircuitBreaker {
            failure_threshold,
            reset_timeout: Duration::from_secs(reset_timeout_s),
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether a call should proceed. Moves `open` to `half_open` once the
    /// reset window has elapsed; does not itself count as an attempt.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(Instant::elapsed).unwrap_or(Duration::MAX);
                if elapsed >= self.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
    }

    /// Returns true if this failure just opened the breaker.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                true
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    true
                } else {
                    false
                }
            }
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                false
            }
        }
    }
}

/// Telemetry hooks fired around retries and circuit transitions. They never
/// influence control flow — a panicking observer would be a bug in the
/// observer, not in the wrapper.
pub trait ReliabilityObserver: Send + Sync {
    fn on_error(&self, _provider: &str, _attempt: u32, _error: &ProviderError) {}
    fn on_retry(&self, _provider: &str, _attempt: u32, _delay_ms: u64) {}
    fn on_circuit_open(&self, _provider: &str) {}
}

/// Default observer: logs at `warn`/`error` via `tracing`, nothing more.
pub struct TracingObserver;

impl ReliabilityObserver for TracingObserver {
    fn on_error(&self, provider: &str, attempt: u32, error: &ProviderError) {
        tracing::warn!(provider, attempt, %error, "provider call failed");
    }

    fn on_retry(&self, provider: &str, attempt: u32, delay_ms: u64) {
        tracing::info!(provider, attempt, delay_ms, "retrying provider call");
    }

    fn on_circuit_open(&self, provider: &str) {
        tracing::error!(provider, "circuit breaker open");
    }
}

/// Wraps a [`Provider`] with retry and a circuit breaker, and is itself a
/// [`Provider`] — orchestrators never need to know whether a given provider
/// is resilient-wrapped.
pub struct ResilientProvider<P: Provider> {
    inner: Arc<P>,
    retry: RetryConfig,
    breaker: Arc<CircuitBreaker>,
    observer: Arc<dyn ReliabilityObserver>,
}

impl<P: Provider> ResilientProvider<P> {
    pub fn new(inner: P, retry: RetryConfig, breaker: CircuitBreaker) -> Self {
        ResilientProvider {
            inner: Arc::new(inner),
            retry,
            breaker: Arc::new(breaker),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ReliabilityObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }
}

#[async_trait]
impl<P: Provider + 'static> Provider for ResilientProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, request: &ChatRequest) -> Result<ProviderResult, ProviderError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if !self.breaker.allow() {
                self.observer.on_circuit_open(self.name());
                return Err(ProviderError::CircuitOpen);
            }

            match self.inner.generate(request).await {
                Ok(result) => {
                    self.breaker.record_success();
                    return Ok(result);
                }
                Err(err) => {
                    self.observer.on_error(self.name(), attempt, &err);
                    if self.breaker.record_failure() {
                        self.observer.on_circuit_open(self.name());
                    }
                    if attempt >= self.retry.max_attempts {
                        return Err(err);
                    }
                    let delay = self.retry.backoff_delay_ms(attempt);
                    self.observer.on_retry(self.name(), attempt, delay);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }

    /// Retries only while nothing has reached the caller yet. Once a chunk
    /// has been yielded downstream, a later failure on the same attempt is
    /// surfaced as-is — the wrapper never switches providers or replays
    /// content mid-stream.
    async fn stream(&self, request: &ChatRequest) -> Result<ProviderStream, ProviderError> {
        if !self.breaker.allow() {
            self.observer.on_circuit_open(self.name());
            return Err(ProviderError::CircuitOpen);
        }

        let inner = Arc::clone(&self.inner);
        let breaker = Arc::clone(&self.breaker);
        let observer = Arc::clone(&self.observer);
        let retry = self.retry.clone();
        let request = request.clone();
        let provider_name = self.name().to_string();

        let generated = async_stream::stream! {
            let mut attempt = 0u32;
            let mut yielded_any = false;

            'attempts: loop {
                attempt += 1;

                let mut upstream = match inner.stream(&request).await {
                    Ok(s) => s,
                    Err(err) => {
                        observer.on_error(&provider_name, attempt, &err);
                        if breaker.record_failure() {
                            observer.on_circuit_open(&provider_name);
                        }
                        if yielded_any || attempt >= retry.max_attempts {
                            yield Err(err);
                            return;
                        }
                        let delay = retry.backoff_delay_ms(attempt);
                        observer.on_retry(&provider_name, attempt, delay);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        continue 'attempts;
                    }
                };

                let mut mid_stream_error: Option<ProviderError> = None;
                while let Some(item) = upstream.next().await {
                    match item {
                        Ok(chunk) => {
                            yielded_any = true;
                            let is_done = chunk.done;
                            yield Ok(chunk);
                            if is_done {
                                breaker.record_success();
                                return;
                            }
                        }
                        Err(err) => {
                            mid_stream_error = Some(err);
                            break;
                        }
                    }
                }

                match mid_stream_error {
                    None => {
                        breaker.record_success();
                        return;
                    }
                    Some(err) => {
                        observer.on_error(&provider_name, attempt, &err);
                        if breaker.record_failure() {
                            observer.on_circuit_open(&provider_name);
                        }
                        if yielded_any || attempt >= retry.max_attempts {
                            yield Err(err);
                            return;
                        }
                        let delay = retry.backoff_delay_ms(attempt);
                        observer.on_retry(&provider_name, attempt, delay);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        };

        Ok(Box::pin(generated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderChunk;
    use crate::schemas::{ChatMessage, Role};
    use futures_util::stream;
    use std::sync::atomic::{AtomicU32, Ordering};

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

    struct FlakyProvider {
        calls: AtomicU32,
        fail_first_n: u32,
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn generate(&self, _request: &ChatRequest) -> Result<ProviderResult, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first_n {
                Err(ProviderError::Upstream("boom".to_string()))
            } else {
                Ok(ProviderResult {
                    response: "ok".to_string(),
                    prompt_tokens: 1,
                    completion_tokens: 1,
                    total_tokens: 2,
                    response_id: "r1".to_string(),
                })
            }
        }

        async fn stream(&self, _request: &ChatRequest) -> Result<ProviderStream, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first_n {
                return Err(ProviderError::Upstream("boom".to_string()));
            }
            let chunks = vec![
                Ok(ProviderChunk::content("hel")),
                Ok(ProviderChunk::content("lo")),
                Ok(ProviderChunk::done(Some(1), Some(1), Some("mock-1".to_string()))),
            ];
            Ok(Box::pin(stream::iter(chunks)))
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter_ratio: 0.0,
        }
    }

    #[tokio::test]
    async fn s7_retries_twice_then_succeeds_with_exactly_three_calls() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first_n: 2,
        };
        let resilient = ResilientProvider::new(provider, fast_retry(), CircuitBreaker::new(10, 60));

        let result = resilient.generate(&request()).await.unwrap();
        assert_eq!(result.response, "ok");
        assert_eq!(resilient.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn generate_surfaces_error_after_exhausting_attempts() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first_n: 5,
        };
        let resilient = ResilientProvider::new(provider, fast_retry(), CircuitBreaker::new(10, 60));

        let result = resilient.generate(&request()).await;
        assert!(result.is_err());
        assert_eq!(resilient.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stream_retries_before_first_chunk_is_yielded() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first_n: 2,
        };
        let resilient = ResilientProvider::new(provider, fast_retry(), CircuitBreaker::new(10, 60));

        let mut s = resilient.stream(&request()).await.unwrap();
        let mut collected = Vec::new();
        while let Some(item) = s.next().await {
            collected.push(item.unwrap());
        }
        assert_eq!(collected.len(), 3);
        assert!(collected.last().unwrap().done);
    }

    #[tokio::test]
    async fn circuit_opens_after_consecutive_failures_and_fails_fast() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first_n: 100,
        };
        let breaker = CircuitBreaker::new(2, 3600);
        let resilient = ResilientProvider::new(
            provider,
            RetryConfig {
                max_attempts: 1,
                base_delay_ms: 1,
                max_delay_ms: 1,
                jitter_ratio: 0.0,
            },
            breaker,
        );

        let _ = resilient.generate(&request()).await;
        let _ = resilient.generate(&request()).await;
        assert_eq!(resilient.circuit_state(), CircuitState::Open);

        let result = resilient.generate(&request()).await;
        assert!(matches!(result, Err(ProviderError::CircuitOpen)));
        // The third call failed fast: the inner provider was not invoked again.
        assert_eq!(resilient.inner.calls.load(Ordering::SeqCst), 2);
    }
}
