//! Concrete [`gateway_core::provider::Provider`] implementations: an
//! in-process mock and an HTTP-backed Ollama-compatible upstream.

pub mod mock;
pub mod ollama;

pub use mock::MockProvider;
pub use ollama::OllamaProvider;
