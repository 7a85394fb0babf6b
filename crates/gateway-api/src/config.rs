//! Process configuration, read once at startup from the environment.

use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderMode {
    Mock,
    Ollama,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub admin_api_key: String,
    pub provider_mode: ProviderMode,
    pub ollama_url: String,
    pub ollama_model: String,
    pub primary_fail_rate: f64,
    pub fallback_fail_rate: f64,
    pub requests_per_minute: i64,
    pub tokens_per_minute: i64,
    pub cache_ttl_seconds: u64,
    pub health_window_size: usize,
    pub health_min_samples: usize,
    pub health_error_threshold: f64,
    pub port: u16,
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl AppConfig {
    /// Reads configuration from the process environment, applying the
    /// defaults named in the external-interfaces contract.
    pub fn from_env() -> Self {
        let provider_mode = match env::var("PROVIDER_MODE").as_deref() {
            Ok("ollama") => ProviderMode::Ollama,
            _ => ProviderMode::Mock,
        };

        AppConfig {
            database_url: env_string("DATABASE_URL", "gateway.db"),
            redis_url: env::var("REDIS_URL").ok(),
            admin_api_key: env_string("ADMIN_API_KEY", "sk-gw-admin-dev"),
            provider_mode,
            ollama_url: env_string("OLLAMA_URL", "http://localhost:11434"),
            ollama_model: env_string("OLLAMA_MODEL", "llama3"),
            primary_fail_rate: env_parsed("PRIMARY_FAIL_RATE", 0.0),
            fallback_fail_rate: env_parsed("FALLBACK_FAIL_RATE", 0.0),
            requests_per_minute: env_parsed("REQUESTS_PER_MINUTE", 60),
            tokens_per_minute: env_parsed("TOKENS_PER_MINUTE", 1000),
            cache_ttl_seconds: env_parsed("CACHE_TTL_SECONDS", 300),
            health_window_size: env_parsed("HEALTH_WINDOW_SIZE", 20),
            health_min_samples: env_parsed("HEALTH_MIN_SAMPLES", 5),
            health_error_threshold: env_parsed("HEALTH_ERROR_THRESHOLD", 0.5),
            port: env_parsed("PORT", 8080),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parsed_falls_back_on_missing_var() {
        let value: i64 = env_parsed("GATEWAY_TEST_DOES_NOT_EXIST", 42);
        assert_eq!(value, 42);
    }

    #[test]
    fn env_string_falls_back_on_missing_var() {
        assert_eq!(env_string("GATEWAY_TEST_DOES_NOT_EXIST", "fallback"), "fallback");
    }
}
