//! Wire schemas for the chat endpoints and admin API, plus request
//! validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    /// Validates the fields the spec constrains: non-empty model, at least
    /// one message, non-empty content, temperature in range, positive
    /// max_tokens.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::Validation("model must not be empty".to_string()));
        }
        if self.messages.is_empty() {
            return Err(GatewayError::Validation("messages must contain at least one entry".to_string()));
        }
        for message in &self.messages {
            if message.content.trim().is_empty() {
                return Err(GatewayError::Validation("message content must not be empty".to_string()));
            }
        }
        if let Some(temp) = self.temperature {
            if !(0.0..=2.0).contains(&temp) {
                return Err(GatewayError::Validation("temperature must be within [0, 2]".to_string()));
            }
        }
        if let Some(max_tokens) = self.max_tokens {
            if max_tokens <= 0 {
                return Err(GatewayError::Validation("max_tokens must be positive".to_string()));
            }
        }
        Ok(())
    }

    /// Whether this request is cacheable per §4.2: non-streaming and
    /// temperature is either unset or zero.
    pub fn is_cacheable(&self) -> bool {
        !self.stream && (self.temperature.is_none() || self.temperature == Some(0.0))
    }

    /// Canonical JSON form used for fingerprinting: `stream` forced false,
    /// keys sorted (via `serde_json::Map`'s default `BTreeMap` backing).
    pub fn canonical_json(&self) -> Value {
        let mut cloned = self.clone();
        cloned.stream = false;
        serde_json::to_value(&cloned).expect("ChatRequest always serializes")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub created: i64,
    pub content: String,
}

/// The value stored in the KV cache for a cacheable request, keyed by
/// fingerprint. Reconstructing a response from a hit must reproduce
/// identical content and token counts to the miss that populated it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub response: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: String,
    pub model: String,
    pub created: i64,
    pub content: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ChatUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamErrorEvent {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorResponse {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

// --- Admin DTOs -------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    #[serde(default)]
    pub tier: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantView {
    pub id: String,
    pub name: String,
    pub tier: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub token_limit_per_day: Option<i64>,
    pub spend_limit_per_day_usd: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateKeyResponse {
    pub id: String,
    pub tenant: String,
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyView {
    pub id: String,
    pub name: String,
    pub key_last6: String,
    pub active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevokeByPlaintextRequest {
    pub key: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevokeByNameRequest {
    pub name: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetLimitsRequest {
    pub tenant: String,
    #[serde(default)]
    pub token_limit_per_day: Option<i64>,
    #[serde(default)]
    pub spend_limit_per_day_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RotateKeyResponse {
    pub key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageSummaryResponse {
    pub tenant: String,
    pub date: String,
    pub tokens_used: i64,
    pub cost_usd: f64,
    pub token_limit_per_day: Option<i64>,
    pub spend_limit_per_day_usd: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> ChatRequest {
        ChatRequest {
            model: "mock-1".to_string(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: "hello".to_string(),
            }],
            temperature: None,
            max_tokens: None,
            stream: false,
        }
    }

    #[test]
    fn rejects_empty_model() {
        let mut req = sample_request();
        req.model = "  ".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_empty_messages() {
        let mut req = sample_request();
        req.messages.clear();
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let mut req = sample_request();
        req.temperature = Some(3.0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_request() {
        assert!(sample_request().validate().is_ok());
    }

    #[test]
    fn cacheable_iff_not_streamed_and_zero_or_unset_temperature() {
        let mut req = sample_request();
        assert!(req.is_cacheable());

        req.temperature = Some(0.0);
        assert!(req.is_cacheable());

        req.temperature = Some(0.7);
        assert!(!req.is_cacheable());

        req.temperature = None;
        req.stream = true;
        assert!(!req.is_cacheable());
    }

    #[test]
    fn canonical_json_forces_stream_false() {
        let mut req = sample_request();
        req.stream = true;
        let value = req.canonical_json();
        assert_eq!(value["stream"], serde_json::Value::Bool(false));
    }
}
