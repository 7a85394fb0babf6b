//! Durable domain entities: tenants, API keys, requests, usage events, and
//! the admin audit log. These mirror the rows a [`gateway_store`] backend
//! persists; this crate only defines their shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant pricing/routing class. `pro` tenants are routed to the higher tier
/// model; `free` is the default for newly resolved tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Free
    }
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// The distinguished tenant name that gates admin-only routes.
pub const ADMIN_TENANT_NAME: &str = "admin";

/// The tenant new requests fall back to when no API key resolved one.
pub const DEFAULT_TENANT_NAME: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub tier: Tier,
    pub created_at: DateTime<Utc>,
    pub token_limit_per_day: Option<i64>,
    pub spend_limit_per_day_usd: Option<f64>,
}

impl Tenant {
    pub fn new(name: impl Into<String>, tier: Tier) -> Self {
        Tenant {
            id: Uuid::new_v4(),
            name: name.into(),
            tier,
            created_at: Utc::now(),
            token_limit_per_day: None,
            spend_limit_per_day_usd: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.name == ADMIN_TENANT_NAME
    }
}

/// An API key. `key_hash` is the only persisted form of the secret; the
/// plaintext is returned to the caller exactly once, at mint time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub key_hash: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
}

impl ApiKey {
    pub fn new(tenant_id: Uuid, name: impl Into<String>, key_hash: String, created_by: Option<Uuid>) -> Self {
        ApiKey {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            key_hash,
            active: true,
            created_at: Utc::now(),
            created_by,
            last_used_at: None,
            revoked_at: None,
            revoked_reason: None,
        }
    }

    /// Last six characters of the hash, safe to show in list views.
    pub fn key_last6(&self) -> String {
        let hash = &self.key_hash;
        if hash.len() <= 6 {
            hash.to_string()
        } else {
            hash[hash.len() - 6..].to_string()
        }
    }

    pub fn revoke(&mut self, reason: Option<String>) {
        self.active = false;
        self.revoked_at = Some(Utc::now());
        self.revoked_reason = reason.map(|r| r.chars().take(300).collect());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    InProgress,
    Completed,
    Canceled,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Canceled => "canceled",
            RequestStatus::Failed => "failed",
        }
    }
}

/// A single chat-completion request, from creation through terminal status.
/// Only the orchestrator mutates this row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub model: String,
    pub status: RequestStatus,
    pub request_payload: String,
    pub response_payload: Option<String>,
    pub latency_ms: Option<i64>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub cost_usd: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RequestRecord {
    pub fn new(tenant_id: Uuid, model: impl Into<String>, request_payload: String) -> Self {
        RequestRecord {
            id: Uuid::new_v4(),
            tenant_id,
            model: model.into(),
            status: RequestStatus::InProgress,
            request_payload,
            response_payload: None,
            latency_ms: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            cost_usd: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Created exactly once per successfully completed [`RequestRecord`]. Feeds
/// daily quota aggregates; never mutated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub request_id: Uuid,
    pub model: String,
    pub tokens: i64,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
}

impl UsageEvent {
    pub fn new(tenant_id: Uuid, request_id: Uuid, model: impl Into<String>, tokens: i64, cost_usd: f64) -> Self {
        UsageEvent {
            id: Uuid::new_v4(),
            tenant_id,
            request_id,
            model: model.into(),
            tokens,
            cost_usd,
            created_at: Utc::now(),
        }
    }
}

/// Append-only audit trail for admin mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminAction {
    pub id: Uuid,
    pub actor_tenant_id: Uuid,
    pub action: String,
    pub target_type: String,
    pub target_id: Option<String>,
    pub metadata_json: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AdminAction {
    pub fn new(
        actor_tenant_id: Uuid,
        action: impl Into<String>,
        target_type: impl Into<String>,
        target_id: Option<String>,
        metadata_json: Option<String>,
    ) -> Self {
        AdminAction {
            id: Uuid::new_v4(),
            actor_tenant_id,
            action: action.into(),
            target_type: target_type.into(),
            target_id,
            metadata_json,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_last6_handles_short_hashes() {
        let key = ApiKey::new(Uuid::new_v4(), "ci", "abc".to_string(), None);
        assert_eq!(key.key_last6(), "abc");
    }

    #[test]
    fn key_last6_takes_suffix() {
        let key = ApiKey::new(Uuid::new_v4(), "ci", "0123456789abcdef".to_string(), None);
        assert_eq!(key.key_last6(), "abcdef");
    }

    #[test]
    fn revoke_sets_active_false_and_timestamps() {
        let mut key = ApiKey::new(Uuid::new_v4(), "ci", "deadbeef".to_string(), None);
        key.revoke(Some("rotated".to_string()));
        assert!(!key.active);
        assert!(key.revoked_at.is_some());
        assert_eq!(key.revoked_reason.as_deref(), Some("rotated"));
    }

    #[test]
    fn tier_roundtrips_through_str() {
        assert_eq!("pro".parse::<Tier>().unwrap().as_str(), "pro");
        assert!("enterprise".parse::<Tier>().is_err());
    }
}
