//! Routing policy (C5): a pure function of tier and provider health.

use serde::{Deserialize, Serialize};

use crate::health::HealthTracker;
use crate::models::Tier;

pub const PRIMARY_PROVIDER: &str = "primary";
pub const FALLBACK_PROVIDER: &str = "fallback";

const MODEL_FREE: &str = "mock-1";
const MODEL_PRO: &str = "mock-2";

/// Default threshold above which the primary is considered unhealthy.
pub const DEFAULT_ERROR_RATE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub model: String,
    pub provider: String,
    pub reason: String,
    pub fallback_provider: Option<String>,
}

/// Chooses a model and provider for `tier`, consulting `health` for the
/// primary's current error rate. Swaps to the fallback when the primary's
/// error rate exceeds `error_rate_threshold`.
pub fn choose(tier: Tier, health: &HealthTracker, error_rate_threshold: f64) -> RouteDecision {
    let model = match tier {
        Tier::Pro => MODEL_PRO,
        Tier::Free => MODEL_FREE,
    };

    let mut decision = RouteDecision {
        model: model.to_string(),
        provider: PRIMARY_PROVIDER.to_string(),
        reason: format!("tier:{}", tier.as_str()),
        fallback_provider: Some(FALLBACK_PROVIDER.to_string()),
    };

    if health.error_rate(PRIMARY_PROVIDER) > error_rate_threshold {
        decision.provider = FALLBACK_PROVIDER.to_string();
        decision.fallback_provider = Some(PRIMARY_PROVIDER.to_string());
        decision.reason = "primary_unhealthy".to_string();
    }

    decision
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_healthy_free_tier_routes_to_mock1_primary() {
        let health = HealthTracker::new(10, 5);
        let decision = choose(Tier::Free, &health, DEFAULT_ERROR_RATE_THRESHOLD);
        assert_eq!(decision.model, "mock-1");
        assert_eq!(decision.provider, "primary");
        assert_eq!(decision.reason, "tier:free");
    }

    #[test]
    fn pro_tier_routes_to_mock2() {
        let health = HealthTracker::new(10, 5);
        let decision = choose(Tier::Pro, &health, DEFAULT_ERROR_RATE_THRESHOLD);
        assert_eq!(decision.model, "mock-2");
    }

    #[test]
    fn s2_unhealthy_primary_swaps_to_fallback() {
        let health = HealthTracker::new(10, 1);
        health.record(PRIMARY_PROVIDER, false);
        health.record(PRIMARY_PROVIDER, false);
        health.record(PRIMARY_PROVIDER, false);

        let decision = choose(Tier::Free, &health, DEFAULT_ERROR_RATE_THRESHOLD);
        assert_eq!(decision.provider, "fallback");
        assert_eq!(decision.fallback_provider.as_deref(), Some("primary"));
        assert_eq!(decision.reason, "primary_unhealthy");
    }
}
