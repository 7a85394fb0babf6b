//! Per-model cost derivation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingEntry {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
    pub cached_per_1k: f64,
    pub updated_at: DateTime<Utc>,
}

impl PricingEntry {
    pub fn new(input_per_1k: f64, output_per_1k: f64, cached_per_1k: f64) -> Self {
        PricingEntry {
            input_per_1k,
            output_per_1k,
            cached_per_1k,
            updated_at: Utc::now(),
        }
    }
}

/// Model name → pricing entry.
pub type PricingMap = HashMap<String, PricingEntry>;

/// Pricing for the two mock models the routing policy can select, plus a
/// placeholder for the Ollama-backed upstream model.
pub fn default_pricing() -> PricingMap {
    let mut map = PricingMap::new();
    map.insert("mock-1".to_string(), PricingEntry::new(0.0005, 0.0015, 0.00025));
    map.insert("mock-2".to_string(), PricingEntry::new(0.0015, 0.0045, 0.00075));
    map
}

/// Cost in USD for a completion. Missing pricing for `model` yields zero —
/// an unpriced model is never billed, never rejected.
pub fn cost_usd(pricing: &PricingMap, model: &str, prompt_tokens: i64, completion_tokens: i64, cached_tokens: i64) -> f64 {
    let Some(entry) = pricing.get(model) else {
        return 0.0;
    };
    (prompt_tokens as f64 / 1000.0) * entry.input_per_1k
        + (completion_tokens as f64 / 1000.0) * entry.output_per_1k
        + (cached_tokens as f64 / 1000.0) * entry.cached_per_1k
}

/// Layers admin-supplied overrides on top of the default table, returning a
/// new map. The default table itself is never mutated.
pub fn merge_pricing(base: &PricingMap, overrides: &PricingMap) -> PricingMap {
    let mut merged = base.clone();
    for (model, entry) in overrides {
        merged.insert(model.clone(), entry.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_costs_zero() {
        let pricing = default_pricing();
        assert_eq!(cost_usd(&pricing, "does-not-exist", 1000, 1000, 0), 0.0);
    }

    #[test]
    fn known_model_computes_linear_cost() {
        let pricing = default_pricing();
        let cost = cost_usd(&pricing, "mock-1", 1000, 1000, 0);
        assert!((cost - (0.0005 + 0.0015)).abs() < 1e-9);
    }

    #[test]
    fn merge_overlays_without_mutating_base() {
        let base = default_pricing();
        let mut overrides = PricingMap::new();
        overrides.insert("mock-1".to_string(), PricingEntry::new(1.0, 1.0, 1.0));
        let merged = merge_pricing(&base, &overrides);

        assert_eq!(merged.get("mock-1").unwrap().input_per_1k, 1.0);
        assert!(base.get("mock-1").unwrap().input_per_1k < 1.0);
        assert!(merged.contains_key("mock-2"));
    }
}
