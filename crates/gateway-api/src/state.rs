//! Shared process state threaded through every handler and middleware
//! stage via axum's `State` extractor.

use std::collections::HashMap;
use std::sync::Arc;

use gateway_core::health::HealthTracker;
use gateway_core::pricing::{self, PricingMap};
use gateway_core::provider::Provider;
use gateway_store::{Cache, Store};
use parking_lot::RwLock;

use crate::config::AppConfig;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn Cache>,
    pub health: Arc<HealthTracker>,
    /// Keyed by routing's provider name (`"primary"` / `"fallback"`).
    pub providers: HashMap<String, Arc<dyn Provider>>,
    pub pricing: RwLock<PricingMap>,
    pub config: Arc<AppConfig>,
    /// Process-secret used to key the API-key digest. Derived from
    /// `ADMIN_API_KEY` rather than generated fresh at startup, so key
    /// hashes already on disk remain valid across restarts.
    pub key_salt: String,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        health: Arc<HealthTracker>,
        providers: HashMap<String, Arc<dyn Provider>>,
        config: Arc<AppConfig>,
    ) -> Self {
        let key_salt = config.admin_api_key.clone();
        AppState {
            store,
            cache,
            health,
            providers,
            pricing: RwLock::new(pricing::default_pricing()),
            config,
            key_salt,
        }
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }
}
