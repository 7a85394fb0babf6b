//! Durable storage and KV-backed cache/rate-limit state for the LLM
//! gateway. Everything here owns either the relational DB or the KV store;
//! process-local health state lives in `gateway-core` instead.

pub mod cache;
pub mod store;

pub use cache::{Cache, CacheError, InMemoryCache, RedisCache};
pub use store::{DailyUsage, SqliteStore, Store, StoreError};
