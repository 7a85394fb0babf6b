//! KV-backed cache: the response cache (C7) and the rate-limit counters
//! (C8) both live here, since both are volatile, TTL-bearing state owned by
//! the KV store rather than the relational DB.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use gateway_core::schemas::CacheEntry;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Advisory response cache plus per-minute counters. Implementations MUST
/// degrade to `Unavailable` rather than hang — the rate limiter fails
/// closed on this error, the response cache bypasses on it.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    async fn put_entry(&self, key: &str, entry: &CacheEntry, ttl_secs: u64) -> Result<(), CacheError>;

    /// Increments `key` by `amount`, applying `ttl_secs` only if this call
    /// created the key. Returns the counter's new value.
    async fn incr_with_ttl(&self, key: &str, amount: i64, ttl_secs: u64) -> Result<i64, CacheError>;
}

struct Entry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// In-process cache backed by a `DashMap`, for `REDIS_URL`-less
/// deployments and for tests. Expired entries are evicted lazily, on next
/// access to the same key.
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, Entry>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        InMemoryCache { entries: DashMap::new() }
    }

    fn get_live(&self, key: &str) -> Option<serde_json::Value> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.expires_at <= Instant::now(),
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.value.clone())
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self
            .get_live(key)
            .and_then(|v| serde_json::from_value(v).ok()))
    }

    async fn put_entry(&self, key: &str, entry: &CacheEntry, ttl_secs: u64) -> Result<(), CacheError> {
        let value = serde_json::to_value(entry).map_err(|e| CacheError::Unavailable(e.to_string()))?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn incr_with_ttl(&self, key: &str, amount: i64, ttl_secs: u64) -> Result<i64, CacheError> {
        let existing = self.get_live(key).and_then(|v| v.as_i64());
        let new_value = existing.unwrap_or(0) + amount;

        let expires_at = if existing.is_some() {
            self.entries.get(key).map(|e| e.expires_at).unwrap_or_else(|| Instant::now() + Duration::from_secs(ttl_secs))
        } else {
            Instant::now() + Duration::from_secs(ttl_secs)
        };

        self.entries.insert(
            key.to_string(),
            Entry {
                value: serde_json::Value::from(new_value),
                expires_at,
            },
        );
        Ok(new_value)
    }
}

/// Redis-backed cache for multi-process deployments. The connection is
/// lazily initialized once at startup and shared for the process lifetime.
pub struct RedisCache {
    manager: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url).map_err(|e| CacheError::Unavailable(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(RedisCache { manager })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.get(key).await.map_err(|e| CacheError::Unavailable(e.to_string()))?;
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| CacheError::Unavailable(e.to_string())),
            None => Ok(None),
        }
    }

    async fn put_entry(&self, key: &str, entry: &CacheEntry, ttl_secs: u64) -> Result<(), CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        let json = serde_json::to_string(entry).map_err(|e| CacheError::Unavailable(e.to_string()))?;
        conn.set_ex::<_, _, ()>(key, json, ttl_secs)
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }

    async fn incr_with_ttl(&self, key: &str, amount: i64, ttl_secs: u64) -> Result<i64, CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        let new_value: i64 = conn.incr(key, amount).await.map_err(|e| CacheError::Unavailable(e.to_string()))?;
        if new_value == amount {
            let _: () = conn
                .expire(key, ttl_secs as i64)
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        }
        Ok(new_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> CacheEntry {
        CacheEntry {
            response: "hello".to_string(),
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
            cost_usd: 0.001,
        }
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let cache = InMemoryCache::new();
        assert!(cache.get_entry("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let cache = InMemoryCache::new();
        cache.put_entry("k", &entry(), 60).await.unwrap();
        let got = cache.get_entry("k").await.unwrap().unwrap();
        assert_eq!(got.response, "hello");
        assert_eq!(got.total_tokens, 2);
    }

    #[tokio::test]
    async fn expired_entry_is_evicted() {
        let cache = InMemoryCache::new();
        cache.put_entry("k", &entry(), 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get_entry("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn incr_accumulates_within_ttl() {
        let cache = InMemoryCache::new();
        let first = cache.incr_with_ttl("bucket", 1, 60).await.unwrap();
        let second = cache.incr_with_ttl("bucket", 1, 60).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn s4_rate_limit_bucket_denies_past_threshold() {
        let cache = InMemoryCache::new();
        let mut last = 0;
        for _ in 0..61 {
            last = cache.incr_with_ttl("rl:req:tenant:0", 1, 60).await.unwrap();
        }
        assert_eq!(last, 61);
        assert!(last > 60);
    }
}
