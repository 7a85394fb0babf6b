//! Durable storage (C10 persistence layer): tenants, API keys, requests,
//! usage events, and the admin audit log, backed by SQLite.
//!
//! Connections are not pooled: one `Mutex<Connection>` is shared across the
//! process, matching the gateway's "no suspension inside a held lock"
//! concurrency model — every method here does its SQLite work and releases
//! the lock before returning.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use gateway_core::models::{AdminAction, ApiKey, RequestRecord, Tenant, Tier, UsageEvent};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),
}

/// Daily usage aggregate for the quota guard (C9).
#[derive(Debug, Clone, Copy, Default)]
pub struct DailyUsage {
    pub tokens: i64,
    pub cost_usd: f64,
}

/// Durable entities: tenants, keys, requests, usage, and the audit trail.
/// Implementations must serialize concurrent writers at least as strictly
/// as SQLite's own transaction semantics.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_tenant(&self, name: &str, tier: Tier) -> Result<Tenant, StoreError>;
    async fn get_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>, StoreError>;
    async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>, StoreError>;
    async fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError>;
    async fn set_tenant_limits(&self, tenant_id: Uuid, token_limit_per_day: Option<i64>, spend_limit_per_day_usd: Option<f64>) -> Result<(), StoreError>;

    async fn create_key(&self, key: &ApiKey) -> Result<(), StoreError>;
    async fn get_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError>;
    async fn get_key_by_tenant_and_name(&self, tenant_id: Uuid, name: &str) -> Result<Option<ApiKey>, StoreError>;
    async fn list_keys_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<ApiKey>, StoreError>;
    async fn revoke_key(&self, id: Uuid, reason: Option<String>) -> Result<(), StoreError>;
    async fn deactivate_all_keys_for_tenant(&self, tenant_id: Uuid) -> Result<(), StoreError>;
    async fn touch_last_used(&self, id: Uuid) -> Result<(), StoreError>;

    async fn insert_request(&self, request: &RequestRecord) -> Result<(), StoreError>;
    async fn finalize_request(&self, request: &RequestRecord) -> Result<(), StoreError>;

    async fn insert_usage_event(&self, event: &UsageEvent) -> Result<(), StoreError>;
    async fn daily_usage(&self, tenant_id: Uuid, date: NaiveDate) -> Result<DailyUsage, StoreError>;

    async fn append_admin_action(&self, action: &AdminAction) -> Result<(), StoreError>;
}

/// Opens (and migrates) a SQLite database at `path`, or an anonymous
/// in-memory database when `path` is `:memory:`.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(SqliteStore { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(SqliteStore { conn: Arc::new(Mutex::new(conn)) })
    }
}

fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS tenants (
            id TEXT PRIMARY KEY,
            name TEXT UNIQUE NOT NULL,
            tier TEXT NOT NULL,
            created_at TEXT NOT NULL,
            token_limit_per_day INTEGER,
            spend_limit_per_day_usd REAL
        );

        CREATE TABLE IF NOT EXISTS api_keys (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            name TEXT NOT NULL,
            key_hash TEXT UNIQUE NOT NULL,
            active INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            created_by TEXT,
            last_used_at TEXT,
            revoked_at TEXT,
            revoked_reason TEXT,
            FOREIGN KEY (tenant_id) REFERENCES tenants(id),
            UNIQUE (tenant_id, name)
        );

        CREATE TABLE IF NOT EXISTS requests (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            model TEXT NOT NULL,
            status TEXT NOT NULL,
            request_payload TEXT NOT NULL,
            response_payload TEXT,
            latency_ms INTEGER,
            prompt_tokens INTEGER,
            completion_tokens INTEGER,
            total_tokens INTEGER,
            cost_usd REAL,
            created_at TEXT NOT NULL,
            completed_at TEXT,
            FOREIGN KEY (tenant_id) REFERENCES tenants(id)
        );

        CREATE INDEX IF NOT EXISTS idx_requests_tenant ON requests(tenant_id);

        CREATE TABLE IF NOT EXISTS usage_events (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            request_id TEXT NOT NULL,
            model TEXT NOT NULL,
            tokens INTEGER NOT NULL,
            cost_usd REAL NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (tenant_id) REFERENCES tenants(id),
            FOREIGN KEY (request_id) REFERENCES requests(id)
        );

        CREATE INDEX IF NOT EXISTS idx_usage_tenant_created ON usage_events(tenant_id, created_at);

        CREATE TABLE IF NOT EXISTS admin_actions (
            id TEXT PRIMARY KEY,
            actor_tenant_id TEXT NOT NULL,
            action TEXT NOT NULL,
            target_type TEXT NOT NULL,
            target_id TEXT,
            metadata_json TEXT,
            created_at TEXT NOT NULL
        );
        "#,
    )
}

fn row_to_tenant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tenant> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let tier: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    Ok(Tenant {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        name,
        tier: tier.parse().unwrap_or(Tier::Free),
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        token_limit_per_day: row.get(4)?,
        spend_limit_per_day_usd: row.get(5)?,
    })
}

fn row_to_key(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApiKey> {
    let id: String = row.get(0)?;
    let tenant_id: String = row.get(1)?;
    let name: String = row.get(2)?;
    let key_hash: String = row.get(3)?;
    let active: i64 = row.get(4)?;
    let created_at: String = row.get(5)?;
    let created_by: Option<String> = row.get(6)?;
    let last_used_at: Option<String> = row.get(7)?;
    let revoked_at: Option<String> = row.get(8)?;
    let revoked_reason: Option<String> = row.get(9)?;

    Ok(ApiKey {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        tenant_id: Uuid::parse_str(&tenant_id).unwrap_or_default(),
        name,
        key_hash,
        active: active != 0,
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        created_by: created_by.and_then(|s| Uuid::parse_str(&s).ok()),
        last_used_at: last_used_at.and_then(|s| s.parse::<DateTime<Utc>>().ok()),
        revoked_at: revoked_at.and_then(|s| s.parse::<DateTime<Utc>>().ok()),
        revoked_reason,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_tenant(&self, name: &str, tier: Tier) -> Result<Tenant, StoreError> {
        let tenant = Tenant::new(name, tier);
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO tenants (id, name, tier, created_at, token_limit_per_day, spend_limit_per_day_usd) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                tenant.id.to_string(),
                tenant.name,
                tenant.tier.as_str(),
                tenant.created_at.to_rfc3339(),
                tenant.token_limit_per_day,
                tenant.spend_limit_per_day_usd,
            ],
        );

        match inserted {
            Ok(_) => Ok(tenant),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                Err(StoreError::Conflict(format!("tenant '{name}' already exists")))
            }
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    async fn get_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, tier, created_at, token_limit_per_day, spend_limit_per_day_usd FROM tenants WHERE name = ?1",
            params![name],
            row_to_tenant,
        )
        .optional()
        .map_err(StoreError::from)
    }

    async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, tier, created_at, token_limit_per_day, spend_limit_per_day_usd FROM tenants WHERE id = ?1",
            params![id.to_string()],
            row_to_tenant,
        )
        .optional()
        .map_err(StoreError::from)
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, tier, created_at, token_limit_per_day, spend_limit_per_day_usd FROM tenants ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], row_to_tenant)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
    }

    async fn set_tenant_limits(&self, tenant_id: Uuid, token_limit_per_day: Option<i64>, spend_limit_per_day_usd: Option<f64>) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE tenants SET token_limit_per_day = ?1, spend_limit_per_day_usd = ?2 WHERE id = ?3",
            params![token_limit_per_day, spend_limit_per_day_usd, tenant_id.to_string()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("tenant {tenant_id}")));
        }
        Ok(())
    }

    async fn create_key(&self, key: &ApiKey) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO api_keys (id, tenant_id, name, key_hash, active, created_at, created_by, last_used_at, revoked_at, revoked_reason) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                key.id.to_string(),
                key.tenant_id.to_string(),
                key.name,
                key.key_hash,
                key.active as i64,
                key.created_at.to_rfc3339(),
                key.created_by.map(|id| id.to_string()),
                key.last_used_at.map(|t| t.to_rfc3339()),
                key.revoked_at.map(|t| t.to_rfc3339()),
                key.revoked_reason,
            ],
        );

        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                Err(StoreError::Conflict(format!("key '{}' already exists for this tenant", key.name)))
            }
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    async fn get_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, tenant_id, name, key_hash, active, created_at, created_by, last_used_at, revoked_at, revoked_reason \
             FROM api_keys WHERE key_hash = ?1",
            params![key_hash],
            row_to_key,
        )
        .optional()
        .map_err(StoreError::from)
    }

    async fn get_key_by_tenant_and_name(&self, tenant_id: Uuid, name: &str) -> Result<Option<ApiKey>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, tenant_id, name, key_hash, active, created_at, created_by, last_used_at, revoked_at, revoked_reason \
             FROM api_keys WHERE tenant_id = ?1 AND name = ?2",
            params![tenant_id.to_string(), name],
            row_to_key,
        )
        .optional()
        .map_err(StoreError::from)
    }

    async fn list_keys_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<ApiKey>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, name, key_hash, active, created_at, created_by, last_used_at, revoked_at, revoked_reason \
             FROM api_keys WHERE tenant_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![tenant_id.to_string()], row_to_key)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
    }

    async fn revoke_key(&self, id: Uuid, reason: Option<String>) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let reason: Option<String> = reason.map(|r| r.chars().take(300).collect());
        let updated = conn.execute(
            "UPDATE api_keys SET active = 0, revoked_at = ?1, revoked_reason = ?2 WHERE id = ?3",
            params![Utc::now().to_rfc3339(), reason, id.to_string()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("key {id}")));
        }
        Ok(())
    }

    async fn deactivate_all_keys_for_tenant(&self, tenant_id: Uuid) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE api_keys SET active = 0, revoked_at = ?1, revoked_reason = 'rotated' WHERE tenant_id = ?2 AND active = 1",
            params![Utc::now().to_rfc3339(), tenant_id.to_string()],
        )?;
        Ok(())
    }

    async fn touch_last_used(&self, id: Uuid) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id.to_string()],
        )?;
        Ok(())
    }

    async fn insert_request(&self, request: &RequestRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO requests (id, tenant_id, model, status, request_payload, response_payload, latency_ms, \
             prompt_tokens, completion_tokens, total_tokens, cost_usd, created_at, completed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                request.id.to_string(),
                request.tenant_id.to_string(),
                request.model,
                request.status.as_str(),
                request.request_payload,
                request.response_payload,
                request.latency_ms,
                request.prompt_tokens,
                request.completion_tokens,
                request.total_tokens,
                request.cost_usd,
                request.created_at.to_rfc3339(),
                request.completed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    async fn finalize_request(&self, request: &RequestRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE requests SET status = ?1, response_payload = ?2, latency_ms = ?3, prompt_tokens = ?4, \
             completion_tokens = ?5, total_tokens = ?6, cost_usd = ?7, completed_at = ?8 WHERE id = ?9",
            params![
                request.status.as_str(),
                request.response_payload,
                request.latency_ms,
                request.prompt_tokens,
                request.completion_tokens,
                request.total_tokens,
                request.cost_usd,
                request.completed_at.map(|t| t.to_rfc3339()),
                request.id.to_string(),
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("request {}", request.id)));
        }
        Ok(())
    }

    async fn insert_usage_event(&self, event: &UsageEvent) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO usage_events (id, tenant_id, request_id, model, tokens, cost_usd, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.id.to_string(),
                event.tenant_id.to_string(),
                event.request_id.to_string(),
                event.model,
                event.tokens,
                event.cost_usd,
                event.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn daily_usage(&self, tenant_id: Uuid, date: NaiveDate) -> Result<DailyUsage, StoreError> {
        let conn = self.conn.lock();
        let day_prefix = date.format("%Y-%m-%d").to_string();
        let row = conn.query_row(
            "SELECT COALESCE(SUM(tokens), 0), COALESCE(SUM(cost_usd), 0.0) FROM usage_events \
             WHERE tenant_id = ?1 AND substr(created_at, 1, 10) = ?2",
            params![tenant_id.to_string(), day_prefix],
            |row| Ok(DailyUsage { tokens: row.get(0)?, cost_usd: row.get(1)? }),
        )?;
        Ok(row)
    }

    async fn append_admin_action(&self, action: &AdminAction) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO admin_actions (id, actor_tenant_id, action, target_type, target_id, metadata_json, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                action.id.to_string(),
                action.actor_tenant_id.to_string(),
                action.action,
                action.target_type,
                action.target_id,
                action.metadata_json,
                action.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}
