//! HITL pause-state store.
//!
//! A paused loop is a row: opaque token -> serialized state, with an
//! expiry. `take` is the only read and it deletes — resume is single
//! use by construction. Backend priority at construction: Redis >
//! Postgres > SQLite > in-memory.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use sqlx::{PgPool, Row};

use forge_domain::config::{Config, ConversationBackend, DatabaseKind};
use forge_domain::error::{Error, Result};

/// One-shot KV for suspended loop state. Entries may expire between
/// pause and resume; callers treat every `take` miss the same way.
#[async_trait::async_trait]
pub trait HitlStore: Send + Sync {
    async fn put(&self, token: &str, state: &Value, expires_at: DateTime<Utc>) -> Result<()>;

    /// Atomically fetch and delete. Absent or expired entries return
    /// `None`.
    async fn take(&self, token: &str) -> Result<Option<Value>>;
}

/// Pick the first available backend for the deployment's configuration.
pub async fn open_hitl_store(cfg: &Config) -> Result<Arc<dyn HitlStore>> {
    if cfg.conversation.store == ConversationBackend::Redis {
        return Ok(Arc::new(RedisHitlStore::connect(&cfg.conversation.redis.url)?));
    }
    match cfg.database.kind {
        DatabaseKind::Postgres => Ok(Arc::new(
            PostgresHitlStore::connect(&cfg.database.url).await?,
        )),
        DatabaseKind::Sqlite => Ok(Arc::new(SqliteHitlStore::open(&cfg.database.url)?)),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct MemoryHitlStore {
    entries: Mutex<HashMap<String, (Value, DateTime<Utc>)>>,
}

impl MemoryHitlStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl HitlStore for MemoryHitlStore {
    async fn put(&self, token: &str, state: &Value, expires_at: DateTime<Utc>) -> Result<()> {
        self.entries
            .lock()
            .insert(token.to_owned(), (state.clone(), expires_at));
        Ok(())
    }

    async fn take(&self, token: &str) -> Result<Option<Value>> {
        let entry = self.entries.lock().remove(token);
        Ok(entry.and_then(|(state, expires_at)| (Utc::now() < expires_at).then_some(state)))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SQLite
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SqliteHitlStore {
    conn: Mutex<Connection>,
}

impl SqliteHitlStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Store(format!("open sqlite {path}: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS hitl_pauses (
                token TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )",
        )
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }
}

#[async_trait::async_trait]
impl HitlStore for SqliteHitlStore {
    async fn put(&self, token: &str, state: &Value, expires_at: DateTime<Utc>) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO hitl_pauses (token, state, expires_at)
                 VALUES (?1, ?2, ?3)",
                params![token, state.to_string(), expires_at.to_rfc3339()],
            )
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    async fn take(&self, token: &str) -> Result<Option<Value>> {
        // The connection mutex makes the select+delete pair atomic
        // process-wide; a second resume never sees the row.
        let conn = self.conn.lock();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT state, expires_at FROM hitl_pauses WHERE token = ?1",
                params![token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| Error::Store(e.to_string()))?;

        let Some((state, expires_at)) = row else {
            return Ok(None);
        };
        conn.execute("DELETE FROM hitl_pauses WHERE token = ?1", params![token])
            .map_err(|e| Error::Store(e.to_string()))?;

        let expired = DateTime::parse_from_rfc3339(&expires_at)
            .map(|t| Utc::now() >= t.with_timezone(&Utc))
            .unwrap_or(true);
        if expired {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&state)?))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Postgres
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PostgresHitlStore {
    pool: PgPool,
}

impl PostgresHitlStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(url)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS hitl_pauses (
                token TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl HitlStore for PostgresHitlStore {
    async fn put(&self, token: &str, state: &Value, expires_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO hitl_pauses (token, state, expires_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (token) DO UPDATE SET
                state = EXCLUDED.state, expires_at = EXCLUDED.expires_at",
        )
        .bind(token)
        .bind(state.to_string())
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    async fn take(&self, token: &str) -> Result<Option<Value>> {
        let row = sqlx::query(
            "DELETE FROM hitl_pauses WHERE token = $1 RETURNING state, expires_at",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        let Some(row) = row else { return Ok(None) };
        let expires_at: DateTime<Utc> = row.get("expires_at");
        if Utc::now() >= expires_at {
            return Ok(None);
        }
        let state: String = row.get("state");
        Ok(Some(serde_json::from_str(&state)?))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Redis
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RedisHitlStore {
    client: redis::Client,
}

impl RedisHitlStore {
    pub fn connect(url: &str) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(url).map_err(|e| Error::Store(e.to_string()))?,
        })
    }

    fn key(token: &str) -> String {
        format!("hitl:{token}")
    }
}

#[async_trait::async_trait]
impl HitlStore for RedisHitlStore {
    async fn put(&self, token: &str, state: &Value, expires_at: DateTime<Utc>) -> Result<()> {
        let ttl_ms = (expires_at - Utc::now()).num_milliseconds().max(1) as u64;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        let _: () = redis::cmd("SET")
            .arg(Self::key(token))
            .arg(state.to_string())
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    async fn take(&self, token: &str) -> Result<Option<Value>> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        // GETDEL makes the fetch-and-delete a single server-side step;
        // expiry is Redis's own TTL.
        let raw: Option<String> = redis::cmd("GETDEL")
            .arg(Self::key(token))
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn state() -> Value {
        serde_json::json!({"sessionId": "s1", "tool": "dangerous_tool"})
    }

    #[tokio::test]
    async fn memory_take_is_single_use() {
        let store = MemoryHitlStore::new();
        store
            .put("rt-1", &state(), Utc::now() + Duration::minutes(5))
            .await
            .unwrap();
        assert!(store.take("rt-1").await.unwrap().is_some());
        assert!(store.take("rt-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_expired_entry_is_gone() {
        let store = MemoryHitlStore::new();
        store
            .put("rt-1", &state(), Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        assert!(store.take("rt-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sqlite_take_is_single_use() {
        let store = SqliteHitlStore::open_in_memory().unwrap();
        store
            .put("rt-2", &state(), Utc::now() + Duration::minutes(5))
            .await
            .unwrap();
        let got = store.take("rt-2").await.unwrap().unwrap();
        assert_eq!(got["tool"], "dangerous_tool");
        assert!(store.take("rt-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sqlite_expired_entry_is_invalid() {
        let store = SqliteHitlStore::open_in_memory().unwrap();
        store
            .put("rt-3", &state(), Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        assert!(store.take("rt-3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_token_is_none() {
        let store = MemoryHitlStore::new();
        assert!(store.take("missing").await.unwrap().is_none());
    }
}
