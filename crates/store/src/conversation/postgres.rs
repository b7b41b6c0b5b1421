//! Postgres conversation store.
//!
//! The schema is created lazily on first write so a read-only replica
//! pointed at an empty database does not fail at boot.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::OnceCell;

use super::{ConversationStore, IncompleteSession, Turn, COMPLETE_SENTINEL};
use forge_domain::error::{Error, Result};

pub struct PostgresConversationStore {
    pool: PgPool,
    schema: OnceCell<()>,
}

impl PostgresConversationStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(url)
            .await
            .map_err(store_err)?;
        Ok(Self {
            pool,
            schema: OnceCell::new(),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema
            .get_or_try_init(|| async {
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS conversations (
                        id BIGSERIAL PRIMARY KEY,
                        session_id TEXT NOT NULL,
                        stage TEXT NOT NULL,
                        role TEXT NOT NULL,
                        content TEXT NOT NULL,
                        agent_id TEXT,
                        created_at TIMESTAMPTZ NOT NULL
                    )",
                )
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_conversations_session
                     ON conversations(session_id, created_at)",
                )
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }
}

fn store_err(e: sqlx::Error) -> Error {
    Error::Store(e.to_string())
}

#[async_trait::async_trait]
impl ConversationStore for PostgresConversationStore {
    async fn persist_message(
        &self,
        session_id: &str,
        stage: &str,
        role: &str,
        content: &str,
        agent_id: Option<&str>,
    ) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query(
            "INSERT INTO conversations (session_id, stage, role, content, agent_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(session_id)
        .bind(stage)
        .bind(role)
        .bind(content)
        .bind(agent_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get_history(&self, session_id: &str) -> Result<Vec<Turn>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            "SELECT session_id, stage, role, content, agent_id, created_at
             FROM conversations WHERE session_id = $1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|row| Turn {
                session_id: row.get("session_id"),
                stage: row.get("stage"),
                role: row.get("role"),
                content: row.get("content"),
                agent_id: row.get("agent_id"),
                created_at: row.get::<DateTime<Utc>, _>("created_at"),
            })
            .collect())
    }

    async fn get_incomplete_sessions(&self) -> Result<Vec<IncompleteSession>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            "SELECT c.session_id,
                    (SELECT stage FROM conversations
                     WHERE session_id = c.session_id
                     ORDER BY created_at DESC, id DESC LIMIT 1) AS stage,
                    MAX(c.created_at) AS last_updated
             FROM conversations c
             GROUP BY c.session_id
             HAVING COALESCE(
                (SELECT content FROM conversations
                 WHERE session_id = c.session_id AND role = 'system'
                 ORDER BY created_at DESC, id DESC LIMIT 1), '') != $1
             ORDER BY c.session_id",
        )
        .bind(COMPLETE_SENTINEL)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|row| IncompleteSession {
                session_id: row.get("session_id"),
                stage: row.get("stage"),
                last_updated: row.get::<DateTime<Utc>, _>("last_updated"),
            })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
