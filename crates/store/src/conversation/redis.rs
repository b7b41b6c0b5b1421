//! Redis conversation store.
//!
//! Each session is one list of JSON-encoded turns under `conv:{id}`.
//! Entries carry the configured TTL, refreshed on every append; the
//! SQL backends never expire.

use redis::AsyncCommands;

use super::{summarize_if_incomplete, ConversationStore, IncompleteSession, Turn};
use forge_domain::error::{Error, Result};

const KEY_PREFIX: &str = "conv:";

pub struct RedisConversationStore {
    client: redis::Client,
    ttl_seconds: u64,
}

impl RedisConversationStore {
    pub fn connect(url: &str, ttl_seconds: u64) -> Result<Self> {
        let client = redis::Client::open(url).map_err(store_err)?;
        Ok(Self {
            client,
            ttl_seconds,
        })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_err)
    }

    fn key(session_id: &str) -> String {
        format!("{KEY_PREFIX}{session_id}")
    }

    async fn load_turns(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        key: &str,
    ) -> Result<Vec<Turn>> {
        let raw: Vec<String> = conn.lrange(key, 0, -1).await.map_err(store_err)?;
        let mut turns = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<Turn>(&entry) {
                Ok(turn) => turns.push(turn),
                Err(e) => {
                    tracing::warn!(key, error = %e, "skipping undecodable turn");
                }
            }
        }
        Ok(turns)
    }
}

fn store_err(e: redis::RedisError) -> Error {
    Error::Store(e.to_string())
}

#[async_trait::async_trait]
impl ConversationStore for RedisConversationStore {
    async fn persist_message(
        &self,
        session_id: &str,
        stage: &str,
        role: &str,
        content: &str,
        agent_id: Option<&str>,
    ) -> Result<()> {
        let turn = Turn {
            session_id: session_id.to_owned(),
            stage: stage.to_owned(),
            role: role.to_owned(),
            content: content.to_owned(),
            agent_id: agent_id.map(str::to_owned),
            created_at: chrono::Utc::now(),
        };
        let payload = serde_json::to_string(&turn)?;
        let key = Self::key(session_id);

        let mut conn = self.conn().await?;
        let _: i64 = conn.rpush(&key, payload).await.map_err(store_err)?;
        let _: bool = conn
            .expire(&key, self.ttl_seconds as i64)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn get_history(&self, session_id: &str) -> Result<Vec<Turn>> {
        let mut conn = self.conn().await?;
        self.load_turns(&mut conn, &Self::key(session_id)).await
    }

    async fn get_incomplete_sessions(&self) -> Result<Vec<IncompleteSession>> {
        let mut conn = self.conn().await?;
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{KEY_PREFIX}*"))
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        let mut out = Vec::new();
        for key in keys {
            let turns = self.load_turns(&mut conn, &key).await?;
            if let Some(summary) = summarize_if_incomplete(&turns) {
                out.push(summary);
            }
        }
        out.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(out)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
