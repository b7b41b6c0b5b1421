//! Conversation store: append-only turns grouped by session.
//!
//! Sessions exist implicitly: a session id is minted by
//! [`ConversationStore::create_session`] and becomes durable with its
//! first persisted turn. Retrieval is always chronological; unknown
//! session ids read back as empty history.

mod memory;
mod postgres;
mod redis;
mod sqlite;

pub use memory::MemoryConversationStore;
pub use postgres::PostgresConversationStore;
pub use redis::RedisConversationStore;
pub use sqlite::SqliteConversationStore;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forge_domain::config::{ConversationBackend, ConversationConfig};
use forge_domain::error::Result;

/// A session is complete when its latest `system` turn carries this
/// sentinel.
pub const COMPLETE_SENTINEL: &str = "[COMPLETE]";

/// One stored turn of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub session_id: String,
    /// Free-form label for the ReAct phase that produced the turn.
    pub stage: String,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Summary row returned by [`ConversationStore::get_incomplete_sessions`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncompleteSession {
    pub session_id: String,
    pub stage: String,
    pub last_updated: DateTime<Utc>,
}

/// Pluggable persistence of turns.
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    /// Mint a new opaque session id. The id only becomes durable when a
    /// turn is persisted against it.
    fn create_session(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Append one turn. Writes are never cancelled mid-request.
    async fn persist_message(
        &self,
        session_id: &str,
        stage: &str,
        role: &str,
        content: &str,
        agent_id: Option<&str>,
    ) -> Result<()>;

    /// All turns of a session in chronological order. Unknown sessions
    /// return an empty vec.
    async fn get_history(&self, session_id: &str) -> Result<Vec<Turn>>;

    /// Sessions whose latest `system` turn is not the completion
    /// sentinel.
    async fn get_incomplete_sessions(&self) -> Result<Vec<IncompleteSession>>;

    /// Release held connections. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Construct the configured backend.
pub async fn open_conversation_store(
    cfg: &ConversationConfig,
    sqlite_path: &str,
    postgres_url: &str,
) -> Result<Arc<dyn ConversationStore>> {
    Ok(match cfg.store {
        ConversationBackend::Sqlite => Arc::new(SqliteConversationStore::open(sqlite_path)?),
        ConversationBackend::Postgres => {
            Arc::new(PostgresConversationStore::connect(postgres_url).await?)
        }
        ConversationBackend::Redis => Arc::new(RedisConversationStore::connect(
            &cfg.redis.url,
            cfg.redis.ttl_seconds,
        )?),
        ConversationBackend::Memory => Arc::new(MemoryConversationStore::new()),
    })
}

/// Shared helper: reduce a chronological turn list to the incomplete-
/// session predicate. Used by the backends that load turns wholesale
/// (memory, Redis).
pub(crate) fn summarize_if_incomplete(turns: &[Turn]) -> Option<IncompleteSession> {
    let last = turns.last()?;
    let latest_system = turns.iter().rev().find(|t| t.role == "system");
    if latest_system.is_some_and(|t| t.content == COMPLETE_SENTINEL) {
        return None;
    }
    Some(IncompleteSession {
        session_id: last.session_id.clone(),
        stage: last.stage.clone(),
        last_updated: last.created_at,
    })
}
