//! SQLite conversation store.
//!
//! One connection behind a mutex; queries here are short and the
//! sidecar's per-request loop is serial, so connection pooling buys
//! nothing. Ordering ties on `created_at` break on the rowid so
//! histories stay stable even within one millisecond.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use super::{ConversationStore, IncompleteSession, Turn, COMPLETE_SENTINEL};
use forge_domain::error::{Error, Result};

pub struct SqliteConversationStore {
    conn: Mutex<Connection>,
}

impl SqliteConversationStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Store(format!("open sqlite {path}: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Store(format!("open sqlite :memory:: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS conversations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id TEXT NOT NULL,
                    stage TEXT NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    agent_id TEXT,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_conversations_session
                    ON conversations(session_id, created_at);
                "#,
            )
            .map_err(store_err)
    }
}

fn store_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}

fn parse_ts(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn persist_message(
        &self,
        session_id: &str,
        stage: &str,
        role: &str,
        content: &str,
        agent_id: Option<&str>,
    ) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO conversations (session_id, stage, role, content, agent_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session_id,
                    stage,
                    role,
                    content,
                    agent_id,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    async fn get_history(&self, session_id: &str) -> Result<Vec<Turn>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT session_id, stage, role, content, agent_id, created_at
                 FROM conversations WHERE session_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok(Turn {
                    session_id: row.get(0)?,
                    stage: row.get(1)?,
                    role: row.get(2)?,
                    content: row.get(3)?,
                    agent_id: row.get(4)?,
                    created_at: parse_ts(row.get(5)?),
                })
            })
            .map_err(store_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)
    }

    async fn get_incomplete_sessions(&self) -> Result<Vec<IncompleteSession>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT c.session_id,
                        (SELECT stage FROM conversations
                         WHERE session_id = c.session_id
                         ORDER BY created_at DESC, id DESC LIMIT 1),
                        MAX(c.created_at)
                 FROM conversations c
                 GROUP BY c.session_id
                 HAVING COALESCE(
                    (SELECT content FROM conversations
                     WHERE session_id = c.session_id AND role = 'system'
                     ORDER BY created_at DESC, id DESC LIMIT 1), '') != ?1
                 ORDER BY c.session_id",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![COMPLETE_SENTINEL], |row| {
                Ok(IncompleteSession {
                    session_id: row.get(0)?,
                    stage: row.get(1)?,
                    last_updated: parse_ts(row.get(2)?),
                })
            })
            .map_err(store_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persist_then_history_round_trips() {
        let store = SqliteConversationStore::open_in_memory().unwrap();
        let sid = store.create_session();
        store
            .persist_message(&sid, "plan", "user", "hello there", None)
            .await
            .unwrap();
        store
            .persist_message(&sid, "loop", "assistant", "hi", Some("helper"))
            .await
            .unwrap();

        let history = store.get_history(&sid).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].stage, "plan");
        assert_eq!(history[0].content, "hello there");
        assert_eq!(history[1].agent_id.as_deref(), Some("helper"));
    }

    #[tokio::test]
    async fn history_ordering_is_stable_within_same_timestamp() {
        let store = SqliteConversationStore::open_in_memory().unwrap();
        let sid = store.create_session();
        // Same-millisecond inserts must still read back in insert order.
        for i in 0..20 {
            store
                .persist_message(&sid, "loop", "user", &format!("m{i}"), None)
                .await
                .unwrap();
        }
        let history = store.get_history(&sid).await.unwrap();
        let contents: Vec<_> = history.iter().map(|t| t.content.as_str()).collect();
        let expected: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
        assert_eq!(contents, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn unknown_session_is_empty() {
        let store = SqliteConversationStore::open_in_memory().unwrap();
        assert!(store.get_history("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn incomplete_sessions_follow_latest_system_turn() {
        let store = SqliteConversationStore::open_in_memory().unwrap();
        let s1 = store.create_session();
        let s2 = store.create_session();
        store
            .persist_message(&s1, "loop", "user", "hi", None)
            .await
            .unwrap();
        store
            .persist_message(&s2, "loop", "user", "hi", None)
            .await
            .unwrap();
        store
            .persist_message(&s2, "done", "system", COMPLETE_SENTINEL, None)
            .await
            .unwrap();

        let incomplete = store.get_incomplete_sessions().await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].session_id, s1);
        assert_eq!(incomplete[0].stage, "loop");
    }

    #[tokio::test]
    async fn reopened_session_is_incomplete_again() {
        let store = SqliteConversationStore::open_in_memory().unwrap();
        let sid = store.create_session();
        store
            .persist_message(&sid, "done", "system", COMPLETE_SENTINEL, None)
            .await
            .unwrap();
        assert!(store.get_incomplete_sessions().await.unwrap().is_empty());

        store
            .persist_message(&sid, "loop", "system", "resumed", None)
            .await
            .unwrap();
        assert_eq!(store.get_incomplete_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conv.db");
        let path = path.to_str().unwrap();

        let sid = {
            let store = SqliteConversationStore::open(path).unwrap();
            let sid = store.create_session();
            store
                .persist_message(&sid, "loop", "user", "persist me", None)
                .await
                .unwrap();
            sid
        };

        let store = SqliteConversationStore::open(path).unwrap();
        let history = store.get_history(&sid).await.unwrap();
        assert_eq!(history[0].content, "persist me");
    }
}
