//! In-process conversation store. Backs tests and nothing else.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;

use super::{summarize_if_incomplete, ConversationStore, IncompleteSession, Turn};
use forge_domain::error::Result;

#[derive(Default)]
pub struct MemoryConversationStore {
    sessions: RwLock<HashMap<String, Vec<Turn>>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ConversationStore for MemoryConversationStore {
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
            created_at: Utc::now(),
        };
        self.sessions
            .write()
            .entry(session_id.to_owned())
            .or_default()
            .push(turn);
        Ok(())
    }

    async fn get_history(&self, session_id: &str) -> Result<Vec<Turn>> {
        Ok(self
            .sessions
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_incomplete_sessions(&self) -> Result<Vec<IncompleteSession>> {
        let sessions = self.sessions.read();
        let mut out: Vec<IncompleteSession> = sessions
            .values()
            .filter_map(|turns| summarize_if_incomplete(turns))
            .collect();
        out.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(out)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
