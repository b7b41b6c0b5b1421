//! HITL engine: pause policy, state capture, one-shot resume.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use forge_domain::agent::HitlLevel;
use forge_domain::error::{Error, Result};
use forge_domain::stream::Usage;
use forge_domain::tool::{Message, ToolCall, ToolSpec};
use forge_store::HitlStore;

/// Everything needed to continue a suspended loop from another process
/// instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseState {
    pub session_id: String,
    pub user_id: String,
    pub agent_id: Option<String>,
    /// The gated tool call.
    pub tool: String,
    pub call_id: String,
    pub args: Value,
    /// `Some` when the tool already ran and a verifier blocked the
    /// result; `None` when the pause fired before dispatch.
    pub result: Option<Value>,
    /// Working conversation at the pause point.
    pub messages: Vec<Message>,
    /// Tool calls from the same model turn that never ran.
    pub remaining: Vec<ToolCall>,
    pub usage: Usage,
}

pub struct HitlEngine {
    store: Arc<dyn HitlStore>,
}

impl HitlEngine {
    pub fn new(store: Arc<dyn HitlStore>) -> Self {
        Self { store }
    }

    /// The pause decision for one tool call.
    pub fn should_pause(level: HitlLevel, spec: &ToolSpec) -> bool {
        match level {
            HitlLevel::Autonomous => false,
            HitlLevel::Cautious => spec.requires_confirmation,
            HitlLevel::Standard => {
                spec.requires_confirmation || is_mutating_method(spec)
            }
            HitlLevel::Paranoid => true,
        }
    }

    /// Persist the captured state under a fresh opaque token.
    pub async fn pause(&self, state: &PauseState, ttl_ms: u64) -> Result<String> {
        let token = format!("rt-{}", uuid::Uuid::new_v4().simple());
        let expires_at = Utc::now() + Duration::milliseconds(ttl_ms as i64);
        self.store
            .put(&token, &serde_json::to_value(state)?, expires_at)
            .await?;
        tracing::info!(
            session_id = %state.session_id,
            tool = %state.tool,
            ttl_ms,
            "loop paused for human review"
        );
        Ok(token)
    }

    /// Fetch-and-delete the state. A second call with the same token
    /// fails, as does an expired one.
    pub async fn resume(&self, token: &str) -> Result<PauseState> {
        match self.store.take(token).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Err(Error::NotFound("resume token unknown or expired".into())),
        }
    }
}

fn is_mutating_method(spec: &ToolSpec) -> bool {
    spec.mcp_routing
        .as_ref()
        .map(|r| {
            matches!(
                r.method.to_ascii_uppercase().as_str(),
                "POST" | "PUT" | "PATCH" | "DELETE"
            )
        })
        .unwrap_or(false)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use forge_domain::tool::McpRouting;
    use forge_store::hitl::MemoryHitlStore;

    fn spec(method: Option<&str>, requires_confirmation: bool) -> ToolSpec {
        ToolSpec {
            name: "t".into(),
            requires_confirmation,
            mcp_routing: method.map(|m| McpRouting {
                endpoint: "http://localhost:9000/x".into(),
                method: m.into(),
            }),
            ..ToolSpec::default()
        }
    }

    #[test]
    fn autonomous_never_pauses() {
        assert!(!HitlEngine::should_pause(
            HitlLevel::Autonomous,
            &spec(Some("DELETE"), true)
        ));
    }

    #[test]
    fn cautious_pauses_only_on_confirmation_flag() {
        assert!(HitlEngine::should_pause(
            HitlLevel::Cautious,
            &spec(None, true)
        ));
        assert!(!HitlEngine::should_pause(
            HitlLevel::Cautious,
            &spec(Some("DELETE"), false)
        ));
    }

    #[test]
    fn standard_pauses_on_mutating_methods() {
        for method in ["POST", "PUT", "PATCH", "DELETE", "post"] {
            assert!(
                HitlEngine::should_pause(HitlLevel::Standard, &spec(Some(method), false)),
                "{method} should pause at standard"
            );
        }
        assert!(!HitlEngine::should_pause(
            HitlLevel::Standard,
            &spec(Some("GET"), false)
        ));
        assert!(HitlEngine::should_pause(
            HitlLevel::Standard,
            &spec(Some("GET"), true)
        ));
    }

    #[test]
    fn paranoid_always_pauses() {
        assert!(HitlEngine::should_pause(
            HitlLevel::Paranoid,
            &spec(None, false)
        ));
    }

    fn state() -> PauseState {
        PauseState {
            session_id: "s1".into(),
            user_id: "u1".into(),
            agent_id: None,
            tool: "dangerous_tool".into(),
            call_id: "tc-1".into(),
            args: serde_json::json!({}),
            result: None,
            messages: vec![Message::user("hi")],
            remaining: Vec::new(),
            usage: Usage::default(),
        }
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips() {
        let engine = HitlEngine::new(Arc::new(MemoryHitlStore::new()));
        let token = engine.pause(&state(), 300_000).await.unwrap();
        assert!(token.starts_with("rt-"));

        let restored = engine.resume(&token).await.unwrap();
        assert_eq!(restored.tool, "dangerous_tool");
        assert_eq!(restored.session_id, "s1");
    }

    #[tokio::test]
    async fn resume_is_single_use() {
        let engine = HitlEngine::new(Arc::new(MemoryHitlStore::new()));
        let token = engine.pause(&state(), 300_000).await.unwrap();
        engine.resume(&token).await.unwrap();
        assert!(engine.resume(&token).await.is_err());
    }

    #[tokio::test]
    async fn expired_pause_cannot_resume() {
        let engine = HitlEngine::new(Arc::new(MemoryHitlStore::new()));
        let token = engine.pause(&state(), 0).await.unwrap();
        assert!(engine.resume(&token).await.is_err());
    }

    #[tokio::test]
    async fn unknown_token_fails() {
        let engine = HitlEngine::new(Arc::new(MemoryHitlStore::new()));
        assert!(engine.resume("rt-nope").await.is_err());
    }
}
