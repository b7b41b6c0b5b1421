//! Registry store: agents, user preferences, prompt versions, the tool
//! registry, and verifier bindings.
//!
//! Lives in the primary database (`database.type`): SQLite or Postgres.
//! Handlers load what they need per request; there is no long-lived
//! in-memory mirror apart from the verifier index the pipeline builds.

mod postgres;
mod sqlite;

pub use postgres::PostgresRegistry;
pub use sqlite::SqliteRegistry;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forge_domain::agent::{AgentRecord, UserPreferences};
use forge_domain::config::{AgentSeed, DatabaseConfig, DatabaseKind};
use forge_domain::error::Result;
use forge_domain::tool::RegistryTool;
use forge_domain::verifier::{Verifier, VerifierBinding};

/// A stored system-prompt version. At most one row is active at any
/// instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptVersion {
    pub id: i64,
    pub version: String,
    pub content: String,
    pub notes: String,
    pub is_active: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait RegistryStore: Send + Sync {
    // ── Agents ──────────────────────────────────────────────────────

    /// Apply configuration seeds. Rows an admin has edited
    /// (`seeded_from_config = false`) are left untouched.
    async fn seed_agents(&self, seeds: &[AgentSeed]) -> Result<()>;
    async fn list_agents(&self) -> Result<Vec<AgentRecord>>;
    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>>;
    async fn default_agent(&self) -> Result<Option<AgentRecord>>;
    /// Insert or update an agent. A row with `is_default = true`
    /// atomically clears every other default flag.
    async fn upsert_agent(&self, record: &AgentRecord) -> Result<()>;

    // ── User preferences ────────────────────────────────────────────

    async fn get_preferences(&self, user_id: &str) -> Result<UserPreferences>;
    async fn set_preferences(&self, user_id: &str, prefs: &UserPreferences) -> Result<()>;

    // ── Prompt versions ─────────────────────────────────────────────

    async fn list_prompt_versions(&self) -> Result<Vec<PromptVersion>>;
    async fn create_prompt_version(
        &self,
        version: &str,
        content: &str,
        notes: &str,
    ) -> Result<i64>;
    async fn active_prompt_version(&self) -> Result<Option<PromptVersion>>;
    /// Activate one version, deactivating every other row in the same
    /// statement. Returns false when the id does not exist.
    async fn activate_prompt_version(&self, id: i64) -> Result<bool>;

    // ── Tool registry ───────────────────────────────────────────────

    async fn promoted_tools(&self) -> Result<Vec<RegistryTool>>;
    async fn upsert_tool(&self, tool: &RegistryTool) -> Result<()>;

    // ── Verifiers ───────────────────────────────────────────────────

    async fn list_verifiers(&self) -> Result<Vec<Verifier>>;
    async fn upsert_verifier(&self, verifier: &Verifier) -> Result<()>;
    async fn list_bindings(&self) -> Result<Vec<VerifierBinding>>;
    async fn bind_verifier(&self, verifier_name: &str, tool_name: &str) -> Result<()>;
    async fn unbind_verifier(&self, verifier_name: &str, tool_name: &str) -> Result<bool>;
}

/// Construct the configured registry backend.
pub async fn open_registry(cfg: &DatabaseConfig) -> Result<Arc<dyn RegistryStore>> {
    Ok(match cfg.kind {
        DatabaseKind::Sqlite => Arc::new(SqliteRegistry::open(&cfg.url)?),
        DatabaseKind::Postgres => Arc::new(PostgresRegistry::connect(&cfg.url).await?),
    })
}

/// Build the registry row for a seed.
pub(crate) fn record_from_seed(seed: &AgentSeed) -> AgentRecord {
    AgentRecord {
        agent_id: seed.id.clone(),
        display_name: seed.display_name.clone(),
        system_prompt: seed.system_prompt.clone(),
        default_model: seed.default_model.clone(),
        default_hitl_level: seed.default_hitl_level,
        allow_user_model_select: seed.allow_user_model_select.unwrap_or(false),
        allow_user_hitl_config: seed.allow_user_hitl_config.unwrap_or(false),
        tool_allowlist: seed.allowlist_raw(),
        max_turns: seed.max_turns,
        max_tokens: seed.max_tokens,
        enabled: true,
        is_default: seed.is_default,
        seeded_from_config: true,
    }
}
