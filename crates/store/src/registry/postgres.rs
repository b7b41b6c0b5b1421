//! Postgres registry backend. Mirrors the SQLite schema and semantics.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::OnceCell;

use super::{record_from_seed, PromptVersion, RegistryStore};
use forge_domain::agent::{AgentRecord, HitlLevel, UserPreferences};
use forge_domain::config::AgentSeed;
use forge_domain::error::{Error, Result};
use forge_domain::tool::{RegistryTool, ToolLifecycle, ToolSpec};
use forge_domain::verifier::{Verifier, VerifierBinding, VerifierKind};

pub struct PostgresRegistry {
    pool: PgPool,
    schema: OnceCell<()>,
}

impl PostgresRegistry {
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
                for ddl in [
                    "CREATE TABLE IF NOT EXISTS agents (
                        agent_id TEXT PRIMARY KEY,
                        display_name TEXT NOT NULL,
                        system_prompt TEXT,
                        default_model TEXT,
                        default_hitl_level TEXT,
                        allow_user_model_select BOOLEAN NOT NULL DEFAULT FALSE,
                        allow_user_hitl_config BOOLEAN NOT NULL DEFAULT FALSE,
                        tool_allowlist TEXT NOT NULL DEFAULT '*',
                        max_turns INTEGER,
                        max_tokens INTEGER,
                        enabled BOOLEAN NOT NULL DEFAULT TRUE,
                        is_default BOOLEAN NOT NULL DEFAULT FALSE,
                        seeded_from_config BOOLEAN NOT NULL DEFAULT TRUE
                    )",
                    "CREATE TABLE IF NOT EXISTS user_preferences (
                        user_id TEXT PRIMARY KEY,
                        model TEXT,
                        hitl_level TEXT
                    )",
                    "CREATE TABLE IF NOT EXISTS prompt_versions (
                        id BIGSERIAL PRIMARY KEY,
                        version TEXT NOT NULL,
                        content TEXT NOT NULL,
                        notes TEXT NOT NULL DEFAULT '',
                        is_active BOOLEAN NOT NULL DEFAULT FALSE,
                        activated_at TIMESTAMPTZ,
                        created_at TIMESTAMPTZ NOT NULL
                    )",
                    "CREATE TABLE IF NOT EXISTS tool_registry (
                        tool_name TEXT PRIMARY KEY,
                        lifecycle_state TEXT NOT NULL,
                        spec_json TEXT NOT NULL,
                        baseline_pass_rate DOUBLE PRECISION,
                        promoted_at TIMESTAMPTZ
                    )",
                    "CREATE TABLE IF NOT EXISTS verifiers (
                        verifier_name TEXT PRIMARY KEY,
                        display_name TEXT NOT NULL,
                        type TEXT NOT NULL,
                        aciru_category TEXT NOT NULL,
                        aciru_order TEXT NOT NULL,
                        spec_json TEXT NOT NULL,
                        description TEXT NOT NULL DEFAULT ''
                    )",
                    "CREATE TABLE IF NOT EXISTS verifier_bindings (
                        verifier_name TEXT NOT NULL,
                        tool_name TEXT NOT NULL,
                        PRIMARY KEY (verifier_name, tool_name)
                    )",
                ] {
                    sqlx::query(ddl)
                        .execute(&self.pool)
                        .await
                        .map_err(store_err)?;
                }
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }

    async fn write_agent(&self, record: &AgentRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO agents (agent_id, display_name, system_prompt, default_model,
                default_hitl_level, allow_user_model_select, allow_user_hitl_config,
                tool_allowlist, max_turns, max_tokens, enabled, is_default, seeded_from_config)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (agent_id) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                system_prompt = EXCLUDED.system_prompt,
                default_model = EXCLUDED.default_model,
                default_hitl_level = EXCLUDED.default_hitl_level,
                allow_user_model_select = EXCLUDED.allow_user_model_select,
                allow_user_hitl_config = EXCLUDED.allow_user_hitl_config,
                tool_allowlist = EXCLUDED.tool_allowlist,
                max_turns = EXCLUDED.max_turns,
                max_tokens = EXCLUDED.max_tokens,
                enabled = EXCLUDED.enabled,
                is_default = EXCLUDED.is_default,
                seeded_from_config = EXCLUDED.seeded_from_config",
        )
        .bind(&record.agent_id)
        .bind(&record.display_name)
        .bind(&record.system_prompt)
        .bind(&record.default_model)
        .bind(record.default_hitl_level.map(|l| l.as_str()))
        .bind(record.allow_user_model_select)
        .bind(record.allow_user_hitl_config)
        .bind(&record.tool_allowlist)
        .bind(record.max_turns.map(|v| v as i32))
        .bind(record.max_tokens.map(|v| v as i32))
        .bind(record.enabled)
        .bind(record.is_default)
        .bind(record.seeded_from_config)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if record.is_default {
            sqlx::query("UPDATE agents SET is_default = (agent_id = $1)")
                .bind(&record.agent_id)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }
}

fn store_err(e: sqlx::Error) -> Error {
    Error::Store(e.to_string())
}

fn row_to_agent(row: &sqlx::postgres::PgRow) -> AgentRecord {
    let hitl: Option<String> = row.get("default_hitl_level");
    AgentRecord {
        agent_id: row.get("agent_id"),
        display_name: row.get("display_name"),
        system_prompt: row.get("system_prompt"),
        default_model: row.get("default_model"),
        default_hitl_level: hitl.as_deref().and_then(HitlLevel::parse),
        allow_user_model_select: row.get("allow_user_model_select"),
        allow_user_hitl_config: row.get("allow_user_hitl_config"),
        tool_allowlist: row.get("tool_allowlist"),
        max_turns: row.get::<Option<i32>, _>("max_turns").map(|v| v as u32),
        max_tokens: row.get::<Option<i32>, _>("max_tokens").map(|v| v as u32),
        enabled: row.get("enabled"),
        is_default: row.get("is_default"),
        seeded_from_config: row.get("seeded_from_config"),
    }
}

#[async_trait::async_trait]
impl RegistryStore for PostgresRegistry {
    async fn seed_agents(&self, seeds: &[AgentSeed]) -> Result<()> {
        self.ensure_schema().await?;
        for seed in seeds {
            let admin_owned: Option<bool> = sqlx::query_scalar(
                "SELECT seeded_from_config FROM agents WHERE agent_id = $1",
            )
            .bind(&seed.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
            if admin_owned == Some(false) {
                tracing::debug!(agent_id = %seed.id, "seed skipped: row is admin-edited");
                continue;
            }
            self.write_agent(&record_from_seed(seed)).await?;
        }
        Ok(())
    }

    async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        self.ensure_schema().await?;
        let rows = sqlx::query("SELECT * FROM agents ORDER BY agent_id")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.iter().map(row_to_agent).collect())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT * FROM agents WHERE agent_id = $1")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.as_ref().map(row_to_agent))
    }

    async fn default_agent(&self) -> Result<Option<AgentRecord>> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT * FROM agents WHERE is_default LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.as_ref().map(row_to_agent))
    }

    async fn upsert_agent(&self, record: &AgentRecord) -> Result<()> {
        self.ensure_schema().await?;
        self.write_agent(record).await
    }

    async fn get_preferences(&self, user_id: &str) -> Result<UserPreferences> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            "SELECT model, hitl_level FROM user_preferences WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(row
            .map(|row| {
                let hitl: Option<String> = row.get("hitl_level");
                UserPreferences {
                    model: row.get("model"),
                    hitl_level: hitl.as_deref().and_then(HitlLevel::parse),
                }
            })
            .unwrap_or_default())
    }

    async fn set_preferences(&self, user_id: &str, prefs: &UserPreferences) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query(
            "INSERT INTO user_preferences (user_id, model, hitl_level)
             VALUES ($1, $2, $3)
             ON CONFLICT (user_id) DO UPDATE SET
                model = EXCLUDED.model,
                hitl_level = EXCLUDED.hitl_level",
        )
        .bind(user_id)
        .bind(&prefs.model)
        .bind(prefs.hitl_level.map(|l| l.as_str()))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn list_prompt_versions(&self) -> Result<Vec<PromptVersion>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            "SELECT id, version, content, notes, is_active, activated_at, created_at
             FROM prompt_versions ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(rows
            .into_iter()
            .map(|row| PromptVersion {
                id: row.get("id"),
                version: row.get("version"),
                content: row.get("content"),
                notes: row.get("notes"),
                is_active: row.get("is_active"),
                activated_at: row.get::<Option<DateTime<Utc>>, _>("activated_at"),
                created_at: row.get::<DateTime<Utc>, _>("created_at"),
            })
            .collect())
    }

    async fn create_prompt_version(
        &self,
        version: &str,
        content: &str,
        notes: &str,
    ) -> Result<i64> {
        self.ensure_schema().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO prompt_versions (version, content, notes, created_at)
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(version)
        .bind(content)
        .bind(notes)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(id)
    }

    async fn active_prompt_version(&self) -> Result<Option<PromptVersion>> {
        Ok(self
            .list_prompt_versions()
            .await?
            .into_iter()
            .find(|v| v.is_active))
    }

    async fn activate_prompt_version(&self, id: i64) -> Result<bool> {
        self.ensure_schema().await?;
        let exists: Option<i64> =
            sqlx::query_scalar("SELECT id FROM prompt_versions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;
        if exists.is_none() {
            return Ok(false);
        }
        sqlx::query(
            "UPDATE prompt_versions SET
                is_active = (id = $1),
                activated_at = CASE WHEN id = $1 THEN $2 ELSE activated_at END",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(true)
    }

    async fn promoted_tools(&self) -> Result<Vec<RegistryTool>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            "SELECT tool_name, lifecycle_state, spec_json, baseline_pass_rate, promoted_at
             FROM tool_registry WHERE lifecycle_state = 'promoted' ORDER BY tool_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let spec_json: String = row.get("spec_json");
                let state: String = row.get("lifecycle_state");
                let spec: ToolSpec = serde_json::from_str(&spec_json).unwrap_or_default();
                RegistryTool {
                    tool_name: row.get("tool_name"),
                    lifecycle: ToolLifecycle::parse(&state).unwrap_or(ToolLifecycle::Candidate),
                    spec,
                    baseline_pass_rate: row.get("baseline_pass_rate"),
                    promoted_at: row.get::<Option<DateTime<Utc>>, _>("promoted_at"),
                }
            })
            .collect())
    }

    async fn upsert_tool(&self, tool: &RegistryTool) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query(
            "INSERT INTO tool_registry
                (tool_name, lifecycle_state, spec_json, baseline_pass_rate, promoted_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (tool_name) DO UPDATE SET
                lifecycle_state = EXCLUDED.lifecycle_state,
                spec_json = EXCLUDED.spec_json,
                baseline_pass_rate = EXCLUDED.baseline_pass_rate,
                promoted_at = EXCLUDED.promoted_at",
        )
        .bind(&tool.tool_name)
        .bind(tool.lifecycle.as_str())
        .bind(serde_json::to_string(&tool.spec)?)
        .bind(tool.baseline_pass_rate)
        .bind(tool.promoted_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn list_verifiers(&self) -> Result<Vec<Verifier>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            "SELECT verifier_name, display_name, type, aciru_category, aciru_order,
                    spec_json, description
             FROM verifiers ORDER BY verifier_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let kind: String = row.get("type");
                let spec_json: String = row.get("spec_json");
                Verifier {
                    name: row.get("verifier_name"),
                    display_name: row.get("display_name"),
                    kind: VerifierKind::parse(&kind).unwrap_or(VerifierKind::Pattern),
                    aciru_category: row.get("aciru_category"),
                    aciru_order: row.get("aciru_order"),
                    spec: serde_json::from_str(&spec_json).unwrap_or(serde_json::Value::Null),
                    description: row.get("description"),
                }
            })
            .collect())
    }

    async fn upsert_verifier(&self, verifier: &Verifier) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query(
            "INSERT INTO verifiers
                (verifier_name, display_name, type, aciru_category, aciru_order,
                 spec_json, description)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (verifier_name) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                type = EXCLUDED.type,
                aciru_category = EXCLUDED.aciru_category,
                aciru_order = EXCLUDED.aciru_order,
                spec_json = EXCLUDED.spec_json,
                description = EXCLUDED.description",
        )
        .bind(&verifier.name)
        .bind(&verifier.display_name)
        .bind(verifier.kind.as_str())
        .bind(&verifier.aciru_category)
        .bind(&verifier.aciru_order)
        .bind(serde_json::to_string(&verifier.spec)?)
        .bind(&verifier.description)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn list_bindings(&self) -> Result<Vec<VerifierBinding>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            "SELECT verifier_name, tool_name FROM verifier_bindings
             ORDER BY verifier_name, tool_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(rows
            .into_iter()
            .map(|row| VerifierBinding {
                verifier_name: row.get("verifier_name"),
                tool_name: row.get("tool_name"),
            })
            .collect())
    }

    async fn bind_verifier(&self, verifier_name: &str, tool_name: &str) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query(
            "INSERT INTO verifier_bindings (verifier_name, tool_name)
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(verifier_name)
        .bind(tool_name)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn unbind_verifier(&self, verifier_name: &str, tool_name: &str) -> Result<bool> {
        self.ensure_schema().await?;
        let result = sqlx::query(
            "DELETE FROM verifier_bindings WHERE verifier_name = $1 AND tool_name = $2",
        )
        .bind(verifier_name)
        .bind(tool_name)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }
}
