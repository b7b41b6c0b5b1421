//! SQLite registry backend.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::{record_from_seed, PromptVersion, RegistryStore};
use forge_domain::agent::{AgentRecord, HitlLevel, UserPreferences};
use forge_domain::config::AgentSeed;
use forge_domain::error::{Error, Result};
use forge_domain::tool::{RegistryTool, ToolLifecycle, ToolSpec};
use forge_domain::verifier::{Verifier, VerifierBinding, VerifierKind};

pub struct SqliteRegistry {
    conn: Mutex<Connection>,
}

impl SqliteRegistry {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Store(format!("open sqlite {path}: {e}")))?;
        let registry = Self {
            conn: Mutex::new(conn),
        };
        registry.init_schema()?;
        Ok(registry)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        let registry = Self {
            conn: Mutex::new(conn),
        };
        registry.init_schema()?;
        Ok(registry)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS agents (
                    agent_id TEXT PRIMARY KEY,
                    display_name TEXT NOT NULL,
                    system_prompt TEXT,
                    default_model TEXT,
                    default_hitl_level TEXT,
                    allow_user_model_select INTEGER NOT NULL DEFAULT 0,
                    allow_user_hitl_config INTEGER NOT NULL DEFAULT 0,
                    tool_allowlist TEXT NOT NULL DEFAULT '*',
                    max_turns INTEGER,
                    max_tokens INTEGER,
                    enabled INTEGER NOT NULL DEFAULT 1,
                    is_default INTEGER NOT NULL DEFAULT 0,
                    seeded_from_config INTEGER NOT NULL DEFAULT 1
                );
                CREATE TABLE IF NOT EXISTS user_preferences (
                    user_id TEXT PRIMARY KEY,
                    model TEXT,
                    hitl_level TEXT
                );
                CREATE TABLE IF NOT EXISTS prompt_versions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    version TEXT NOT NULL,
                    content TEXT NOT NULL,
                    notes TEXT NOT NULL DEFAULT '',
                    is_active INTEGER NOT NULL DEFAULT 0,
                    activated_at TEXT,
                    created_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS tool_registry (
                    tool_name TEXT PRIMARY KEY,
                    lifecycle_state TEXT NOT NULL,
                    spec_json TEXT NOT NULL,
                    baseline_pass_rate REAL,
                    promoted_at TEXT
                );
                CREATE TABLE IF NOT EXISTS verifiers (
                    verifier_name TEXT PRIMARY KEY,
                    display_name TEXT NOT NULL,
                    type TEXT NOT NULL,
                    aciru_category TEXT NOT NULL,
                    aciru_order TEXT NOT NULL,
                    spec_json TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT ''
                );
                CREATE TABLE IF NOT EXISTS verifier_bindings (
                    verifier_name TEXT NOT NULL,
                    tool_name TEXT NOT NULL,
                    PRIMARY KEY (verifier_name, tool_name)
                );
                "#,
            )
            .map_err(store_err)
    }
}

fn store_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}

fn parse_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRecord> {
    let hitl: Option<String> = row.get("default_hitl_level")?;
    Ok(AgentRecord {
        agent_id: row.get("agent_id")?,
        display_name: row.get("display_name")?,
        system_prompt: row.get("system_prompt")?,
        default_model: row.get("default_model")?,
        default_hitl_level: hitl.as_deref().and_then(HitlLevel::parse),
        allow_user_model_select: row.get::<_, i64>("allow_user_model_select")? != 0,
        allow_user_hitl_config: row.get::<_, i64>("allow_user_hitl_config")? != 0,
        tool_allowlist: row.get("tool_allowlist")?,
        max_turns: row.get("max_turns")?,
        max_tokens: row.get("max_tokens")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        is_default: row.get::<_, i64>("is_default")? != 0,
        seeded_from_config: row.get::<_, i64>("seeded_from_config")? != 0,
    })
}

const AGENT_COLUMNS: &str = "agent_id, display_name, system_prompt, default_model, \
     default_hitl_level, allow_user_model_select, allow_user_hitl_config, tool_allowlist, \
     max_turns, max_tokens, enabled, is_default, seeded_from_config";

fn write_agent(conn: &Connection, record: &AgentRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO agents (agent_id, display_name, system_prompt, default_model,
            default_hitl_level, allow_user_model_select, allow_user_hitl_config,
            tool_allowlist, max_turns, max_tokens, enabled, is_default, seeded_from_config)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(agent_id) DO UPDATE SET
            display_name = excluded.display_name,
            system_prompt = excluded.system_prompt,
            default_model = excluded.default_model,
            default_hitl_level = excluded.default_hitl_level,
            allow_user_model_select = excluded.allow_user_model_select,
            allow_user_hitl_config = excluded.allow_user_hitl_config,
            tool_allowlist = excluded.tool_allowlist,
            max_turns = excluded.max_turns,
            max_tokens = excluded.max_tokens,
            enabled = excluded.enabled,
            is_default = excluded.is_default,
            seeded_from_config = excluded.seeded_from_config",
        params![
            record.agent_id,
            record.display_name,
            record.system_prompt,
            record.default_model,
            record.default_hitl_level.map(|l| l.as_str()),
            record.allow_user_model_select as i64,
            record.allow_user_hitl_config as i64,
            record.tool_allowlist,
            record.max_turns,
            record.max_tokens,
            record.enabled as i64,
            record.is_default as i64,
            record.seeded_from_config as i64,
        ],
    )
    .map_err(store_err)?;

    // Exactly one default across the registry.
    if record.is_default {
        conn.execute(
            "UPDATE agents SET is_default = (agent_id = ?1)",
            params![record.agent_id],
        )
        .map_err(store_err)?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl RegistryStore for SqliteRegistry {
    // ── Agents ──────────────────────────────────────────────────────

    async fn seed_agents(&self, seeds: &[AgentSeed]) -> Result<()> {
        let conn = self.conn.lock();
        for seed in seeds {
            let admin_owned: Option<i64> = conn
                .query_row(
                    "SELECT seeded_from_config FROM agents WHERE agent_id = ?1",
                    params![seed.id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(store_err)?;
            if admin_owned == Some(0) {
                tracing::debug!(agent_id = %seed.id, "seed skipped: row is admin-edited");
                continue;
            }
            write_agent(&conn, &record_from_seed(seed))?;
        }
        Ok(())
    }

    async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {AGENT_COLUMNS} FROM agents ORDER BY agent_id"
            ))
            .map_err(store_err)?;
        let rows = stmt.query_map([], row_to_agent).map_err(store_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = ?1"),
            params![agent_id],
            row_to_agent,
        )
        .optional()
        .map_err(store_err)
    }

    async fn default_agent(&self) -> Result<Option<AgentRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE is_default = 1 LIMIT 1"),
            [],
            row_to_agent,
        )
        .optional()
        .map_err(store_err)
    }

    async fn upsert_agent(&self, record: &AgentRecord) -> Result<()> {
        write_agent(&self.conn.lock(), record)
    }

    // ── User preferences ────────────────────────────────────────────

    async fn get_preferences(&self, user_id: &str) -> Result<UserPreferences> {
        let conn = self.conn.lock();
        let prefs = conn
            .query_row(
                "SELECT model, hitl_level FROM user_preferences WHERE user_id = ?1",
                params![user_id],
                |row| {
                    let hitl: Option<String> = row.get(1)?;
                    Ok(UserPreferences {
                        model: row.get(0)?,
                        hitl_level: hitl.as_deref().and_then(HitlLevel::parse),
                    })
                },
            )
            .optional()
            .map_err(store_err)?;
        Ok(prefs.unwrap_or_default())
    }

    async fn set_preferences(&self, user_id: &str, prefs: &UserPreferences) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO user_preferences (user_id, model, hitl_level)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                    model = excluded.model,
                    hitl_level = excluded.hitl_level",
                params![
                    user_id,
                    prefs.model,
                    prefs.hitl_level.map(|l| l.as_str()),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    // ── Prompt versions ─────────────────────────────────────────────

    async fn list_prompt_versions(&self) -> Result<Vec<PromptVersion>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, version, content, notes, is_active, activated_at, created_at
                 FROM prompt_versions ORDER BY id",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PromptVersion {
                    id: row.get(0)?,
                    version: row.get(1)?,
                    content: row.get(2)?,
                    notes: row.get(3)?,
                    is_active: row.get::<_, i64>(4)? != 0,
                    activated_at: parse_ts(row.get(5)?),
                    created_at: parse_ts(row.get(6)?).unwrap_or_default(),
                })
            })
            .map_err(store_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)
    }

    async fn create_prompt_version(
        &self,
        version: &str,
        content: &str,
        notes: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO prompt_versions (version, content, notes, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![version, content, notes, Utc::now().to_rfc3339()],
        )
        .map_err(store_err)?;
        Ok(conn.last_insert_rowid())
    }

    async fn active_prompt_version(&self) -> Result<Option<PromptVersion>> {
        Ok(self
            .list_prompt_versions()
            .await?
            .into_iter()
            .find(|v| v.is_active))
    }

    async fn activate_prompt_version(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM prompt_versions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err)?;
        if exists.is_none() {
            return Ok(false);
        }
        // One statement flips every row; the target also gets stamped.
        conn.execute(
            "UPDATE prompt_versions SET
                is_active = (id = ?1),
                activated_at = CASE WHEN id = ?1 THEN ?2 ELSE activated_at END",
            params![id, Utc::now().to_rfc3339()],
        )
        .map_err(store_err)?;
        Ok(true)
    }

    // ── Tool registry ───────────────────────────────────────────────

    async fn promoted_tools(&self) -> Result<Vec<RegistryTool>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT tool_name, lifecycle_state, spec_json, baseline_pass_rate, promoted_at
                 FROM tool_registry WHERE lifecycle_state = 'promoted' ORDER BY tool_name",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| {
                let state: String = row.get(1)?;
                let spec_json: String = row.get(2)?;
                Ok((
                    row.get::<_, String>(0)?,
                    state,
                    spec_json,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .map_err(store_err)?;

        let mut tools = Vec::new();
        for row in rows {
            let (tool_name, state, spec_json, baseline_pass_rate, promoted_at) =
                row.map_err(store_err)?;
            let spec: ToolSpec = serde_json::from_str(&spec_json).unwrap_or_default();
            tools.push(RegistryTool {
                tool_name,
                lifecycle: ToolLifecycle::parse(&state).unwrap_or(ToolLifecycle::Candidate),
                spec,
                baseline_pass_rate,
                promoted_at: parse_ts(promoted_at),
            });
        }
        Ok(tools)
    }

    async fn upsert_tool(&self, tool: &RegistryTool) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO tool_registry
                    (tool_name, lifecycle_state, spec_json, baseline_pass_rate, promoted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(tool_name) DO UPDATE SET
                    lifecycle_state = excluded.lifecycle_state,
                    spec_json = excluded.spec_json,
                    baseline_pass_rate = excluded.baseline_pass_rate,
                    promoted_at = excluded.promoted_at",
                params![
                    tool.tool_name,
                    tool.lifecycle.as_str(),
                    serde_json::to_string(&tool.spec)?,
                    tool.baseline_pass_rate,
                    tool.promoted_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    // ── Verifiers ───────────────────────────────────────────────────

    async fn list_verifiers(&self) -> Result<Vec<Verifier>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT verifier_name, display_name, type, aciru_category, aciru_order,
                        spec_json, description
                 FROM verifiers ORDER BY verifier_name",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| {
                let kind: String = row.get(2)?;
                let spec_json: String = row.get(5)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    kind,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    spec_json,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(store_err)?;

        let mut verifiers = Vec::new();
        for row in rows {
            let (name, display_name, kind, aciru_category, aciru_order, spec_json, description) =
                row.map_err(store_err)?;
            verifiers.push(Verifier {
                name,
                display_name,
                kind: VerifierKind::parse(&kind).unwrap_or(VerifierKind::Pattern),
                aciru_category,
                aciru_order,
                spec: serde_json::from_str(&spec_json).unwrap_or(serde_json::Value::Null),
                description,
            });
        }
        Ok(verifiers)
    }

    async fn upsert_verifier(&self, verifier: &Verifier) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO verifiers
                    (verifier_name, display_name, type, aciru_category, aciru_order,
                     spec_json, description)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(verifier_name) DO UPDATE SET
                    display_name = excluded.display_name,
                    type = excluded.type,
                    aciru_category = excluded.aciru_category,
                    aciru_order = excluded.aciru_order,
                    spec_json = excluded.spec_json,
                    description = excluded.description",
                params![
                    verifier.name,
                    verifier.display_name,
                    verifier.kind.as_str(),
                    verifier.aciru_category,
                    verifier.aciru_order,
                    serde_json::to_string(&verifier.spec)?,
                    verifier.description,
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    async fn list_bindings(&self) -> Result<Vec<VerifierBinding>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT verifier_name, tool_name FROM verifier_bindings
                 ORDER BY verifier_name, tool_name",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(VerifierBinding {
                    verifier_name: row.get(0)?,
                    tool_name: row.get(1)?,
                })
            })
            .map_err(store_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)
    }

    async fn bind_verifier(&self, verifier_name: &str, tool_name: &str) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT OR IGNORE INTO verifier_bindings (verifier_name, tool_name)
                 VALUES (?1, ?2)",
                params![verifier_name, tool_name],
            )
            .map_err(store_err)?;
        Ok(())
    }

    async fn unbind_verifier(&self, verifier_name: &str, tool_name: &str) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .execute(
                "DELETE FROM verifier_bindings WHERE verifier_name = ?1 AND tool_name = ?2",
                params![verifier_name, tool_name],
            )
            .map_err(store_err)?;
        Ok(changed > 0)
    }
}
