use serde::{Deserialize, Serialize};

use crate::agent::HitlLevel;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent seeds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One agent as declared in the configuration file. Seeded into the
/// registry at boot; seeding never overwrites rows an admin has edited
/// (`seeded_from_config = false`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSeed {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub default_hitl_level: Option<HitlLevel>,
    /// `None` leaves the base configuration in charge.
    #[serde(default)]
    pub allow_user_model_select: Option<bool>,
    #[serde(default)]
    pub allow_user_hitl_config: Option<bool>,
    /// Either the wildcard string `"*"` or an array of tool names.
    #[serde(default = "d_wildcard")]
    pub tool_allowlist: serde_json::Value,
    #[serde(default)]
    pub max_turns: Option<u32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub is_default: bool,
}

impl AgentSeed {
    /// The allowlist as stored in the registry: `*` or a JSON array
    /// string. Anything else is stored verbatim and will fail closed
    /// when parsed.
    pub fn allowlist_raw(&self) -> String {
        match &self.tool_allowlist {
            serde_json::Value::String(s) if s == "*" => "*".to_string(),
            other => other.to_string(),
        }
    }
}

fn d_wildcard() -> serde_json::Value {
    serde_json::Value::String("*".into())
}
