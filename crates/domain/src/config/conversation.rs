use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which backend holds conversation turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationBackend {
    Sqlite,
    Postgres,
    Redis,
    /// In-process map. Used by tests; nothing survives a restart.
    Memory,
}

impl Default for ConversationBackend {
    fn default() -> Self {
        ConversationBackend::Sqlite
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationConfig {
    #[serde(default)]
    pub store: ConversationBackend,
    /// How many most-recent turns are loaded into the LLM context.
    #[serde(default = "d_window")]
    pub window: i64,
    #[serde(default)]
    pub redis: RedisConfig,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            store: ConversationBackend::Sqlite,
            window: d_window(),
            redis: RedisConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisConfig {
    #[serde(default = "d_redis_url")]
    pub url: String,
    /// Conversation entry TTL. SQLite/Postgres entries do not expire.
    #[serde(default = "d_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: d_redis_url(),
            ttl_seconds: d_ttl_seconds(),
        }
    }
}

fn d_window() -> i64 {
    50
}

fn d_redis_url() -> String {
    "redis://127.0.0.1:6379".into()
}

fn d_ttl_seconds() -> u64 {
    86_400
}
