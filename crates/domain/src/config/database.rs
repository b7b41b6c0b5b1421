use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Primary database (registry tables)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Sqlite,
    Postgres,
}

impl Default for DatabaseKind {
    fn default() -> Self {
        DatabaseKind::Sqlite
    }
}

/// Where agents, preferences, prompt versions, the tool registry, and
/// verifier bindings live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    #[serde(rename = "type", default)]
    pub kind: DatabaseKind,
    /// SQLite file path or Postgres connection URL.
    #[serde(default = "d_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: DatabaseKind::Sqlite,
            url: d_url(),
        }
    }
}

fn d_url() -> String {
    "./data/forge.db".into()
}
