//! Agent and user-preference domain types.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HITL sensitivity levels
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How eagerly the loop hands control to a human before a tool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitlLevel {
    Autonomous,
    Cautious,
    Standard,
    Paranoid,
}

impl HitlLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HitlLevel::Autonomous => "autonomous",
            HitlLevel::Cautious => "cautious",
            HitlLevel::Standard => "standard",
            HitlLevel::Paranoid => "paranoid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "autonomous" => Some(HitlLevel::Autonomous),
            "cautious" => Some(HitlLevel::Cautious),
            "standard" => Some(HitlLevel::Standard),
            "paranoid" => Some(HitlLevel::Paranoid),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent registry rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A named configuration bundle scoping tools, model, HITL level, and
/// system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub display_name: String,
    pub system_prompt: Option<String>,
    pub default_model: Option<String>,
    pub default_hitl_level: Option<HitlLevel>,
    /// Permission flags. DB default 0 means "unset": only `true`
    /// overrides the base configuration.
    pub allow_user_model_select: bool,
    pub allow_user_hitl_config: bool,
    /// Raw allowlist as stored: the wildcard `*` or a JSON array of
    /// tool names. Kept raw so malformed rows can fail closed.
    pub tool_allowlist: String,
    pub max_turns: Option<u32>,
    pub max_tokens: Option<u32>,
    pub enabled: bool,
    pub is_default: bool,
    pub seeded_from_config: bool,
}

/// The parsed form of an agent's tool allowlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolAllowlist {
    /// Every promoted tool.
    All,
    /// Only the named tools. Malformed stored JSON parses to an empty
    /// set: fail closed, never open.
    Named(HashSet<String>),
}

impl AgentRecord {
    pub fn allowlist(&self) -> ToolAllowlist {
        parse_allowlist(&self.tool_allowlist)
    }
}

/// Parse a stored allowlist string: `*` means all; otherwise it must be
/// a JSON array of strings. Anything else yields the empty set.
pub fn parse_allowlist(raw: &str) -> ToolAllowlist {
    if raw.trim() == "*" {
        return ToolAllowlist::All;
    }
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(names) => ToolAllowlist::Named(names.into_iter().collect()),
        Err(_) => ToolAllowlist::Named(HashSet::new()),
    }
}

/// Agent ids are slugs: lowercase alphanumerics, `_`, `-`.
pub fn is_valid_agent_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// User preferences
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-user preferences, consulted by the resolver when the agent's
/// permission flags allow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPreferences {
    pub model: Option<String>,
    pub hitl_level: Option<HitlLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hitl_level_round_trip() {
        for s in ["autonomous", "cautious", "standard", "paranoid"] {
            assert_eq!(HitlLevel::parse(s).unwrap().as_str(), s);
        }
        assert_eq!(HitlLevel::parse("reckless"), None);
    }

    #[test]
    fn allowlist_wildcard() {
        assert_eq!(parse_allowlist("*"), ToolAllowlist::All);
        assert_eq!(parse_allowlist("  * "), ToolAllowlist::All);
    }

    #[test]
    fn allowlist_named_set() {
        match parse_allowlist(r#"["get_data","send_mail"]"#) {
            ToolAllowlist::Named(set) => {
                assert_eq!(set.len(), 2);
                assert!(set.contains("get_data"));
            }
            ToolAllowlist::All => panic!("expected named set"),
        }
    }

    #[test]
    fn allowlist_malformed_fails_closed() {
        match parse_allowlist("{not-json") {
            ToolAllowlist::Named(set) => assert!(set.is_empty()),
            ToolAllowlist::All => panic!("malformed allowlist must not open up"),
        }
    }

    #[test]
    fn allowlist_wrong_shape_fails_closed() {
        match parse_allowlist(r#"{"tools": ["a"]}"#) {
            ToolAllowlist::Named(set) => assert!(set.is_empty()),
            ToolAllowlist::All => panic!("object allowlist must not open up"),
        }
    }

    #[test]
    fn agent_id_slugs() {
        assert!(is_valid_agent_id("sales"));
        assert!(is_valid_agent_id("sales_team-2"));
        assert!(!is_valid_agent_id(""));
        assert!(!is_valid_agent_id("Sales"));
        assert!(!is_valid_agent_id("sales team"));
    }
}
