use serde::{Deserialize, Serialize};

/// Internal tool call format (provider-agnostic).
/// Every adapter converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry tool entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of a tool in the registry. Only `Promoted` tools are
/// visible to the loop driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolLifecycle {
    Candidate,
    Promoted,
    Flagged,
    Retired,
    Swapped,
}

impl ToolLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolLifecycle::Candidate => "candidate",
            ToolLifecycle::Promoted => "promoted",
            ToolLifecycle::Flagged => "flagged",
            ToolLifecycle::Retired => "retired",
            ToolLifecycle::Swapped => "swapped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "candidate" => Some(ToolLifecycle::Candidate),
            "promoted" => Some(ToolLifecycle::Promoted),
            "flagged" => Some(ToolLifecycle::Flagged),
            "retired" => Some(ToolLifecycle::Retired),
            "swapped" => Some(ToolLifecycle::Swapped),
            _ => None,
        }
    }
}

/// Routing information for a tool backed by an external capability
/// endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpRouting {
    pub endpoint: String,
    pub method: String,
}

/// The deserialized specification blob of a registry tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    /// Semantic category: `read`, `analysis`, or `write`.
    pub category: Option<String>,
    /// Forces a HITL pause at `cautious` level and above.
    pub requires_confirmation: bool,
    /// Per-tool execution timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    pub mcp_routing: Option<McpRouting>,
}

/// Role a tool plays when its verifier pipeline degrades: mutating
/// tools fail closed, everything else fails open-ish (warn).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolRole {
    Any,
    Write,
}

impl ToolSpec {
    pub fn role(&self) -> ToolRole {
        match self.category.as_deref() {
            Some("write") => ToolRole::Write,
            _ => ToolRole::Any,
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

/// A row of the tool registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryTool {
    pub tool_name: String,
    pub lifecycle: ToolLifecycle,
    pub spec: ToolSpec,
    pub baseline_pass_rate: Option<f64>,
    pub promoted_at: Option<chrono::DateTime<chrono::Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A message in the conversation (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error: false,
            }]),
        }
    }
}

impl MessageContent {
    /// Extract and join all text content, returning an owned String.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        for role in [Role::System, Role::User, Role::Assistant, Role::Tool] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("narrator"), None);
    }

    #[test]
    fn lifecycle_round_trip() {
        for s in ["candidate", "promoted", "flagged", "retired", "swapped"] {
            assert_eq!(ToolLifecycle::parse(s).unwrap().as_str(), s);
        }
        assert_eq!(ToolLifecycle::parse("zombie"), None);
    }

    #[test]
    fn spec_role_write_category() {
        let spec = ToolSpec {
            category: Some("write".into()),
            ..ToolSpec::default()
        };
        assert_eq!(spec.role(), ToolRole::Write);
    }

    #[test]
    fn spec_role_defaults_to_any() {
        for cat in [None, Some("read".to_string()), Some("analysis".to_string())] {
            let spec = ToolSpec {
                category: cat,
                ..ToolSpec::default()
            };
            assert_eq!(spec.role(), ToolRole::Any);
        }
    }

    #[test]
    fn spec_blob_deserializes_camel_case() {
        let spec: ToolSpec = serde_json::from_value(serde_json::json!({
            "name": "get_data",
            "description": "fetch",
            "inputSchema": {"type": "object"},
            "mcpRouting": {"endpoint": "http://localhost:9000/data", "method": "POST"}
        }))
        .unwrap();
        assert_eq!(spec.name, "get_data");
        assert_eq!(spec.mcp_routing.as_ref().unwrap().method, "POST");
        assert!(!spec.requires_confirmation);
    }

    #[test]
    fn extract_all_text_joins_parts() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text {
                text: "line one".into(),
            },
            ContentPart::ToolUse {
                id: "c1".into(),
                name: "exec".into(),
                input: serde_json::json!({}),
            },
            ContentPart::Text {
                text: "line two".into(),
            },
        ]);
        assert_eq!(content.extract_all_text(), "line one\nline two");
    }
}
