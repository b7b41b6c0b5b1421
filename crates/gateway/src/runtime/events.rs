//! The loop driver's event vocabulary.
//!
//! One producer (the driver task), one consumer (the SSE framer or the
//! sync aggregator). Serialized forms are the wire contract for the
//! streaming endpoint.

use serde::Serialize;
use serde_json::Value;

use forge_domain::stream::Usage;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// Incremental assistant text.
    Text { text: String },

    /// The model invoked a tool.
    ToolCall { id: String, tool: String, args: Value },

    /// A tool finished; `result` may carry `{error}` on failure.
    ToolResult { id: String, result: Value },

    /// A verifier warned about a tool result; the loop continues.
    ToolWarning {
        tool: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        verifier: Option<String>,
    },

    /// The loop paused for a human; resume with the token.
    Hitl {
        #[serde(rename = "resumeToken")]
        resume_token: String,
        tool: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        verifier: Option<String>,
    },

    /// A terminal failure (LLM provider, store). Followed by `done`.
    Error { message: String },

    /// Loop finished; carries accumulated token usage.
    Done { usage: Usage },
}

impl LoopEvent {
    /// The SSE `event:` name.
    pub fn name(&self) -> &'static str {
        match self {
            LoopEvent::Text { .. } => "text",
            LoopEvent::ToolCall { .. } => "tool_call",
            LoopEvent::ToolResult { .. } => "tool_result",
            LoopEvent::ToolWarning { .. } => "tool_warning",
            LoopEvent::Hitl { .. } => "hitl",
            LoopEvent::Error { .. } => "error",
            LoopEvent::Done { .. } => "done",
        }
    }
}
