//! Per-request orchestration: the loop driver and its collaborators.

pub mod cancel;
pub mod events;
pub mod hitl;
pub mod tools;
pub mod turn;

pub use events::LoopEvent;
pub use turn::{resume_loop, start_loop, LoopHandle};

use forge_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall};
use forge_store::Turn;

/// Convert stored turns to LLM messages, windowed to the most recent
/// `window` turns. System markers and orphan tool output are history
/// bookkeeping, not model context.
pub(crate) fn history_to_messages(turns: &[Turn], window: i64) -> Vec<Message> {
    let window = window.max(0) as usize;
    let start = turns.len().saturating_sub(window);

    turns[start..]
        .iter()
        .filter_map(|turn| match turn.role.as_str() {
            "user" => Some(Message::user(&turn.content)),
            "assistant" => Some(Message::assistant(&turn.content)),
            _ => None,
        })
        .collect()
}

/// The assistant message carrying this turn's text and tool
/// invocations, as the next LLM call will see it.
pub(crate) fn build_assistant_message<'a>(
    text: &str,
    tool_calls: impl Iterator<Item = &'a ToolCall>,
) -> Message {
    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(ContentPart::Text { text: text.into() });
    }
    for call in tool_calls {
        parts.push(ContentPart::ToolUse {
            id: call.call_id.clone(),
            name: call.tool_name.clone(),
            input: call.arguments.clone(),
        });
    }
    Message {
        role: Role::Assistant,
        content: MessageContent::Parts(parts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(role: &str, content: &str) -> Turn {
        Turn {
            session_id: "s1".into(),
            stage: "loop".into(),
            role: role.into(),
            content: content.into(),
            agent_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn window_keeps_most_recent_turns() {
        let turns: Vec<Turn> = (0..10).map(|i| turn("user", &format!("m{i}"))).collect();
        let messages = history_to_messages(&turns, 3);
        assert_eq!(messages.len(), 3);
        match &messages[0].content {
            MessageContent::Text(t) => assert_eq!(t, "m7"),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn system_and_tool_turns_are_skipped() {
        let turns = vec![
            turn("user", "hi"),
            turn("system", "[COMPLETE]"),
            turn("tool", "{\"value\":1}"),
            turn("assistant", "hello"),
        ];
        let messages = history_to_messages(&turns, 50);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[test]
    fn window_larger_than_history_is_fine() {
        let turns = vec![turn("user", "only")];
        assert_eq!(history_to_messages(&turns, 100).len(), 1);
    }

    #[test]
    fn assistant_message_with_text_and_calls() {
        let calls = vec![ToolCall {
            call_id: "tc-1".into(),
            tool_name: "get_data".into(),
            arguments: serde_json::json!({"id": 42}),
        }];
        let msg = build_assistant_message("checking", calls.iter());
        match &msg.content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(parts[0], ContentPart::Text { .. }));
                assert!(matches!(parts[1], ContentPart::ToolUse { .. }));
            }
            _ => panic!("expected parts"),
        }
    }
}
