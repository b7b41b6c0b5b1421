//! Scripted in-memory provider for tests.
//!
//! Each call to `chat_stream` pops the next scripted turn and replays
//! its events. The loop driver and HTTP handlers are exercised against
//! this without any network.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use forge_domain::error::{Error, Result};
use forge_domain::stream::{BoxStream, StreamEvent, Usage};
use forge_domain::tool::ToolCall;

pub struct MockProvider {
    turns: Mutex<VecDeque<Vec<StreamEvent>>>,
    /// Error returned instead of a stream, when set.
    failure: Option<String>,
    /// Every request this provider has seen, for assertions.
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl MockProvider {
    pub fn new(turns: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            failure: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn single_turn(events: Vec<StreamEvent>) -> Self {
        Self::new(vec![events])
    }

    /// A provider whose every call fails with the given message.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            failure: Some(message.into()),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Script for a turn that just says `text` and reports `usage`.
    pub fn text_turn(text: &str, usage: Option<Usage>) -> Vec<StreamEvent> {
        vec![
            StreamEvent::Token { text: text.into() },
            StreamEvent::Done {
                usage,
                finish_reason: Some("stop".into()),
            },
        ]
    }

    fn next_turn(&self) -> Vec<StreamEvent> {
        self.turns.lock().pop_front().unwrap_or_else(|| {
            vec![StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            }]
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        if let Some(msg) = &self.failure {
            return Err(Error::Provider {
                provider: "mock".into(),
                message: msg.clone(),
            });
        }
        self.requests.lock().push(req.clone());

        let mut content = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut usage = None;
        let mut finish_reason = None;
        for event in self.next_turn() {
            match event {
                StreamEvent::Token { text } => content.push_str(&text),
                StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                } => tool_calls.push(ToolCall {
                    call_id,
                    tool_name,
                    arguments,
                }),
                StreamEvent::Done {
                    usage: u,
                    finish_reason: fr,
                } => {
                    usage = u;
                    finish_reason = fr;
                }
                _ => {}
            }
        }

        Ok(ChatResponse {
            content,
            tool_calls,
            usage,
            model: req.model.clone().unwrap_or_else(|| "mock".into()),
            finish_reason,
        })
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        if let Some(msg) = &self.failure {
            return Err(Error::Provider {
                provider: "mock".into(),
                message: msg.clone(),
            });
        }
        self.requests.lock().push(req.clone());

        let events = self.next_turn();
        let stream = async_stream::stream! {
            for event in events {
                yield Ok(event);
            }
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn replays_turns_in_order() {
        let mock = MockProvider::new(vec![
            MockProvider::text_turn("first", None),
            MockProvider::text_turn("second", None),
        ]);
        let req = ChatRequest::default();
        assert_eq!(mock.chat(&req).await.unwrap().content, "first");
        assert_eq!(mock.chat(&req).await.unwrap().content, "second");
        // Exhausted: empty completion.
        assert_eq!(mock.chat(&req).await.unwrap().content, "");
    }

    #[tokio::test]
    async fn stream_yields_scripted_events() {
        let mock = MockProvider::single_turn(MockProvider::text_turn(
            "hi",
            Some(Usage {
                input_tokens: 1,
                output_tokens: 2,
                total_tokens: 3,
            }),
        ));
        let mut stream = mock.chat_stream(&ChatRequest::default()).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, StreamEvent::Token { .. }));
        let second = stream.next().await.unwrap().unwrap();
        assert!(matches!(second, StreamEvent::Done { .. }));
    }

    #[tokio::test]
    async fn failing_mock_errors() {
        let mock = MockProvider::failing("upstream melted");
        let err = match mock.chat_stream(&ChatRequest::default()).await {
            Err(e) => e,
            Ok(_) => panic!("expected chat_stream to fail"),
        };
        assert!(err.to_string().contains("upstream melted"));
    }
}
