//! Google Gemini adapter.
//!
//! Implements the `generateContent` / `streamGenerateContent` APIs. Auth
//! is an API key in the `key` query parameter; tool calls arrive as
//! whole `functionCall` parts (no delta assembly needed).

use serde_json::Value;

use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use crate::util::{from_reqwest, http_client};
use forge_domain::error::{Error, Result};
use forge_domain::stream::{BoxStream, StreamEvent, Usage};
use forge_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// An LLM provider adapter for the Google Gemini API.
pub struct GoogleProvider {
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(api_key: String, default_model: String) -> Result<Self> {
        let base_url = std::env::var("GEMINI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.into())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            base_url,
            api_key,
            default_model,
            client: http_client()?,
        })
    }

    fn url(&self, model: &str, streaming: bool) -> String {
        if streaming {
            format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse&key={}",
                self.base_url, model, self.api_key
            )
        } else {
            format!(
                "{}/v1beta/models/{}:generateContent?key={}",
                self.base_url, model, self.api_key
            )
        }
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let mut contents: Vec<Value> = Vec::new();
        let mut system_instruction: Option<Value> = None;

        for msg in &req.messages {
            match msg.role {
                Role::System => {
                    system_instruction = Some(serde_json::json!({
                        "parts": [{"text": msg.content.extract_all_text()}]
                    }));
                }
                Role::User => contents.push(serde_json::json!({
                    "role": "user",
                    "parts": [{"text": msg.content.extract_all_text()}],
                })),
                Role::Assistant => contents.push(assistant_to_wire(msg)),
                Role::Tool => contents.push(tool_result_to_wire(msg)),
            }
        }

        let mut body = serde_json::json!({"contents": contents});
        if let Some(si) = system_instruction {
            body["systemInstruction"] = si;
        }
        if !req.tools.is_empty() {
            let decls: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = serde_json::json!([{"functionDeclarations": decls}]);
        }

        let mut gen = serde_json::Map::new();
        if let Some(temp) = req.temperature {
            gen.insert("temperature".into(), serde_json::json!(temp));
        }
        if let Some(max) = req.max_tokens {
            gen.insert("maxOutputTokens".into(), serde_json::json!(max));
        }
        if !gen.is_empty() {
            body["generationConfig"] = Value::Object(gen);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn assistant_to_wire(msg: &Message) -> Value {
    let mut parts: Vec<Value> = Vec::new();
    match &msg.content {
        MessageContent::Text(t) => parts.push(serde_json::json!({"text": t})),
        MessageContent::Parts(ps) => {
            for p in ps {
                match p {
                    ContentPart::Text { text } => parts.push(serde_json::json!({"text": text})),
                    ContentPart::ToolUse { name, input, .. } => {
                        parts.push(serde_json::json!({
                            "functionCall": {"name": name, "args": input}
                        }));
                    }
                    ContentPart::ToolResult { .. } => {}
                }
            }
        }
    }
    serde_json::json!({"role": "model", "parts": parts})
}

fn tool_result_to_wire(msg: &Message) -> Value {
    let mut parts: Vec<Value> = Vec::new();
    if let MessageContent::Parts(ps) = &msg.content {
        for p in ps {
            if let ContentPart::ToolResult {
                tool_use_id,
                content,
                ..
            } = p
            {
                // Gemini keys function responses by name; the driver uses
                // the tool name as the call id so this lines up.
                parts.push(serde_json::json!({
                    "functionResponse": {
                        "name": tool_use_id,
                        "response": {"content": content},
                    }
                }));
            }
        }
    }
    serde_json::json!({"role": "user", "parts": parts})
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_candidate_parts(body: &Value) -> (String, Vec<ToolCall>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    let parts = body
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|cand| cand.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(|p| p.as_array());

    if let Some(parts) = parts {
        for part in parts {
            if let Some(t) = part.get("text").and_then(|v| v.as_str()) {
                text.push_str(t);
            }
            if let Some(fc) = part.get("functionCall") {
                let name = fc
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                tool_calls.push(ToolCall {
                    // Gemini has no call ids; reuse the function name.
                    call_id: name.clone(),
                    tool_name: name,
                    arguments: fc
                        .get("args")
                        .cloned()
                        .unwrap_or(Value::Object(Default::default())),
                });
            }
        }
    }

    (text, tool_calls)
}

fn parse_usage(body: &Value) -> Option<Usage> {
    let meta = body.get("usageMetadata")?;
    let input = meta.get("promptTokenCount")?.as_u64()? as u32;
    let output = meta
        .get("candidatesTokenCount")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;
    Some(Usage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: input + output,
    })
}

fn parse_response(body: &Value, default_model: &str) -> Result<ChatResponse> {
    let (content, tool_calls) = parse_candidate_parts(body);
    let finish_reason = body
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|c| c.get("finishReason"))
        .and_then(|v| v.as_str())
        .map(|s| if s == "STOP" { "stop".into() } else { s.to_lowercase() });

    Ok(ChatResponse {
        content,
        tool_calls,
        usage: parse_usage(body),
        model: body
            .get("modelVersion")
            .and_then(|v| v.as_str())
            .unwrap_or(default_model)
            .to_string(),
        finish_reason,
    })
}

fn parse_stream_payload(data: &str) -> Vec<Result<StreamEvent>> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let mut events = Vec::new();
    let (text, tool_calls) = parse_candidate_parts(&v);
    if !text.is_empty() {
        events.push(Ok(StreamEvent::Token { text }));
    }
    for tc in tool_calls {
        events.push(Ok(StreamEvent::ToolCallFinished {
            call_id: tc.call_id,
            tool_name: tc.tool_name,
            arguments: tc.arguments,
        }));
    }

    let finished = v
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|c| c.get("finishReason"))
        .and_then(|v| v.as_str());
    if finished.is_some() {
        events.push(Ok(StreamEvent::Done {
            usage: parse_usage(&v),
            finish_reason: Some("stop".into()),
        }));
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for GoogleProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let url = self.url(&model, false);
        tracing::debug!(model = %model, "google chat request");

        let resp = self
            .client
            .post(&url)
            .json(&self.build_body(req))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Provider {
                provider: "google".into(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }
        parse_response(&serde_json::from_str(&text)?, &model)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let url = self.url(&model, true);
        tracing::debug!(model = %model, "google stream request");

        let resp = self
            .client
            .post(&url)
            .json(&self.build_body(req))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: "google".into(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }

        Ok(crate::sse::event_stream(resp, parse_stream_payload))
    }

    fn provider_id(&self) -> &str {
        "google"
    }
}
