//! Chat endpoints — the primary interface for running the loop.
//!
//! - `POST /agent-api/chat`        — SSE stream of loop events
//! - `POST /agent-api/chat-sync`   — aggregated JSON (409 on HITL pause)
//! - `POST /agent-api/chat/resume` — continue a paused loop

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::auth::AuthedUser;
use crate::resolver::{resolve_effective, Effective, ResolveError};
use crate::runtime::cancel::CancelToken;
use crate::runtime::{resume_loop, start_loop, LoopEvent, LoopHandle};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub message: String,
    /// Omitted on the first turn; the store mints one.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeBody {
    pub resume_token: String,
    /// Defaults to approval; a denial feeds the model an error
    /// observation instead of the tool result.
    #[serde(default = "default_true")]
    pub approved: bool,
}

fn default_true() -> bool {
    true
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({"error": message.into()})),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared prep
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn prepare(
    state: &AppState,
    user_id: &str,
    body: &ChatBody,
) -> Result<(String, Effective), Response> {
    if body.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "message must not be empty"));
    }

    let settings = state.overlay.snapshot();
    let effective = match resolve_effective(
        &state.registry,
        &settings,
        &state.config,
        body.agent.as_deref(),
        user_id,
    )
    .await
    {
        Ok(e) => e,
        Err(ResolveError::AgentNotFound) => {
            return Err(api_error(StatusCode::NOT_FOUND, "agent not found"))
        }
        Err(ResolveError::Store(e)) => {
            tracing::error!(error = %e, "resolver store failure");
            return Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "registry unavailable",
            ));
        }
    };

    let session_id = body
        .session_id
        .clone()
        .unwrap_or_else(|| state.conversations.create_session());

    Ok((session_id, effective))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /agent-api/chat (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_stream(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Json(body): Json<ChatBody>,
) -> Response {
    let (session_id, effective) = match prepare(&state, &user_id, &body).await {
        Ok(prep) => prep,
        Err(resp) => return resp,
    };

    let handle = start_loop(state, session_id, user_id, body.message, effective);
    sse_response(handle)
}

/// Cancels the loop when the SSE body is dropped (client disconnect).
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

fn sse_response(handle: LoopHandle) -> Response {
    let guard = CancelOnDrop(handle.cancel.clone());
    let stream = make_sse_stream(handle.events, guard);

    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response();
    let headers = response.headers_mut();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    response
}

fn make_sse_stream(
    mut rx: mpsc::Receiver<LoopEvent>,
    guard: CancelOnDrop,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        // Holds the cancel guard for the life of the client connection.
        let _guard = guard;
        while let Some(event) = rx.recv().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().event(event.name()).data(data));
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /agent-api/chat-sync
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_sync(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Json(body): Json<ChatBody>,
) -> Response {
    let (session_id, effective) = match prepare(&state, &user_id, &body).await {
        Ok(prep) => prep,
        Err(resp) => return resp,
    };

    let handle = start_loop(
        state,
        session_id.clone(),
        user_id,
        body.message,
        effective,
    );
    aggregate(session_id, handle).await
}

/// Drain the event stream into the sync response shape. Errors stay
/// HTTP 200 with `flags` populated; a HITL pause becomes 409.
async fn aggregate(session_id: String, mut handle: LoopHandle) -> Response {
    let mut message = String::new();
    let mut call_order: Vec<String> = Vec::new();
    let mut calls: std::collections::HashMap<String, Value> = std::collections::HashMap::new();
    let mut warnings: Vec<Value> = Vec::new();
    let mut flags: Vec<String> = Vec::new();

    while let Some(event) = handle.events.recv().await {
        match event {
            LoopEvent::Text { text } => message.push_str(&text),
            LoopEvent::ToolCall { id, tool, args } => {
                call_order.push(id.clone());
                calls.insert(
                    id.clone(),
                    serde_json::json!({
                        "id": id,
                        "name": tool,
                        "args": args,
                        "result": Value::Null,
                    }),
                );
            }
            LoopEvent::ToolResult { id, result } => {
                if let Some(call) = calls.get_mut(&id) {
                    call["result"] = result;
                }
            }
            LoopEvent::ToolWarning {
                tool,
                message,
                verifier,
            } => warnings.push(serde_json::json!({
                "tool": tool,
                "message": message,
                "verifier": verifier,
            })),
            LoopEvent::Hitl {
                resume_token,
                tool,
                message,
                ..
            } => {
                return (
                    StatusCode::CONFLICT,
                    Json(serde_json::json!({
                        "resumeToken": resume_token,
                        "tool": tool,
                        "message": message,
                    })),
                )
                    .into_response();
            }
            LoopEvent::Error { message } => flags.push(message),
            LoopEvent::Done { .. } => break,
        }
    }

    let tool_calls: Vec<Value> = call_order
        .into_iter()
        .filter_map(|id| calls.remove(&id))
        .collect();

    Json(serde_json::json!({
        "conversationId": session_id,
        "message": message,
        "toolCalls": tool_calls,
        "warnings": warnings,
        "flags": flags,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /agent-api/chat/resume
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_resume(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Json(body): Json<ResumeBody>,
) -> Response {
    let pause = match state.hitl.resume(&body.resume_token).await {
        Ok(pause) => pause,
        Err(forge_domain::Error::NotFound(msg)) => {
            return api_error(StatusCode::NOT_FOUND, msg)
        }
        Err(e) => {
            tracing::error!(error = %e, "resume fetch failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "pause store unavailable");
        }
    };

    // Resume tokens stay valid until TTL regardless of the original
    // caller, but the loop continues under the resuming user's
    // identity and the agent captured at pause time.
    let settings = state.overlay.snapshot();
    let effective = match resolve_effective(
        &state.registry,
        &settings,
        &state.config,
        pause.agent_id.as_deref(),
        &user_id,
    )
    .await
    {
        Ok(e) => e,
        Err(ResolveError::AgentNotFound) => {
            return api_error(StatusCode::NOT_FOUND, "agent not found")
        }
        Err(ResolveError::Store(e)) => {
            tracing::error!(error = %e, "resolver store failure");
            return api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "registry unavailable",
            );
        }
    };

    let session_id = pause.session_id.clone();
    let handle = resume_loop(state, pause, body.approved, effective);
    aggregate(session_id, handle).await
}
