//! The ReAct loop driver.
//!
//! One spawned task per request pushing [`LoopEvent`]s into a bounded
//! channel. The HTTP layer either frames them as SSE or aggregates
//! them for the sync endpoint. Every suspension point (LLM call, tool
//! dispatch, verifier run, store write) observes the request's cancel
//! token and unwinds silently when it fires.

use std::collections::{HashMap, VecDeque};

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use forge_domain::stream::{StreamEvent, Usage};
use forge_domain::tool::{Message, ToolCall, ToolDefinition, ToolSpec};
use forge_domain::verifier::VerifierOutcome;
use forge_providers::ChatRequest;
use forge_verify::{Pipeline, VerifierIndex};

use crate::resolver::Effective;
use crate::state::AppState;

use super::cancel::CancelToken;
use super::events::LoopEvent;
use super::hitl::{HitlEngine, PauseState};
use super::{build_assistant_message, history_to_messages};

/// ReAct phase labels stored with each turn.
pub const STAGE_INPUT: &str = "input";
pub const STAGE_ACT: &str = "act";
pub const STAGE_OBSERVE: &str = "observe";
pub const STAGE_RESPOND: &str = "respond";

/// A running loop: its cancel token and event stream.
pub struct LoopHandle {
    pub cancel: CancelToken,
    pub events: mpsc::Receiver<LoopEvent>,
}

enum LoopStart {
    Fresh { user_message: String },
    Resumed { pause: PauseState, approved: bool },
}

struct LoopParams {
    session_id: String,
    user_id: String,
    effective: Effective,
    start: LoopStart,
}

/// Start a fresh loop for one user message.
pub fn start_loop(
    state: AppState,
    session_id: String,
    user_id: String,
    user_message: String,
    effective: Effective,
) -> LoopHandle {
    spawn_loop(
        state,
        LoopParams {
            session_id,
            user_id,
            effective,
            start: LoopStart::Fresh { user_message },
        },
    )
}

/// Continue a paused loop from its captured state.
pub fn resume_loop(
    state: AppState,
    pause: PauseState,
    approved: bool,
    effective: Effective,
) -> LoopHandle {
    spawn_loop(
        state,
        LoopParams {
            session_id: pause.session_id.clone(),
            user_id: pause.user_id.clone(),
            effective,
            start: LoopStart::Resumed { pause, approved },
        },
    )
}

fn spawn_loop(state: AppState, params: LoopParams) -> LoopHandle {
    let (tx, rx) = mpsc::channel::<LoopEvent>(64);
    let cancel = state.cancel_map.register(&params.session_id);
    let token = cancel.clone();

    let session_id = params.session_id.clone();
    tokio::spawn(async move {
        run_loop(state.clone(), params, tx, cancel).await;
        state.cancel_map.remove(&session_id);
    });

    LoopHandle {
        cancel: token,
        events: rx,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Driver internals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Flow {
    Continue,
    /// Terminate. `emit_done` distinguishes error completion (done
    /// still follows) from a HITL pause or cancellation (stream just
    /// ends).
    Stop { emit_done: bool },
}

struct LoopCtx {
    state: AppState,
    pipeline: Pipeline,
    effective: Effective,
    hitl_ttl_ms: u64,
    session_id: String,
    user_id: String,
    tx: mpsc::Sender<LoopEvent>,
    cancel: CancelToken,
}

impl LoopCtx {
    async fn emit(&self, event: LoopEvent) {
        let _ = self.tx.send(event).await;
    }

    /// Persist one turn; a failed write aborts the request.
    async fn persist(&self, stage: &str, role: &str, content: &str) -> bool {
        let result = self
            .state
            .conversations
            .persist_message(
                &self.session_id,
                stage,
                role,
                content,
                self.effective.agent_id.as_deref(),
            )
            .await;
        if let Err(e) = &result {
            tracing::error!(session_id = %self.session_id, error = %e, "turn write failed");
            self.emit(LoopEvent::Error {
                message: "conversation store write failed".into(),
            })
            .await;
        }
        result.is_ok()
    }

    fn spec_for(&self, tool_name: &str) -> Option<&ToolSpec> {
        self.effective.tools.iter().find(|t| t.name == tool_name)
    }

    /// Run one tool call end to end: HITL gate, dispatch, verifiers,
    /// observation.
    async fn handle_tool_call(
        &self,
        messages: &mut Vec<Message>,
        remaining: &VecDeque<ToolCall>,
        call: ToolCall,
        usage: &Usage,
    ) -> Flow {
        let Some(spec) = self.spec_for(&call.tool_name).cloned() else {
            // The model asked for something outside its tool set.
            self.emit(LoopEvent::ToolCall {
                id: call.call_id.clone(),
                tool: call.tool_name.clone(),
                args: call.arguments.clone(),
            })
            .await;
            let result = serde_json::json!({
                "error": format!("unknown tool \"{}\"", call.tool_name)
            });
            return self.observe(messages, &call, result).await;
        };

        // (a) HITL gate before dispatch.
        if HitlEngine::should_pause(self.effective.hitl_level, &spec) {
            return self
                .pause(messages, remaining, &call, None, None, usage)
                .await;
        }

        // (b) Dispatch.
        self.emit(LoopEvent::ToolCall {
            id: call.call_id.clone(),
            tool: call.tool_name.clone(),
            args: call.arguments.clone(),
        })
        .await;
        if self.cancel.is_cancelled() {
            return Flow::Stop { emit_done: false };
        }
        let result = self.dispatch(&spec, &call).await;
        if self.cancel.is_cancelled() {
            return Flow::Stop { emit_done: false };
        }

        // (c) Verifier pipeline.
        for finding in self.pipeline.run(&spec, &call.arguments, &result).await {
            match finding.verdict.outcome {
                VerifierOutcome::Pass => {}
                VerifierOutcome::Warn => {
                    self.emit(LoopEvent::ToolWarning {
                        tool: call.tool_name.clone(),
                        message: finding
                            .verdict
                            .message
                            .unwrap_or_else(|| "verifier warning".into()),
                        verifier: Some(finding.verifier),
                    })
                    .await;
                }
                VerifierOutcome::Block => {
                    return self
                        .pause(
                            messages,
                            remaining,
                            &call,
                            Some(result),
                            Some((finding.verifier, finding.verdict.message)),
                            usage,
                        )
                        .await;
                }
            }
        }

        self.observe(messages, &call, result).await
    }

    async fn dispatch(&self, spec: &ToolSpec, call: &ToolCall) -> Value {
        match self.state.tools.execute(spec, &call.arguments).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = %call.tool_name, error = %e, "tool execution failed");
                serde_json::json!({"error": e.to_string()})
            }
        }
    }

    /// Record a tool result and feed it back to the model.
    async fn observe(&self, messages: &mut Vec<Message>, call: &ToolCall, result: Value) -> Flow {
        self.emit(LoopEvent::ToolResult {
            id: call.call_id.clone(),
            result: result.clone(),
        })
        .await;

        let rendered = result.to_string();
        if !self.persist(STAGE_OBSERVE, "tool", &rendered).await {
            return Flow::Stop { emit_done: true };
        }
        messages.push(Message::tool_result(&call.call_id, &rendered));
        Flow::Continue
    }

    /// Capture state, persist it under a resume token, emit `hitl`.
    async fn pause(
        &self,
        messages: &[Message],
        remaining: &VecDeque<ToolCall>,
        call: &ToolCall,
        result: Option<Value>,
        verifier: Option<(String, Option<String>)>,
        usage: &Usage,
    ) -> Flow {
        let (verifier_name, verifier_message) = match verifier {
            Some((name, message)) => (Some(name), message),
            None => (None, None),
        };
        let state = PauseState {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            agent_id: self.effective.agent_id.clone(),
            tool: call.tool_name.clone(),
            call_id: call.call_id.clone(),
            args: call.arguments.clone(),
            result,
            messages: messages.to_vec(),
            remaining: remaining.iter().cloned().collect(),
            usage: usage.clone(),
        };

        match self.state.hitl.pause(&state, self.hitl_ttl_ms).await {
            Ok(token) => {
                let message = verifier_message.unwrap_or_else(|| {
                    format!("Tool \"{}\" requires confirmation", call.tool_name)
                });
                self.emit(LoopEvent::Hitl {
                    resume_token: token,
                    tool: call.tool_name.clone(),
                    message,
                    verifier: verifier_name,
                })
                .await;
                Flow::Stop { emit_done: false }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to persist pause state");
                self.emit(LoopEvent::Error {
                    message: "could not persist pause state".into(),
                })
                .await;
                Flow::Stop { emit_done: true }
            }
        }
    }
}

async fn build_pipeline(state: &AppState) -> forge_domain::Result<Pipeline> {
    let verifiers = state.registry.list_verifiers().await?;
    let bindings = state.registry.list_bindings().await?;
    Ok(Pipeline::new(
        VerifierIndex::build(&verifiers, &bindings),
        state.worker_pool.clone(),
    ))
}

async fn run_loop(
    state: AppState,
    params: LoopParams,
    tx: mpsc::Sender<LoopEvent>,
    cancel: CancelToken,
) {
    let settings = state.overlay.snapshot();

    let provider = match state.providers.create(&params.effective) {
        Ok(p) => p,
        Err(e) => {
            let _ = tx.send(LoopEvent::Error { message: e.to_string() }).await;
            let _ = tx.send(LoopEvent::Done { usage: Usage::default() }).await;
            return;
        }
    };

    let pipeline = match build_pipeline(&state).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "verifier index load failed");
            let _ = tx
                .send(LoopEvent::Error { message: "verifier index unavailable".into() })
                .await;
            let _ = tx.send(LoopEvent::Done { usage: Usage::default() }).await;
            return;
        }
    };

    let ctx = LoopCtx {
        pipeline,
        effective: params.effective.clone(),
        hitl_ttl_ms: settings.hitl_ttl_ms,
        session_id: params.session_id,
        user_id: params.user_id,
        tx: tx.clone(),
        cancel: cancel.clone(),
        state,
    };

    let mut messages: Vec<Message> = Vec::new();
    let mut pending: VecDeque<ToolCall> = VecDeque::new();
    let mut usage_total = Usage::default();

    // ── Seed the working conversation ───────────────────────────────
    match params.start {
        LoopStart::Fresh { user_message } => {
            let history = match ctx.state.conversations.get_history(&ctx.session_id).await {
                Ok(h) => h,
                Err(e) => {
                    tracing::error!(error = %e, "history load failed");
                    ctx.emit(LoopEvent::Error { message: "conversation load failed".into() })
                        .await;
                    ctx.emit(LoopEvent::Done { usage: usage_total }).await;
                    return;
                }
            };
            messages.push(Message::system(&ctx.effective.system_prompt));
            messages.extend(history_to_messages(
                &history,
                settings.conversation_window,
            ));
            messages.push(Message::user(&user_message));
            if !ctx.persist(STAGE_INPUT, "user", &user_message).await {
                ctx.emit(LoopEvent::Done { usage: usage_total }).await;
                return;
            }
        }
        LoopStart::Resumed { pause, approved } => {
            messages = pause.messages.clone();
            usage_total = pause.usage.clone();
            pending = pause.remaining.iter().cloned().collect();

            let call = ToolCall {
                call_id: pause.call_id.clone(),
                tool_name: pause.tool.clone(),
                arguments: pause.args.clone(),
            };
            ctx.emit(LoopEvent::ToolCall {
                id: call.call_id.clone(),
                tool: call.tool_name.clone(),
                args: call.arguments.clone(),
            })
            .await;

            let result = if !approved {
                serde_json::json!({"error": "denied by operator"})
            } else if let Some(result) = pause.result {
                // The tool already ran; the human released its result.
                result
            } else {
                match ctx.spec_for(&call.tool_name).cloned() {
                    Some(spec) => ctx.dispatch(&spec, &call).await,
                    None => serde_json::json!({"error": "tool no longer available"}),
                }
            };
            match ctx.observe(&mut messages, &call, result).await {
                Flow::Continue => {}
                Flow::Stop { emit_done } => {
                    if emit_done {
                        ctx.emit(LoopEvent::Done { usage: usage_total.clone() }).await;
                    }
                    return;
                }
            }
        }
    }

    let tool_defs: Vec<ToolDefinition> =
        ctx.effective.tools.iter().map(|t| t.definition()).collect();
    let mut turns = 0u32;
    let mut errored = false;

    // ── The reason-act-observe loop ─────────────────────────────────
    'outer: loop {
        // Observe phase: drain tool calls from the last model turn.
        while let Some(call) = pending.pop_front() {
            if ctx.cancel.is_cancelled() {
                return;
            }
            match ctx
                .handle_tool_call(&mut messages, &pending, call, &usage_total)
                .await
            {
                Flow::Continue => {}
                Flow::Stop { emit_done } => {
                    if emit_done {
                        ctx.emit(LoopEvent::Done { usage: usage_total.clone() }).await;
                    }
                    return;
                }
            }
        }

        // Reason phase: one model turn, budget permitting.
        if turns >= ctx.effective.max_turns {
            tracing::debug!(
                session_id = %ctx.session_id,
                max_turns = ctx.effective.max_turns,
                "turn budget reached"
            );
            break;
        }
        turns += 1;
        if ctx.cancel.is_cancelled() {
            return;
        }

        let req = ChatRequest {
            messages: messages.clone(),
            tools: tool_defs.clone(),
            temperature: None,
            max_tokens: ctx.effective.max_tokens,
            model: Some(ctx.effective.model.clone()),
        };
        let mut stream = match provider.chat_stream(&req).await {
            Ok(s) => s,
            Err(e) => {
                ctx.emit(LoopEvent::Error { message: e.to_string() }).await;
                errored = true;
                break 'outer;
            }
        };

        let mut text_buf = String::new();
        let mut turn_usage: Option<Usage> = None;
        // call_id -> (name, partial args) for providers that never
        // send a finished marker.
        let mut partial: HashMap<String, (String, String)> = HashMap::new();

        while let Some(event) = stream.next().await {
            if ctx.cancel.is_cancelled() {
                return;
            }
            match event {
                Ok(StreamEvent::Token { text }) => {
                    ctx.emit(LoopEvent::Text { text: text.clone() }).await;
                    text_buf.push_str(&text);
                }
                Ok(StreamEvent::ToolCallStarted { call_id, tool_name }) => {
                    partial.insert(call_id, (tool_name, String::new()));
                }
                Ok(StreamEvent::ToolCallDelta { call_id, delta }) => {
                    if let Some((_, args)) = partial.get_mut(&call_id) {
                        args.push_str(&delta);
                    }
                }
                Ok(StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                }) => {
                    partial.remove(&call_id);
                    pending.push_back(ToolCall {
                        call_id,
                        tool_name,
                        arguments,
                    });
                }
                Ok(StreamEvent::Done { usage, .. }) => {
                    turn_usage = usage;
                }
                Ok(StreamEvent::Error { message }) => {
                    ctx.emit(LoopEvent::Error { message }).await;
                    errored = true;
                    break 'outer;
                }
                Err(e) => {
                    ctx.emit(LoopEvent::Error { message: e.to_string() }).await;
                    errored = true;
                    break 'outer;
                }
            }
        }

        // Assemble stragglers that only came through start/delta.
        for (call_id, (tool_name, args)) in partial.drain() {
            let arguments =
                serde_json::from_str(&args).unwrap_or(Value::Object(Default::default()));
            pending.push_back(ToolCall {
                call_id,
                tool_name,
                arguments,
            });
        }

        if let Some(u) = &turn_usage {
            usage_total.add(u);
        }

        let has_tools = !pending.is_empty();
        if !text_buf.is_empty() {
            let stage = if has_tools { STAGE_ACT } else { STAGE_RESPOND };
            if !ctx.persist(stage, "assistant", &text_buf).await {
                ctx.emit(LoopEvent::Done { usage: usage_total.clone() }).await;
                return;
            }
        }
        if !text_buf.is_empty() || has_tools {
            messages.push(build_assistant_message(&text_buf, pending.iter()));
        }

        if !has_tools {
            break;
        }
    }

    if errored {
        tracing::debug!(session_id = %ctx.session_id, "loop ended after provider error");
    }
    ctx.emit(LoopEvent::Done { usage: usage_total }).await;
}
