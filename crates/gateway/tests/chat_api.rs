//! End-to-end HTTP scenarios against the full router with in-memory
//! stores and a scripted LLM.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{add_tool, base_config, harness, post_chat_sync, request, token_for};
use forge_domain::stream::{StreamEvent, Usage};
use forge_providers::mock::MockProvider;

fn text_done(parts: &[&str], usage: Option<Usage>) -> Vec<StreamEvent> {
    let mut events: Vec<StreamEvent> = parts
        .iter()
        .map(|t| StreamEvent::Token {
            text: (*t).to_string(),
        })
        .collect();
    events.push(StreamEvent::Done {
        usage,
        finish_reason: Some("stop".into()),
    });
    events
}

fn tool_call_turn(id: &str, tool: &str, args: serde_json::Value) -> Vec<StreamEvent> {
    vec![
        StreamEvent::ToolCallFinished {
            call_id: id.into(),
            tool_name: tool.into(),
            arguments: args,
        },
        StreamEvent::Done {
            usage: None,
            finish_reason: Some("tool_calls".into()),
        },
    ]
}

// ── Scenario: happy path, sync ──────────────────────────────────────

#[tokio::test]
async fn happy_path_sync() {
    let h = harness(
        base_config(),
        vec![text_done(
            &["Hello ", "world!"],
            Some(Usage {
                input_tokens: 10,
                output_tokens: 20,
                total_tokens: 30,
            }),
        )],
    )
    .await;

    let (status, body) = post_chat_sync(&h.app, "user-1", json!({"message": "hi"})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["conversationId"].as_str().unwrap().is_empty());
    assert_eq!(body["message"], "Hello world!");
    assert_eq!(body["toolCalls"], json!([]));
    assert_eq!(body["warnings"], json!([]));
    assert_eq!(body["flags"], json!([]));

    // The store holds the user turn and the assistant turn.
    let session_id = body["conversationId"].as_str().unwrap();
    let history = h.state.conversations.get_history(session_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, "user");
    assert_eq!(history[0].content, "hi");
    assert_eq!(history[1].role, "assistant");
    assert_eq!(history[1].content, "Hello world!");
}

// ── Scenario: tool call aggregation ─────────────────────────────────

#[tokio::test]
async fn tool_call_aggregation() {
    let h = harness(
        base_config(),
        vec![
            tool_call_turn("tc-1", "get_data", json!({"id": 42})),
            text_done(&["Done"], None),
        ],
    )
    .await;
    add_tool(&h.state, "get_data", Some("read"), false, None).await;

    let (status, body) = post_chat_sync(&h.app, "user-1", json!({"message": "fetch it"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Done");
    assert_eq!(
        body["toolCalls"],
        json!([{
            "id": "tc-1",
            "name": "get_data",
            "args": {"id": 42},
            "result": {"value": "ok"},
        }])
    );
}

// ── Scenario: HITL pause returns 409, then resumes once ─────────────

#[tokio::test]
async fn hitl_pause_and_single_use_resume() {
    let h = harness(
        base_config(),
        vec![
            tool_call_turn("tc-1", "dangerous_tool", json!({})),
            text_done(&["Done after approval"], None),
        ],
    )
    .await;
    // requiresConfirmation pauses at the default standard level.
    add_tool(&h.state, "dangerous_tool", Some("write"), true, None).await;

    let (status, body) = post_chat_sync(&h.app, "user-1", json!({"message": "do it"})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["tool"], "dangerous_tool");
    let resume_token = body["resumeToken"].as_str().unwrap().to_string();
    assert!(!resume_token.is_empty());
    assert!(body["message"].as_str().unwrap().contains("confirmation"));

    // Approving resumes the loop; the tool runs and the model wraps up.
    let (status, body) = request(
        &h.app,
        "POST",
        "/agent-api/chat/resume",
        Some(&token_for("user-1")),
        Some(json!({"resumeToken": resume_token})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Done after approval");
    assert_eq!(body["toolCalls"][0]["result"], json!({"value": "released"}));

    // The token burned on first use.
    let (status, _) = request(
        &h.app,
        "POST",
        "/agent-api/chat/resume",
        Some(&token_for("user-1")),
        Some(json!({"resumeToken": resume_token})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn denied_resume_feeds_error_to_model() {
    let h = harness(
        base_config(),
        vec![
            tool_call_turn("tc-1", "dangerous_tool", json!({})),
            text_done(&["Understood, skipping."], None),
        ],
    )
    .await;
    add_tool(&h.state, "dangerous_tool", Some("write"), true, None).await;

    let (_, body) = post_chat_sync(&h.app, "user-1", json!({"message": "do it"})).await;
    let resume_token = body["resumeToken"].as_str().unwrap();

    let (status, body) = request(
        &h.app,
        "POST",
        "/agent-api/chat/resume",
        Some(&token_for("user-1")),
        Some(json!({"resumeToken": resume_token, "approved": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Understood, skipping.");
    assert_eq!(body["toolCalls"][0]["result"]["error"], "denied by operator");
}

// ── Scenario: rate-limit enforcement ────────────────────────────────

#[tokio::test]
async fn rate_limit_per_user() {
    let mut config = base_config();
    config.rate_limit.enabled = true;
    config.rate_limit.window_ms = 60_000;
    config.rate_limit.max_requests = 2;

    let turns = (0..5).map(|_| text_done(&["ok"], None)).collect();
    let h = harness(config, turns).await;

    for _ in 0..2 {
        let (status, _) = post_chat_sync(&h.app, "u1", json!({"message": "hi"})).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = post_chat_sync(&h.app, "u1", json!({"message": "hi"})).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["retryAfter"].as_u64().unwrap() > 0);

    // A different user in the same window is unaffected.
    let (status, _) = post_chat_sync(&h.app, "u2", json!({"message": "hi"})).await;
    assert_eq!(status, StatusCode::OK);
}

// ── Scenario: agent allowlist fail-closed ───────────────────────────

#[tokio::test]
async fn malformed_allowlist_lists_no_tools() {
    let h = harness(base_config(), vec![]).await;
    add_tool(&h.state, "get_data", Some("read"), false, None).await;

    let mut sales = forge_domain::agent::AgentRecord {
        agent_id: "sales".into(),
        display_name: "Sales".into(),
        system_prompt: None,
        default_model: None,
        default_hitl_level: None,
        allow_user_model_select: false,
        allow_user_hitl_config: false,
        tool_allowlist: "{not-json".into(),
        max_turns: None,
        max_tokens: None,
        enabled: true,
        is_default: false,
        seeded_from_config: true,
    };
    h.state.registry.upsert_agent(&sales).await.unwrap();

    let (status, body) = request(
        &h.app,
        "GET",
        "/agent-api/tools?agent=sales",
        Some(&token_for("user-1")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tools"], json!([]));

    // Sanity: a valid allowlist exposes the tool again.
    sales.tool_allowlist = r#"["get_data"]"#.into();
    h.state.registry.upsert_agent(&sales).await.unwrap();
    let (_, body) = request(
        &h.app,
        "GET",
        "/agent-api/tools?agent=sales",
        Some(&token_for("user-1")),
        None,
    )
    .await;
    assert_eq!(body["tools"].as_array().unwrap().len(), 1);
}

// ── Streaming endpoint: SSE framing and headers ─────────────────────

#[tokio::test]
async fn streaming_chat_frames_sse_events() {
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    let h = harness(
        base_config(),
        vec![text_done(
            &["Hello ", "world!"],
            Some(Usage {
                input_tokens: 10,
                output_tokens: 20,
                total_tokens: 30,
            }),
        )],
    )
    .await;

    let request = Request::builder()
        .method("POST")
        .uri("/agent-api/chat")
        .header("authorization", format!("Bearer {}", token_for("user-1")))
        .header("content-type", "application/json")
        .body(Body::from(json!({"message": "hi"}).to_string()))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert!(headers
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(headers.get("cache-control").unwrap(), "no-cache");
    assert_eq!(headers.get("x-accel-buffering").unwrap(), "no");

    // The loop completes, so the body stream terminates and can be
    // collected whole.
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("event: text"), "frames: {text}");
    assert!(text.contains("\"Hello \""), "frames: {text}");
    assert!(text.contains("event: done"), "frames: {text}");
    assert!(text.contains("\"inputTokens\":10"), "frames: {text}");
    // Blank line terminates each frame.
    assert!(text.contains("\n\n"));
}

// ── Auth and validation edges ───────────────────────────────────────

#[tokio::test]
async fn missing_token_is_401() {
    let h = harness(base_config(), vec![]).await;
    let (status, _) = request(
        &h.app,
        "POST",
        "/agent-api/chat-sync",
        None,
        Some(json!({"message": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn query_token_is_accepted() {
    let h = harness(base_config(), vec![text_done(&["hi"], None)]).await;
    let token = token_for("user-1");
    let (status, _) = request(
        &h.app,
        "POST",
        &format!("/agent-api/chat-sync?token={token}"),
        None,
        Some(json!({"message": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_agent_is_404() {
    let h = harness(base_config(), vec![]).await;
    let (status, _) = post_chat_sync(
        &h.app,
        "user-1",
        json!({"message": "hi", "agent": "ghost"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_message_is_400() {
    let h = harness(base_config(), vec![]).await;
    let (status, _) = post_chat_sync(&h.app, "user-1", json!({"message": "  "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn provider_failure_stays_200_with_flags() {
    let mut h = harness(base_config(), vec![]).await;
    let failing = std::sync::Arc::new(MockProvider::failing("upstream down"));
    h.state.providers = std::sync::Arc::new(common::MockFactory(failing));
    let app = forge_gateway::api::router(h.state.clone());

    let (status, body) = request(
        &app,
        "POST",
        "/agent-api/chat-sync",
        Some(&token_for("user-1")),
        Some(json!({"message": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "");
    assert!(body["flags"][0].as_str().unwrap().contains("upstream down"));
}

// ── Session continuity ──────────────────────────────────────────────

#[tokio::test]
async fn second_turn_reuses_session_history() {
    let h = harness(
        base_config(),
        vec![text_done(&["first reply"], None), text_done(&["second"], None)],
    )
    .await;

    let (_, body) = post_chat_sync(&h.app, "user-1", json!({"message": "one"})).await;
    let session_id = body["conversationId"].as_str().unwrap().to_string();

    let (_, body) = post_chat_sync(
        &h.app,
        "user-1",
        json!({"message": "two", "sessionId": session_id}),
    )
    .await;
    assert_eq!(body["conversationId"], session_id.as_str());

    let history = h
        .state
        .conversations
        .get_history(&session_id)
        .await
        .unwrap();
    assert_eq!(history.len(), 4);

    // The second LLM call saw the first exchange.
    let requests = h.provider.requests.lock();
    let second = &requests[1];
    assert!(second.messages.len() >= 4); // system + 2 history + current
}

// ── Preferences surface ─────────────────────────────────────────────

#[tokio::test]
async fn preference_validation_and_permissions() {
    let h = harness(base_config(), vec![]).await;
    let token = token_for("user-1");

    // Invalid HITL level: 400.
    let (status, _) = request(
        &h.app,
        "PUT",
        "/agent-api/preferences",
        Some(&token),
        Some(json!({"hitl_level": "reckless"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Permission off: 403.
    let (status, _) = request(
        &h.app,
        "PUT",
        "/agent-api/preferences",
        Some(&token),
        Some(json!({"model": "gpt-4o"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn preference_round_trip_with_permissions() {
    let mut config = base_config();
    config.allow_user_model_select = true;
    config.allow_user_hitl_config = true;
    let h = harness(config, vec![]).await;
    let token = token_for("user-1");

    let (status, _) = request(
        &h.app,
        "PUT",
        "/agent-api/preferences",
        Some(&token),
        Some(json!({"model": "gpt-4o", "hitl_level": "paranoid"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(&h.app, "GET", "/agent-api/preferences", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["preferences"]["model"], "gpt-4o");
    assert_eq!(body["effective"]["model"], "gpt-4o");
    assert_eq!(body["effective"]["hitlLevel"], "paranoid");
    assert_eq!(body["permissions"]["allowUserModelSelect"], true);
}

#[tokio::test]
async fn stored_preference_ignored_once_permission_revoked() {
    let mut config = base_config();
    config.allow_user_model_select = true;
    let h = harness(config, vec![]).await;
    let token = token_for("user-1");
    let (_, _) = request(
        &h.app,
        "PUT",
        "/agent-api/preferences",
        Some(&token),
        Some(json!({"model": "gpt-4o"})),
    )
    .await;

    // Admin turns the permission off at runtime.
    h.state
        .overlay
        .apply("permissions", &json!({"allowUserModelSelect": false}))
        .unwrap();

    let (_, body) = request(&h.app, "GET", "/agent-api/preferences", Some(&token), None).await;
    assert_eq!(body["effective"]["model"], "claude-3-5-sonnet-latest");
    assert_eq!(body["preferences"]["model"], "gpt-4o");
}
