//! Admin surface: runtime config overlay, agent registry, prompt
//! versions, verifier bindings, session operations.
//!
//! All routes sit behind the admin bearer; overlay writes mutate the
//! in-memory snapshot only and do not persist.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::Value;

use forge_domain::agent::{is_valid_agent_id, AgentRecord, HitlLevel};

use crate::state::AppState;

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({"error": message.into()}))).into_response()
}

fn store_failure(e: forge_domain::Error) -> Response {
    tracing::error!(error = %e, "admin store failure");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "registry unavailable")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config overlay
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const OVERLAY_SECTIONS: [&str; 4] = ["model", "hitl", "permissions", "conversation"];

pub async fn get_config(State(state): State<AppState>) -> Response {
    let cfg = &state.config;
    let snap = state.overlay.snapshot();
    // Secrets (admin key, signing key) never leave the process.
    Json(serde_json::json!({
        "auth": {
            "mode": cfg.auth.mode,
            "claimsPath": cfg.auth.claims_path,
        },
        "sidecar": cfg.sidecar,
        "database": {"type": cfg.database.kind, "url": cfg.database.url},
        "conversation": {
            "store": cfg.conversation.store,
            "window": snap.conversation_window,
        },
        "rateLimit": cfg.rate_limit,
        "verification": cfg.verification,
        "hitl": {"ttlMs": snap.hitl_ttl_ms},
        "defaultModel": snap.default_model,
        "defaultHitlLevel": snap.default_hitl_level,
        "allowUserModelSelect": snap.allow_user_model_select,
        "allowUserHitlConfig": snap.allow_user_hitl_config,
    }))
    .into_response()
}

pub async fn put_config(
    State(state): State<AppState>,
    Path(section): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if !OVERLAY_SECTIONS.contains(&section.as_str()) {
        return api_error(
            StatusCode::NOT_FOUND,
            format!("unknown config section \"{section}\""),
        );
    }
    match state.overlay.apply(&section, &body) {
        Ok(snapshot) => Json(serde_json::json!({
            "section": section,
            "effective": &*snapshot,
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::BAD_REQUEST, e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentUpsertBody {
    pub display_name: Option<String>,
    pub system_prompt: Option<String>,
    pub default_model: Option<String>,
    pub default_hitl_level: Option<HitlLevel>,
    pub allow_user_model_select: Option<bool>,
    pub allow_user_hitl_config: Option<bool>,
    pub tool_allowlist: Option<Value>,
    pub max_turns: Option<u32>,
    pub max_tokens: Option<u32>,
    pub enabled: Option<bool>,
    pub is_default: Option<bool>,
}

impl Default for AgentUpsertBody {
    fn default() -> Self {
        Self {
            display_name: None,
            system_prompt: None,
            default_model: None,
            default_hitl_level: None,
            allow_user_model_select: None,
            allow_user_hitl_config: None,
            tool_allowlist: None,
            max_turns: None,
            max_tokens: None,
            enabled: None,
            is_default: None,
        }
    }
}

pub async fn list_agents(State(state): State<AppState>) -> Response {
    match state.registry.list_agents().await {
        Ok(agents) => Json(serde_json::json!({"agents": agents})).into_response(),
        Err(e) => store_failure(e),
    }
}

pub async fn put_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<AgentUpsertBody>,
) -> Response {
    if !is_valid_agent_id(&agent_id) {
        return api_error(
            StatusCode::BAD_REQUEST,
            "agent id must match [a-z0-9_-]+",
        );
    }

    let existing = match state.registry.get_agent(&agent_id).await {
        Ok(found) => found,
        Err(e) => return store_failure(e),
    };

    let mut record = existing.unwrap_or(AgentRecord {
        agent_id: agent_id.clone(),
        display_name: agent_id.clone(),
        system_prompt: None,
        default_model: None,
        default_hitl_level: None,
        allow_user_model_select: false,
        allow_user_hitl_config: false,
        tool_allowlist: "*".into(),
        max_turns: None,
        max_tokens: None,
        enabled: true,
        is_default: false,
        seeded_from_config: false,
    });

    if let Some(v) = body.display_name {
        record.display_name = v;
    }
    if let Some(v) = body.system_prompt {
        record.system_prompt = Some(v);
    }
    if let Some(v) = body.default_model {
        record.default_model = Some(v);
    }
    if let Some(v) = body.default_hitl_level {
        record.default_hitl_level = Some(v);
    }
    if let Some(v) = body.allow_user_model_select {
        record.allow_user_model_select = v;
    }
    if let Some(v) = body.allow_user_hitl_config {
        record.allow_user_hitl_config = v;
    }
    if let Some(v) = body.tool_allowlist {
        record.tool_allowlist = match v {
            Value::String(s) if s == "*" => "*".into(),
            other => other.to_string(),
        };
    }
    if let Some(v) = body.max_turns {
        record.max_turns = Some(v);
    }
    if let Some(v) = body.max_tokens {
        record.max_tokens = Some(v);
    }
    if let Some(v) = body.enabled {
        record.enabled = v;
    }
    if let Some(v) = body.is_default {
        record.is_default = v;
    }
    // Admin edits pin the row against future config seeds.
    record.seeded_from_config = false;

    match state.registry.upsert_agent(&record).await {
        Ok(()) => Json(serde_json::json!({"agent": record})).into_response(),
        Err(e) => store_failure(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn incomplete_sessions(State(state): State<AppState>) -> Response {
    match state.conversations.get_incomplete_sessions().await {
        Ok(sessions) => Json(serde_json::json!({"sessions": sessions})).into_response(),
        Err(e) => store_failure(e),
    }
}

pub async fn cancel_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let cancelled = state.cancel_map.cancel(&session_id);
    if cancelled {
        tracing::info!(session_id = %session_id, "loop cancelled by admin");
    }
    Json(serde_json::json!({"cancelled": cancelled})).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt versions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct PromptVersionBody {
    pub version: String,
    pub content: String,
    #[serde(default)]
    pub notes: String,
}

pub async fn list_prompt_versions(State(state): State<AppState>) -> Response {
    match state.registry.list_prompt_versions().await {
        Ok(versions) => Json(serde_json::json!({"versions": versions})).into_response(),
        Err(e) => store_failure(e),
    }
}

pub async fn create_prompt_version(
    State(state): State<AppState>,
    Json(body): Json<PromptVersionBody>,
) -> Response {
    if body.version.trim().is_empty() || body.content.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "version and content are required");
    }
    match state
        .registry
        .create_prompt_version(&body.version, &body.content, &body.notes)
        .await
    {
        Ok(id) => (
            StatusCode::OK,
            Json(serde_json::json!({"id": id, "version": body.version})),
        )
            .into_response(),
        Err(e) => store_failure(e),
    }
}

pub async fn activate_prompt_version(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Response {
    match state.registry.activate_prompt_version(id).await {
        Ok(true) => Json(serde_json::json!({"activated": id})).into_response(),
        Ok(false) => api_error(StatusCode::NOT_FOUND, format!("no prompt version {id}")),
        Err(e) => store_failure(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Verifier bindings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn bind_verifier(
    State(state): State<AppState>,
    Path((name, tool)): Path<(String, String)>,
) -> Response {
    let known = match state.registry.list_verifiers().await {
        Ok(verifiers) => verifiers.iter().any(|v| v.name == name),
        Err(e) => return store_failure(e),
    };
    if !known {
        return api_error(StatusCode::NOT_FOUND, format!("unknown verifier \"{name}\""));
    }
    match state.registry.bind_verifier(&name, &tool).await {
        Ok(()) => Json(serde_json::json!({"verifier": name, "tool": tool})).into_response(),
        Err(e) => store_failure(e),
    }
}

pub async fn unbind_verifier(
    State(state): State<AppState>,
    Path((name, tool)): Path<(String, String)>,
) -> Response {
    match state.registry.unbind_verifier(&name, &tool).await {
        Ok(true) => Json(serde_json::json!({"removed": true})).into_response(),
        Ok(false) => api_error(StatusCode::NOT_FOUND, "binding not found"),
        Err(e) => store_failure(e),
    }
}
