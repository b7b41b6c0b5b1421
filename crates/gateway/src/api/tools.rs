//! `GET /agent-api/tools` — the tool set an agent exposes.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde::Deserialize;
use serde_json::Value;

use crate::auth::AuthedUser;
use crate::resolver::{resolve_effective, ResolveError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ToolsQuery {
    #[serde(default)]
    pub agent: Option<String>,
}

pub async fn list_tools(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Query(query): Query<ToolsQuery>,
) -> Response {
    let settings = state.overlay.snapshot();
    let effective = match resolve_effective(
        &state.registry,
        &settings,
        &state.config,
        query.agent.as_deref(),
        &user_id,
    )
    .await
    {
        Ok(e) => e,
        Err(ResolveError::AgentNotFound) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": "agent not found"})),
            )
                .into_response();
        }
        Err(ResolveError::Store(e)) => {
            tracing::error!(error = %e, "tool listing store failure");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "registry unavailable"})),
            )
                .into_response();
        }
    };

    let tools: Vec<Value> = effective
        .tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "name": t.name,
                "description": t.description,
                "schema": t.input_schema,
            })
        })
        .collect();

    Json(serde_json::json!({"tools": tools})).into_response()
}
