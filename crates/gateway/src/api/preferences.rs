//! `GET`/`PUT /agent-api/preferences` — per-user model and HITL
//! choices, gated by the permission flags the resolver enforces.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde::Deserialize;

use forge_domain::agent::HitlLevel;

use crate::auth::AuthedUser;
use crate::resolver::{resolve_effective, ResolveError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PreferencesBody {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, alias = "hitlLevel")]
    pub hitl_level: Option<String>,
}

fn api_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({"error": message}))).into_response()
}

pub async fn get_preferences(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
) -> Response {
    let prefs = match state.registry.get_preferences(&user_id).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "preference read failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "registry unavailable");
        }
    };

    let settings = state.overlay.snapshot();
    let effective =
        match resolve_effective(&state.registry, &settings, &state.config, None, &user_id).await {
            Ok(e) => e,
            Err(ResolveError::AgentNotFound) => {
                return api_error(StatusCode::NOT_FOUND, "agent not found")
            }
            Err(ResolveError::Store(e)) => {
                tracing::error!(error = %e, "resolver store failure");
                return api_error(StatusCode::INTERNAL_SERVER_ERROR, "registry unavailable");
            }
        };

    Json(serde_json::json!({
        "preferences": {
            "model": prefs.model,
            "hitlLevel": prefs.hitl_level,
        },
        "effective": {
            "model": effective.model,
            "hitlLevel": effective.hitl_level,
        },
        "permissions": {
            "allowUserModelSelect": effective.allow_user_model_select,
            "allowUserHitlConfig": effective.allow_user_hitl_config,
        },
    }))
    .into_response()
}

pub async fn put_preferences(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Json(body): Json<PreferencesBody>,
) -> Response {
    // Unknown HITL levels are rejected on write, before any
    // permission checks touch the registry.
    let hitl_level = match body.hitl_level.as_deref() {
        None => None,
        Some(raw) => match HitlLevel::parse(raw) {
            Some(level) => Some(level),
            None => {
                return api_error(
                    StatusCode::BAD_REQUEST,
                    "hitl_level must be one of autonomous, cautious, standard, paranoid",
                )
            }
        },
    };

    let settings = state.overlay.snapshot();
    let effective =
        match resolve_effective(&state.registry, &settings, &state.config, None, &user_id).await {
            Ok(e) => e,
            Err(ResolveError::AgentNotFound) => {
                return api_error(StatusCode::NOT_FOUND, "agent not found")
            }
            Err(ResolveError::Store(e)) => {
                tracing::error!(error = %e, "resolver store failure");
                return api_error(StatusCode::INTERNAL_SERVER_ERROR, "registry unavailable");
            }
        };

    if body.model.is_some() && !effective.allow_user_model_select {
        return api_error(StatusCode::FORBIDDEN, "model selection is disabled");
    }
    if hitl_level.is_some() && !effective.allow_user_hitl_config {
        return api_error(StatusCode::FORBIDDEN, "HITL configuration is disabled");
    }

    let mut prefs = match state.registry.get_preferences(&user_id).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "preference read failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "registry unavailable");
        }
    };
    if let Some(model) = body.model {
        prefs.model = Some(model);
    }
    if let Some(level) = hitl_level {
        prefs.hitl_level = Some(level);
    }

    if let Err(e) = state.registry.set_preferences(&user_id, &prefs).await {
        tracing::error!(error = %e, "preference write failed");
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, "registry unavailable");
    }

    Json(serde_json::json!({
        "preferences": {
            "model": prefs.model,
            "hitlLevel": prefs.hitl_level,
        }
    }))
    .into_response()
}
