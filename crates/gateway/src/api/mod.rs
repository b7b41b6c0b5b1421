pub mod admin;
pub mod chat;
pub mod preferences;
pub mod tools;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;

use crate::auth;
use crate::rate_limit;
use crate::state::AppState;

/// Build the full API router.
///
/// `/agent-api` routes require end-user auth, then pass the rate
/// limiter (in that order, so anonymous traffic never touches another
/// user's budget). `/forge-admin` routes require the admin bearer.
pub fn router(state: AppState) -> Router {
    let agent_api = Router::new()
        .route("/chat", post(chat::chat_stream))
        .route("/chat-sync", post(chat::chat_sync))
        .route("/chat/resume", post(chat::chat_resume))
        .route("/tools", get(tools::list_tools))
        .route(
            "/preferences",
            get(preferences::get_preferences).put(preferences::put_preferences),
        )
        // Innermost first: the limiter sees only authenticated requests.
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_user,
        ));

    let admin = Router::new()
        .route("/config", get(admin::get_config))
        .route("/config/:section", put(admin::put_config))
        .route("/agents", get(admin::list_agents))
        .route("/agents/:id", put(admin::put_agent))
        .route("/sessions/incomplete", get(admin::incomplete_sessions))
        .route("/sessions/:id/cancel", post(admin::cancel_session))
        .route(
            "/prompt-versions",
            get(admin::list_prompt_versions).post(admin::create_prompt_version),
        )
        .route(
            "/prompt-versions/:id/activate",
            post(admin::activate_prompt_version),
        )
        .route(
            "/verifiers/:name/bindings/:tool",
            post(admin::bind_verifier).delete(admin::unbind_verifier),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin,
        ));

    Router::new()
        .nest("/agent-api", agent_api)
        .nest("/forge-admin", admin)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
