//! Shared harness for gateway integration tests: in-memory stores, a
//! scripted LLM, a table-driven tool executor, and a ready-to-call
//! router.

// Each test binary uses a different slice of the harness.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;
use tower::util::ServiceExt;

use forge_domain::config::Config;
use forge_domain::error::Result;
use forge_domain::stream::StreamEvent;
use forge_domain::tool::{McpRouting, RegistryTool, ToolLifecycle, ToolSpec};
use forge_providers::mock::MockProvider;
use forge_providers::LlmProvider;
use forge_store::conversation::MemoryConversationStore;
use forge_store::hitl::MemoryHitlStore;
use forge_store::registry::SqliteRegistry;
use forge_store::{ConversationStore, RegistryStore};
use forge_verify::WorkerPool;

use forge_gateway::api;
use forge_gateway::overlay::ConfigOverlay;
use forge_gateway::rate_limit::RateLimiter;
use forge_gateway::resolver::Effective;
use forge_gateway::runtime::cancel::CancelMap;
use forge_gateway::runtime::hitl::HitlEngine;
use forge_gateway::runtime::tools::ToolExecutor;
use forge_gateway::state::{AppState, ProviderFactory};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test doubles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MockFactory(pub Arc<MockProvider>);

impl ProviderFactory for MockFactory {
    fn create(&self, _effective: &Effective) -> Result<Arc<dyn LlmProvider>> {
        Ok(self.0.clone())
    }
}

/// Answers tool calls from a fixed table; unknown tools error.
pub struct TableToolExecutor {
    pub responses: HashMap<String, Value>,
    /// Per-call latency, for cancellation tests.
    pub delay_ms: u64,
}

#[async_trait::async_trait]
impl ToolExecutor for TableToolExecutor {
    async fn execute(&self, spec: &ToolSpec, _args: &Value) -> Result<Value> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        self.responses
            .get(&spec.name)
            .cloned()
            .ok_or_else(|| forge_domain::Error::Other(format!("no scripted reply for {}", spec.name)))
    }
}

/// The standard scripted tool replies.
pub fn default_responses() -> HashMap<String, Value> {
    let mut responses = HashMap::new();
    responses.insert("get_data".to_string(), serde_json::json!({"value": "ok"}));
    responses.insert(
        "dangerous_tool".to_string(),
        serde_json::json!({"value": "released"}),
    );
    responses.insert(
        "block_tool".to_string(),
        serde_json::json!({"value": "written"}),
    );
    responses
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Harness {
    pub state: AppState,
    pub app: Router,
    pub provider: Arc<MockProvider>,
}

pub async fn harness(config: Config, turns: Vec<Vec<StreamEvent>>) -> Harness {
    harness_with(config, turns, None).await
}

pub async fn harness_with(
    config: Config,
    turns: Vec<Vec<StreamEvent>>,
    pool: Option<Arc<WorkerPool>>,
) -> Harness {
    let provider = Arc::new(MockProvider::new(turns));
    let registry: Arc<dyn RegistryStore> = Arc::new(SqliteRegistry::open_in_memory().unwrap());
    let conversations: Arc<dyn ConversationStore> = Arc::new(MemoryConversationStore::new());

    let config = Arc::new(config);
    let state = AppState {
        overlay: Arc::new(ConfigOverlay::new(&config)),
        registry,
        conversations,
        hitl: Arc::new(HitlEngine::new(Arc::new(MemoryHitlStore::new()))),
        providers: Arc::new(MockFactory(provider.clone())),
        tools: Arc::new(TableToolExecutor {
            responses: default_responses(),
            delay_ms: 0,
        }),
        worker_pool: pool,
        cancel_map: Arc::new(CancelMap::new()),
        rate_limiter: Arc::new(RateLimiter::from_config(&config.rate_limit).unwrap()),
        config,
    };

    Harness {
        app: api::router(state.clone()),
        state,
        provider,
    }
}

pub fn base_config() -> Config {
    Config {
        default_model: Some("claude-3-5-sonnet-latest".into()),
        admin_key: Some("admin-secret".into()),
        ..Config::default()
    }
}

/// Register a promoted tool in the harness registry.
pub async fn add_tool(
    state: &AppState,
    name: &str,
    category: Option<&str>,
    requires_confirmation: bool,
    method: Option<&str>,
) {
    state
        .registry
        .upsert_tool(&RegistryTool {
            tool_name: name.into(),
            lifecycle: ToolLifecycle::Promoted,
            spec: ToolSpec {
                name: name.into(),
                description: format!("{name} test tool"),
                input_schema: serde_json::json!({"type": "object"}),
                category: category.map(String::from),
                requires_confirmation,
                timeout_ms: None,
                mcp_routing: method.map(|m| McpRouting {
                    endpoint: format!("http://localhost:9/{name}"),
                    method: m.into(),
                }),
            },
            baseline_pass_rate: Some(1.0),
            promoted_at: None,
        })
        .await
        .unwrap();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An unsigned JWT that trust mode accepts.
pub fn token_for(sub: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::json!({"sub": sub}).to_string());
    format!("{header}.{payload}.sig")
}

pub async fn request(
    app: &Router,
    method: &str,
    path: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    };
    (status, value)
}

pub async fn post_chat_sync(app: &Router, sub: &str, body: Value) -> (StatusCode, Value) {
    request(
        app,
        "POST",
        "/agent-api/chat-sync",
        Some(&token_for(sub)),
        Some(body),
    )
    .await
}
