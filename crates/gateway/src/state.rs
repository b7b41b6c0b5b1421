use std::sync::Arc;

use forge_domain::config::Config;
use forge_domain::error::Result;
use forge_providers::LlmProvider;
use forge_store::{ConversationStore, RegistryStore};
use forge_verify::WorkerPool;

use crate::overlay::ConfigOverlay;
use crate::rate_limit::RateLimiter;
use crate::resolver::Effective;
use crate::runtime::cancel::CancelMap;
use crate::runtime::hitl::HitlEngine;
use crate::runtime::tools::ToolExecutor;

/// Builds the LLM client for a resolved request. A trait so tests can
/// swap in the scripted mock without any network.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, effective: &Effective) -> Result<Arc<dyn LlmProvider>>;
}

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Configuration** — immutable base config + runtime overlay
/// - **Stores** — registry, conversations, HITL pause state
/// - **Loop machinery** — provider factory, tool executor, verifier
///   worker pool, cancellation
/// - **Admission** — rate limiter
#[derive(Clone)]
pub struct AppState {
    // ── Configuration ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub overlay: Arc<ConfigOverlay>,

    // ── Stores ────────────────────────────────────────────────────────
    pub registry: Arc<dyn RegistryStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub hitl: Arc<HitlEngine>,

    // ── Loop machinery ────────────────────────────────────────────────
    pub providers: Arc<dyn ProviderFactory>,
    pub tools: Arc<dyn ToolExecutor>,
    /// `None` when the sandbox is disabled; custom verifiers then
    /// degrade per tool role.
    pub worker_pool: Option<Arc<WorkerPool>>,
    pub cancel_map: Arc<CancelMap>,

    // ── Admission ─────────────────────────────────────────────────────
    pub rate_limiter: Arc<RateLimiter>,
}
