//! AppState construction shared by `serve` and the test harness.

use std::sync::Arc;

use anyhow::Context;

use forge_domain::config::{Config, ConfigSeverity};
use forge_domain::error::Error;
use forge_providers::{build_provider, LlmProvider};
use forge_store::conversation::open_conversation_store;
use forge_store::hitl::open_hitl_store;
use forge_store::registry::open_registry;
use forge_verify::{PoolConfig, WorkerPool};

use crate::overlay::ConfigOverlay;
use crate::rate_limit::RateLimiter;
use crate::resolver::Effective;
use crate::runtime::cancel::CancelMap;
use crate::runtime::hitl::HitlEngine;
use crate::runtime::tools::HttpToolExecutor;
use crate::state::{AppState, ProviderFactory};

/// The production factory: derive the adapter from the resolved model
/// and the environment's API key.
pub struct DefaultProviderFactory;

impl ProviderFactory for DefaultProviderFactory {
    fn create(&self, effective: &Effective) -> forge_domain::Result<Arc<dyn LlmProvider>> {
        let api_key = effective.api_key.clone().ok_or_else(|| {
            Error::Auth(format!(
                "no API key configured for provider {}",
                effective.provider.as_str()
            ))
        })?;
        build_provider(effective.provider, api_key, effective.model.clone())
    }
}

/// Validate config, initialize every subsystem, and return a fully
/// wired [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let error_count = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if error_count > 0 {
        anyhow::bail!("config validation failed with {error_count} error(s)");
    }

    // ── Registry (agents, prefs, prompts, tools, verifiers) ──────────
    let registry = open_registry(&config.database)
        .await
        .context("opening registry store")?;
    registry
        .seed_agents(&config.agents)
        .await
        .context("seeding agents")?;
    tracing::info!(
        backend = ?config.database.kind,
        agents = config.agents.len(),
        "registry ready"
    );

    // ── Conversation store ───────────────────────────────────────────
    let conversations =
        open_conversation_store(&config.conversation, &config.database.url, &config.database.url)
            .await
            .context("opening conversation store")?;
    tracing::info!(backend = ?config.conversation.store, "conversation store ready");

    // ── HITL engine ──────────────────────────────────────────────────
    let hitl_store = open_hitl_store(&config)
        .await
        .context("opening HITL store")?;
    let hitl = Arc::new(HitlEngine::new(hitl_store));

    // ── Verifier worker pool ─────────────────────────────────────────
    let worker_pool = if config.verification.sandbox {
        let exe = std::env::current_exe().context("locating sidecar binary")?;
        let pool_cfg = PoolConfig::from_verification(
            &config.verification,
            vec![exe.to_string_lossy().into_owned(), "verifier-worker".into()],
        );
        tracing::info!(
            size = pool_cfg.size,
            timeout_ms = config.verification.custom_timeout,
            "verifier worker pool ready"
        );
        Some(Arc::new(WorkerPool::start(pool_cfg)))
    } else {
        tracing::warn!("verifier sandbox disabled; custom verifiers will degrade");
        None
    };

    // ── Rate limiter ─────────────────────────────────────────────────
    let rate_limiter =
        Arc::new(RateLimiter::from_config(&config.rate_limit).context("rate limiter")?);

    Ok(AppState {
        overlay: Arc::new(ConfigOverlay::new(&config)),
        registry,
        conversations,
        hitl,
        providers: Arc::new(DefaultProviderFactory),
        tools: Arc::new(HttpToolExecutor::new().context("tool executor")?),
        worker_pool,
        cancel_map: Arc::new(CancelMap::new()),
        rate_limiter,
        config,
    })
}
