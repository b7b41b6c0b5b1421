//! Preference / agent resolver.
//!
//! Merges three layers in order — base configuration, agent overrides,
//! user preferences (only where the corresponding permission flag is
//! on) — into the effective per-request configuration.

use std::sync::Arc;

use forge_domain::agent::{AgentRecord, HitlLevel, ToolAllowlist};
use forge_domain::config::Config;
use forge_domain::error::Error;
use forge_domain::tool::ToolSpec;
use forge_providers::{api_key_for, derive_provider, ProviderName};
use forge_store::RegistryStore;

use crate::overlay::RuntimeSettings;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
const DEFAULT_MAX_TURNS: u32 = 8;

/// The fully merged per-request configuration.
#[derive(Debug, Clone)]
pub struct Effective {
    pub agent_id: Option<String>,
    pub model: String,
    pub hitl_level: HitlLevel,
    pub provider: ProviderName,
    pub api_key: Option<String>,
    pub system_prompt: String,
    pub max_turns: u32,
    pub max_tokens: Option<u32>,
    /// Promoted tools surviving the agent allowlist.
    pub tools: Vec<ToolSpec>,
    /// Effective permission flags (base, overridden by agent-true).
    pub allow_user_model_select: bool,
    pub allow_user_hitl_config: bool,
}

#[derive(Debug)]
pub enum ResolveError {
    AgentNotFound,
    Store(Error),
}

impl From<Error> for ResolveError {
    fn from(e: Error) -> Self {
        ResolveError::Store(e)
    }
}

pub async fn resolve_effective(
    registry: &Arc<dyn RegistryStore>,
    settings: &RuntimeSettings,
    config: &Config,
    agent_param: Option<&str>,
    user_id: &str,
) -> Result<Effective, ResolveError> {
    // ── Agent lookup ────────────────────────────────────────────────
    let agent: Option<AgentRecord> = match agent_param {
        Some(id) => match registry.get_agent(id).await? {
            Some(record) if record.enabled => Some(record),
            // Missing and disabled look the same to the caller.
            _ => return Err(ResolveError::AgentNotFound),
        },
        None => registry.default_agent().await?,
    };

    // ── Permission flags: agent overrides only when true ────────────
    let mut allow_model = settings.allow_user_model_select;
    let mut allow_hitl = settings.allow_user_hitl_config;
    if let Some(a) = &agent {
        if a.allow_user_model_select {
            allow_model = true;
        }
        if a.allow_user_hitl_config {
            allow_hitl = true;
        }
    }

    // ── Model and HITL level ────────────────────────────────────────
    let mut model = settings
        .default_model
        .clone()
        .unwrap_or_else(|| DEFAULT_MODEL.into());
    let mut hitl_level = settings.default_hitl_level.unwrap_or(HitlLevel::Standard);
    if let Some(a) = &agent {
        if let Some(m) = &a.default_model {
            model = m.clone();
        }
        if let Some(l) = a.default_hitl_level {
            hitl_level = l;
        }
    }

    let prefs = registry.get_preferences(user_id).await?;
    if allow_model {
        if let Some(m) = prefs.model {
            model = m;
        }
    }
    if allow_hitl {
        if let Some(l) = prefs.hitl_level {
            hitl_level = l;
        }
    }

    // ── System prompt fallback chain ────────────────────────────────
    let system_prompt = match agent.as_ref().and_then(|a| a.system_prompt.clone()) {
        Some(prompt) => prompt,
        None => match registry.active_prompt_version().await? {
            Some(version) => version.content,
            None => config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
        },
    };

    // ── Tool filtering: allowlist fails closed ──────────────────────
    let promoted = registry.promoted_tools().await?;
    let tools: Vec<ToolSpec> = match agent.as_ref().map(|a| a.allowlist()) {
        None | Some(ToolAllowlist::All) => promoted.into_iter().map(|t| t.spec).collect(),
        Some(ToolAllowlist::Named(names)) => promoted
            .into_iter()
            .filter(|t| names.contains(&t.tool_name))
            .map(|t| t.spec)
            .collect(),
    };

    // ── Provider derivation ─────────────────────────────────────────
    let provider = derive_provider(&model);
    let api_key = api_key_for(provider);

    Ok(Effective {
        agent_id: agent.as_ref().map(|a| a.agent_id.clone()),
        model,
        hitl_level,
        provider,
        api_key,
        system_prompt,
        max_turns: agent
            .as_ref()
            .and_then(|a| a.max_turns)
            .unwrap_or(DEFAULT_MAX_TURNS),
        max_tokens: agent.as_ref().and_then(|a| a.max_tokens),
        tools,
        allow_user_model_select: allow_model,
        allow_user_hitl_config: allow_hitl,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use forge_domain::agent::UserPreferences;
    use forge_domain::tool::{RegistryTool, ToolLifecycle};
    use forge_store::registry::SqliteRegistry;

    fn settings() -> RuntimeSettings {
        RuntimeSettings {
            default_model: Some("claude-3-5-sonnet-latest".into()),
            default_hitl_level: Some(HitlLevel::Standard),
            allow_user_model_select: false,
            allow_user_hitl_config: false,
            conversation_window: 50,
            hitl_ttl_ms: 300_000,
        }
    }

    fn agent(id: &str) -> AgentRecord {
        AgentRecord {
            agent_id: id.into(),
            display_name: id.into(),
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
            seeded_from_config: true,
        }
    }

    async fn registry_with_tools() -> Arc<dyn RegistryStore> {
        let reg = SqliteRegistry::open_in_memory().unwrap();
        for name in ["get_data", "send_mail"] {
            reg.upsert_tool(&RegistryTool {
                tool_name: name.into(),
                lifecycle: ToolLifecycle::Promoted,
                spec: ToolSpec {
                    name: name.into(),
                    ..ToolSpec::default()
                },
                baseline_pass_rate: None,
                promoted_at: None,
            })
            .await
            .unwrap();
        }
        Arc::new(reg)
    }

    #[tokio::test]
    async fn base_defaults_without_agent() {
        let reg = registry_with_tools().await;
        let eff = resolve_effective(&reg, &settings(), &Config::default(), None, "u1")
            .await
            .unwrap();
        assert_eq!(eff.model, "claude-3-5-sonnet-latest");
        assert_eq!(eff.hitl_level, HitlLevel::Standard);
        assert_eq!(eff.provider, ProviderName::Anthropic);
        assert_eq!(eff.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(eff.tools.len(), 2);
    }

    #[tokio::test]
    async fn unknown_agent_is_not_found() {
        let reg = registry_with_tools().await;
        let err = resolve_effective(&reg, &settings(), &Config::default(), Some("nope"), "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::AgentNotFound));
    }

    #[tokio::test]
    async fn disabled_agent_is_not_found() {
        let reg = registry_with_tools().await;
        let mut a = agent("off");
        a.enabled = false;
        reg.upsert_agent(&a).await.unwrap();
        let err = resolve_effective(&reg, &settings(), &Config::default(), Some("off"), "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::AgentNotFound));
    }

    #[tokio::test]
    async fn agent_overrides_only_non_null_fields() {
        let reg = registry_with_tools().await;
        let mut a = agent("sales");
        a.default_model = Some("gpt-4o".into());
        reg.upsert_agent(&a).await.unwrap();

        let eff = resolve_effective(&reg, &settings(), &Config::default(), Some("sales"), "u1")
            .await
            .unwrap();
        assert_eq!(eff.model, "gpt-4o");
        assert_eq!(eff.provider, ProviderName::Openai);
        // HITL untouched: agent field was null.
        assert_eq!(eff.hitl_level, HitlLevel::Standard);
    }

    #[tokio::test]
    async fn user_model_ignored_without_permission() {
        let reg = registry_with_tools().await;
        reg.set_preferences(
            "u1",
            &UserPreferences {
                model: Some("deepseek-chat".into()),
                hitl_level: None,
            },
        )
        .await
        .unwrap();

        let eff = resolve_effective(&reg, &settings(), &Config::default(), None, "u1")
            .await
            .unwrap();
        assert_eq!(eff.model, "claude-3-5-sonnet-latest");
    }

    #[tokio::test]
    async fn user_model_applied_with_permission() {
        let reg = registry_with_tools().await;
        reg.set_preferences(
            "u1",
            &UserPreferences {
                model: Some("deepseek-chat".into()),
                hitl_level: None,
            },
        )
        .await
        .unwrap();

        let mut base = settings();
        base.allow_user_model_select = true;
        let eff = resolve_effective(&reg, &base, &Config::default(), None, "u1")
            .await
            .unwrap();
        assert_eq!(eff.model, "deepseek-chat");
        assert_eq!(eff.provider, ProviderName::Deepseek);
    }

    #[tokio::test]
    async fn agent_true_flag_opens_user_preference() {
        let reg = registry_with_tools().await;
        let mut a = agent("open");
        a.allow_user_hitl_config = true;
        reg.upsert_agent(&a).await.unwrap();
        reg.set_preferences(
            "u1",
            &UserPreferences {
                model: None,
                hitl_level: Some(HitlLevel::Paranoid),
            },
        )
        .await
        .unwrap();

        let eff = resolve_effective(&reg, &settings(), &Config::default(), Some("open"), "u1")
            .await
            .unwrap();
        assert_eq!(eff.hitl_level, HitlLevel::Paranoid);
    }

    #[tokio::test]
    async fn malformed_allowlist_fails_closed() {
        let reg = registry_with_tools().await;
        let mut a = agent("sales");
        a.tool_allowlist = "{not-json".into();
        reg.upsert_agent(&a).await.unwrap();

        let eff = resolve_effective(&reg, &settings(), &Config::default(), Some("sales"), "u1")
            .await
            .unwrap();
        assert!(eff.tools.is_empty());
    }

    #[tokio::test]
    async fn named_allowlist_filters_tools() {
        let reg = registry_with_tools().await;
        let mut a = agent("sales");
        a.tool_allowlist = r#"["get_data"]"#.into();
        reg.upsert_agent(&a).await.unwrap();

        let eff = resolve_effective(&reg, &settings(), &Config::default(), Some("sales"), "u1")
            .await
            .unwrap();
        assert_eq!(eff.tools.len(), 1);
        assert_eq!(eff.tools[0].name, "get_data");
    }

    #[tokio::test]
    async fn prompt_chain_prefers_agent_then_active_version() {
        let reg = registry_with_tools().await;
        let id = reg
            .create_prompt_version("1.0", "from version", "")
            .await
            .unwrap();
        reg.activate_prompt_version(id).await.unwrap();

        // Without an agent prompt, the active version wins.
        let eff = resolve_effective(&reg, &settings(), &Config::default(), None, "u1")
            .await
            .unwrap();
        assert_eq!(eff.system_prompt, "from version");

        // An agent prompt beats the active version.
        let mut a = agent("prompted");
        a.system_prompt = Some("from agent".into());
        reg.upsert_agent(&a).await.unwrap();
        let eff = resolve_effective(&reg, &settings(), &Config::default(), Some("prompted"), "u1")
            .await
            .unwrap();
        assert_eq!(eff.system_prompt, "from agent");
    }

    #[tokio::test]
    async fn default_agent_used_when_none_named() {
        let reg = registry_with_tools().await;
        let mut a = agent("main");
        a.is_default = true;
        a.default_model = Some("gemini-2.0-flash".into());
        reg.upsert_agent(&a).await.unwrap();

        let eff = resolve_effective(&reg, &settings(), &Config::default(), None, "u1")
            .await
            .unwrap();
        assert_eq!(eff.agent_id.as_deref(), Some("main"));
        assert_eq!(eff.provider, ProviderName::Google);
    }
}
