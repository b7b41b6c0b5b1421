mod agents;
mod auth;
mod conversation;
mod database;
mod rate_limit;
mod sidecar;
mod verification;

pub use agents::*;
pub use auth::*;
pub use conversation::*;
pub use database::*;
pub use rate_limit::*;
pub use sidecar::*;
pub use verification::*;

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::agent::{is_valid_agent_id, HitlLevel};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub auth: AuthConfig,
    pub sidecar: SidecarConfig,
    pub database: DatabaseConfig,
    pub conversation: ConversationConfig,
    pub rate_limit: RateLimitConfig,
    pub verification: VerificationConfig,
    pub hitl: HitlConfig,

    /// Model used when neither agent nor user chooses one.
    pub default_model: Option<String>,
    pub default_hitl_level: Option<HitlLevel>,
    /// Base permission for users to pick their own model / HITL level.
    pub allow_user_model_select: bool,
    pub allow_user_hitl_config: bool,
    /// Fallback system prompt (after agent prompt and active prompt
    /// version).
    pub system_prompt: Option<String>,
    /// Shared secret for the admin surface. Unset disables admin
    /// endpoints entirely.
    pub admin_key: Option<String>,
    pub agents: Vec<AgentSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlConfig {
    /// Pause-state TTL in milliseconds.
    #[serde(default = "d_hitl_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for HitlConfig {
    fn default() -> Self {
        Self {
            ttl_ms: d_hitl_ttl_ms(),
        }
    }
}

fn d_hitl_ttl_ms() -> u64 {
    300_000
}

impl Config {
    /// Load a YAML or JSON configuration file. YAML is a superset of
    /// JSON, so one deserializer covers both surfaces.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&raw)
            .map_err(|e| crate::Error::Config(format!("{}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

fn err(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Error,
        field: field.into(),
        message: message.into(),
    }
}

fn warn(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Warning,
        field: field.into(),
        message: message.into(),
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        // Sidecar port must fit [1, 65535].
        if self.sidecar.port == 0 || self.sidecar.port > 65_535 {
            errors.push(err(
                "sidecar.port",
                format!("port must be in [1, 65535] (got {})", self.sidecar.port),
            ));
        }

        // Verify mode needs a signing key whenever the listener is on.
        if self.sidecar.enabled
            && self.auth.mode == AuthMode::Verify
            && self
                .auth
                .signing_key
                .as_deref()
                .map_or(true, |k| k.is_empty())
        {
            errors.push(err(
                "auth.signingKey",
                "auth.mode = verify requires a signing key",
            ));
        }

        // Conversation window must be a positive integer.
        if self.conversation.window < 1 {
            errors.push(err(
                "conversation.window",
                format!(
                    "window must be a positive integer (got {})",
                    self.conversation.window
                ),
            ));
        }

        // Rate limit bounds.
        if self.rate_limit.enabled {
            if self.rate_limit.window_ms < 1 {
                errors.push(err(
                    "rateLimit.windowMs",
                    "windowMs must be at least 1".to_string(),
                ));
            }
            if self.rate_limit.max_requests < 1 {
                errors.push(err(
                    "rateLimit.maxRequests",
                    "maxRequests must be at least 1".to_string(),
                ));
            }
        }

        // Verifier execution bounds.
        if self.verification.custom_timeout < 1 {
            errors.push(err(
                "verification.customTimeout",
                "customTimeout must be at least 1 ms".to_string(),
            ));
        }
        if self.verification.max_queue_depth < 1 {
            errors.push(err(
                "verification.maxQueueDepth",
                "maxQueueDepth must be at least 1".to_string(),
            ));
        }
        if let Some(size) = self.verification.worker_pool_size {
            if size < 1 {
                errors.push(err(
                    "verification.workerPoolSize",
                    "workerPoolSize must be null or at least 1".to_string(),
                ));
            }
        }

        // Agent seeds: valid slugs, unique ids, exactly one default.
        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut default_count = 0usize;
        for (i, agent) in self.agents.iter().enumerate() {
            if !is_valid_agent_id(&agent.id) {
                errors.push(err(
                    format!("agents[{i}].id"),
                    format!("\"{}\" is not a valid slug ([a-z0-9_-]+)", agent.id),
                ));
            }
            if !agent.id.is_empty() && !seen_ids.insert(&agent.id) {
                errors.push(err(
                    format!("agents[{i}].id"),
                    format!("duplicate agent id \"{}\"", agent.id),
                ));
            }
            if agent.is_default {
                default_count += 1;
            }
        }
        if !self.agents.is_empty() && default_count != 1 {
            errors.push(err(
                "agents",
                format!("exactly one default agent required (got {default_count})"),
            ));
        }

        // Invalid HITL TTL is survivable but almost certainly a typo.
        if self.hitl.ttl_ms == 0 {
            errors.push(warn("hitl.ttlMs", "ttlMs of 0 expires pauses immediately"));
        }

        if self.admin_key.is_none() {
            errors.push(warn(
                "adminKey",
                "no admin key configured; admin endpoints will reject all requests",
            ));
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
