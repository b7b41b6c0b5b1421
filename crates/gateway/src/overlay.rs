//! Runtime configuration overlay.
//!
//! The admin surface can merge small patches onto a subset of the
//! configuration without persisting them. Readers grab an immutable
//! snapshot (one `Arc` clone, no lock held across awaits); the mutator
//! swaps in a new snapshot under a short write lock.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use forge_domain::agent::HitlLevel;
use forge_domain::config::Config;

/// The adjustable slice of the configuration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    pub default_model: Option<String>,
    pub default_hitl_level: Option<HitlLevel>,
    pub allow_user_model_select: bool,
    pub allow_user_hitl_config: bool,
    pub conversation_window: i64,
    pub hitl_ttl_ms: u64,
}

impl RuntimeSettings {
    fn from_config(cfg: &Config) -> Self {
        Self {
            default_model: cfg.default_model.clone(),
            default_hitl_level: cfg.default_hitl_level,
            allow_user_model_select: cfg.allow_user_model_select,
            allow_user_hitl_config: cfg.allow_user_hitl_config,
            conversation_window: cfg.conversation.window,
            hitl_ttl_ms: cfg.hitl.ttl_ms,
        }
    }
}

/// Patch bodies per overlay section. Unknown fields are rejected so a
/// typo does not silently no-op.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ModelPatch {
    default_model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct HitlPatch {
    default_hitl_level: Option<HitlLevel>,
    ttl_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PermissionsPatch {
    allow_user_model_select: Option<bool>,
    allow_user_hitl_config: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ConversationPatch {
    window: Option<i64>,
}

pub struct ConfigOverlay {
    current: RwLock<Arc<RuntimeSettings>>,
}

impl ConfigOverlay {
    pub fn new(cfg: &Config) -> Self {
        Self {
            current: RwLock::new(Arc::new(RuntimeSettings::from_config(cfg))),
        }
    }

    /// The current effective settings snapshot.
    pub fn snapshot(&self) -> Arc<RuntimeSettings> {
        self.current.read().clone()
    }

    /// Merge a section patch. Returns the new snapshot, or an error
    /// string for an unknown section / invalid body.
    pub fn apply(&self, section: &str, body: &Value) -> Result<Arc<RuntimeSettings>, String> {
        let mut next = (*self.snapshot()).clone();
        match section {
            "model" => {
                let patch: ModelPatch =
                    serde_json::from_value(body.clone()).map_err(|e| e.to_string())?;
                if let Some(model) = patch.default_model {
                    next.default_model = Some(model);
                }
            }
            "hitl" => {
                let patch: HitlPatch =
                    serde_json::from_value(body.clone()).map_err(|e| e.to_string())?;
                if let Some(level) = patch.default_hitl_level {
                    next.default_hitl_level = Some(level);
                }
                if let Some(ttl) = patch.ttl_ms {
                    next.hitl_ttl_ms = ttl;
                }
            }
            "permissions" => {
                let patch: PermissionsPatch =
                    serde_json::from_value(body.clone()).map_err(|e| e.to_string())?;
                if let Some(v) = patch.allow_user_model_select {
                    next.allow_user_model_select = v;
                }
                if let Some(v) = patch.allow_user_hitl_config {
                    next.allow_user_hitl_config = v;
                }
            }
            "conversation" => {
                let patch: ConversationPatch =
                    serde_json::from_value(body.clone()).map_err(|e| e.to_string())?;
                if let Some(window) = patch.window {
                    if window < 1 {
                        return Err("window must be a positive integer".into());
                    }
                    next.conversation_window = window;
                }
            }
            other => return Err(format!("unknown config section \"{other}\"")),
        }

        let snapshot = Arc::new(next);
        *self.current.write() = snapshot.clone();
        Ok(snapshot)
    }
}
