//! Provider derivation from model names.
//!
//! The resolver never names providers directly; it derives them from the
//! model prefix and looks the API key up from the environment.

use std::sync::Arc;

use crate::anthropic::AnthropicProvider;
use crate::google::GoogleProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;
use forge_domain::error::Result;

/// The four upstream providers the sidecar can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderName {
    Anthropic,
    Openai,
    Google,
    Deepseek,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Anthropic => "anthropic",
            ProviderName::Openai => "openai",
            ProviderName::Google => "google",
            ProviderName::Deepseek => "deepseek",
        }
    }
}

/// Derive the provider from a model name prefix. Unknown prefixes fall
/// back to Anthropic.
pub fn derive_provider(model: &str) -> ProviderName {
    if model.starts_with("claude-") {
        ProviderName::Anthropic
    } else if model.starts_with("gemini-") {
        ProviderName::Google
    } else if model.starts_with("deepseek-") {
        ProviderName::Deepseek
    } else if model.starts_with("gpt-") || model == "o1" || model.starts_with("o3") {
        ProviderName::Openai
    } else {
        ProviderName::Anthropic
    }
}

/// Look up the provider's API key in the environment.
pub fn api_key_for(provider: ProviderName) -> Option<String> {
    let read = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
    match provider {
        ProviderName::Anthropic => read("ANTHROPIC_API_KEY"),
        ProviderName::Openai => read("OPENAI_API_KEY"),
        ProviderName::Google => read("GOOGLE_API_KEY").or_else(|| read("GEMINI_API_KEY")),
        ProviderName::Deepseek => read("DEEPSEEK_API_KEY"),
    }
}

/// Construct the adapter for a derived provider. Deepseek speaks the
/// OpenAI chat-completions contract, so it reuses that adapter with a
/// different base URL.
pub fn build_provider(
    provider: ProviderName,
    api_key: String,
    default_model: String,
) -> Result<Arc<dyn LlmProvider>> {
    Ok(match provider {
        ProviderName::Anthropic => Arc::new(AnthropicProvider::new(api_key, default_model)?),
        ProviderName::Google => Arc::new(GoogleProvider::new(api_key, default_model)?),
        ProviderName::Openai => Arc::new(OpenAiCompatProvider::new(
            "openai",
            "https://api.openai.com/v1",
            api_key,
            default_model,
        )?),
        ProviderName::Deepseek => Arc::new(OpenAiCompatProvider::new(
            "deepseek",
            "https://api.deepseek.com",
            api_key,
            default_model,
        )?),
    })
}
