use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Authentication
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How bearer tokens are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Decode the JWT envelope and trust its claims without checking
    /// the signature (the sidecar sits behind a gateway that already
    /// verified it).
    Trust,
    /// Require HS256 and recompute the HMAC with `signing_key`.
    Verify,
}

impl Default for AuthMode {
    fn default() -> Self {
        AuthMode::Trust
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// HS256 signing key. Mandatory in `verify` mode.
    #[serde(default)]
    pub signing_key: Option<String>,
    /// Dotted path into the JWT claims naming the user id.
    #[serde(default = "d_claims_path")]
    pub claims_path: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Trust,
            signing_key: None,
            claims_path: d_claims_path(),
        }
    }
}

fn d_claims_path() -> String {
    "sub".into()
}
