use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sidecar listener
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Listener port. Validated to [1, 65535]; the wire type is wider
    /// so an out-of-range value fails validation instead of
    /// deserialization.
    #[serde(default = "d_port")]
    pub port: u32,
    #[serde(default = "d_host")]
    pub host: String,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: d_port(),
            host: d_host(),
        }
    }
}

fn d_true() -> bool {
    true
}

fn d_port() -> u32 {
    8787
}

fn d_host() -> String {
    "127.0.0.1".into()
}
