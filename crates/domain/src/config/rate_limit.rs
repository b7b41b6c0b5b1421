use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rate limiting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fixed-window limiter, counted per `(user, route)` after
/// authentication so anonymous traffic cannot drain another user's
/// budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "d_window_ms")]
    pub window_ms: i64,
    #[serde(default = "d_max_requests")]
    pub max_requests: i64,
    /// Optional Redis URL for cluster-wide counters. In-process map
    /// when absent.
    #[serde(default)]
    pub store: Option<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window_ms: d_window_ms(),
            max_requests: d_max_requests(),
            store: None,
        }
    }
}

fn d_window_ms() -> i64 {
    60_000
}

fn d_max_requests() -> i64 {
    60
}
