use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Verifier execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationConfig {
    /// Run custom verifiers inside the out-of-process worker pool.
    #[serde(default = "d_true")]
    pub sandbox: bool,
    /// Worker pool size. `None` means `min(4, cpu_count)`.
    #[serde(default)]
    pub worker_pool_size: Option<usize>,
    /// Per-call timeout for custom verifiers, in milliseconds.
    #[serde(default = "d_custom_timeout")]
    pub custom_timeout: u64,
    /// Submissions beyond this depth are rejected immediately.
    #[serde(default = "d_max_queue_depth")]
    pub max_queue_depth: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            sandbox: true,
            worker_pool_size: None,
            custom_timeout: d_custom_timeout(),
            max_queue_depth: d_max_queue_depth(),
        }
    }
}

fn d_true() -> bool {
    true
}

fn d_custom_timeout() -> u64 {
    2_000
}

fn d_max_queue_depth() -> usize {
    64
}
