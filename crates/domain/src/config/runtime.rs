use serde::{Deserialize, Serialize};
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime driver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Per-call tool timeout. The tool future races this timer and the
    /// operation's cancel token.
    #[serde(default = "d_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    /// Upper bound on concurrently executing calls in a batch.
    #[serde(default = "d_max_parallel_tools")]
    pub max_parallel_tools: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tool_timeout_ms: d_tool_timeout_ms(),
            max_parallel_tools: d_max_parallel_tools(),
        }
    }
}

impl RuntimeConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }
}

fn d_tool_timeout_ms() -> u64 {
    60_000
}

fn d_max_parallel_tools() -> usize {
    8
}
