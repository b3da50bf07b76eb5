use serde::{Deserialize, Serialize};
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Operation registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Retention and event settings for the operation registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Terminal operations older than this are dropped by cleanup.
    #[serde(default = "d_cleanup_after_ms")]
    pub cleanup_after_ms: u64,
    /// Run cleanup whenever a top-level operation starts.
    #[serde(default = "d_true")]
    pub auto_cleanup: bool,
    /// Capacity of the lifecycle event broadcast channel.
    #[serde(default = "d_event_buffer")]
    pub event_buffer: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cleanup_after_ms: d_cleanup_after_ms(),
            auto_cleanup: true,
            event_buffer: d_event_buffer(),
        }
    }
}

impl RegistryConfig {
    pub fn cleanup_after(&self) -> Duration {
        Duration::from_millis(self.cleanup_after_ms)
    }
}

fn d_cleanup_after_ms() -> u64 {
    30_000
}

fn d_true() -> bool {
    true
}

fn d_event_buffer() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = RegistryConfig::default();
        assert_eq!(cfg.cleanup_after(), Duration::from_secs(30));
        assert!(cfg.auto_cleanup);
        assert_eq!(cfg.event_buffer, 256);
    }

    #[test]
    fn deserialize_partial() {
        let cfg: RegistryConfig = toml::from_str("auto_cleanup = false").unwrap();
        assert!(!cfg.auto_cleanup);
        assert_eq!(cfg.cleanup_after_ms, 30_000);
    }
}
