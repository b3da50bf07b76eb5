mod agent;
mod observability;
mod registry;
mod runtime;

pub use agent::*;
pub use observability::*;
pub use registry::*;
pub use runtime::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Parse a TOML document. Missing sections fall back to defaults.
    pub fn from_toml_str(raw: &str) -> crate::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load from `path`, or return defaults when the file does not exist.
    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
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

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.agent.max_steps == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "agent.max_steps".into(),
                message: "max_steps must be greater than 0".into(),
            });
        }

        if self.agent.approval_mode == ApprovalMode::AllowList && self.agent.allow_list.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "agent.allow_list".into(),
                message: "allow-list mode with an empty allow_list gates every tool call".into(),
            });
        }

        for (i, key) in self.agent.allow_list.iter().enumerate() {
            if !key.contains('/') {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("agent.allow_list[{i}]"),
                    message: format!("\"{key}\" is not an identifier/apiName pair"),
                });
            }
        }

        if self.agent.approval_mode == ApprovalMode::AutoRun {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "agent.approval_mode".into(),
                message: "auto-run executes every tool call without approval".into(),
            });
        }

        if self.registry.event_buffer == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "registry.event_buffer".into(),
                message: "event_buffer must be greater than 0".into(),
            });
        }

        if self.runtime.tool_timeout_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "runtime.tool_timeout_ms".into(),
                message: "tool_timeout_ms must be greater than 0".into(),
            });
        }

        if self.runtime.max_parallel_tools == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "runtime.max_parallel_tools".into(),
                message: "max_parallel_tools must be greater than 0".into(),
            });
        }

        errors
    }
}
