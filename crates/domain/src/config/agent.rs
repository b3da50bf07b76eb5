use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent decision settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How tool calls are gated behind human approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalMode {
    /// Follow each tool manifest's `humanIntervention` policy.
    #[default]
    Manual,
    /// Execute every call without asking.
    AutoRun,
    /// Execute calls listed in `allow_list`; everything else needs approval.
    AllowList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model passed along with follow-up `call_llm` instructions.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    /// Hard cap on decision steps per run.
    #[serde(default = "d_max_steps")]
    pub max_steps: u32,
    #[serde(default)]
    pub approval_mode: ApprovalMode,
    /// `identifier/apiName` keys allowed to run in allow-list mode.
    #[serde(default)]
    pub allow_list: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider: None,
            max_steps: d_max_steps(),
            approval_mode: ApprovalMode::Manual,
            allow_list: Vec::new(),
        }
    }
}

fn d_max_steps() -> u32 {
    20
}
