use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sw_domain::message::ChatMessage;
use sw_domain::tool::{ToolCallPayload, ToolDefinition, ToolManifest};

use crate::blacklist::SecurityBlacklist;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Running,
    WaitingForHumanInput,
    Interrupted,
    Done,
    Error,
}

impl AgentStatus {
    /// The loop cannot make progress on its own from this status.
    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            Self::WaitingForHumanInput | Self::Interrupted | Self::Done | Self::Error
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Usage counters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmUsage {
    pub api_calls: u64,
    pub tokens: TokenUsage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUsage {
    pub total_calls: u64,
    /// Calls per `identifier/apiName`.
    pub by_tool: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanUsage {
    pub approval_requests: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub llm: LlmUsage,
    pub tools: ToolUsage,
    pub human: HumanUsage,
}

impl Usage {
    pub fn record_llm_call(&mut self, input_tokens: u64, output_tokens: u64) {
        self.llm.api_calls += 1;
        self.llm.tokens.input += input_tokens;
        self.llm.tokens.output += output_tokens;
        self.llm.tokens.total += input_tokens + output_tokens;
    }

    pub fn record_tool_call(&mut self, call: &ToolCallPayload) {
        self.tools.total_calls += 1;
        *self.tools.by_tool.entry(call.tool_key()).or_default() += 1;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interruption {
    pub reason: String,
    pub interrupted_at: DateTime<Utc>,
    #[serde(default)]
    pub can_resume: bool,
}

/// Everything the decision engine may read about a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub session_id: String,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Manifests keyed by tool identifier.
    #[serde(default)]
    pub tool_manifest_map: HashMap<String, ToolManifest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default)]
    pub step_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub pending_tools_calling: Vec<ToolCallPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interruption: Option<Interruption>,
    /// Replaces the agent's configured blacklist for this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_blacklist: Option<SecurityBlacklist>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl AgentState {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            status: AgentStatus::Idle,
            messages: Vec::new(),
            tool_manifest_map: HashMap::new(),
            tools: None,
            step_count: 0,
            max_steps: None,
            usage: Usage::default(),
            pending_tools_calling: Vec::new(),
            interruption: None,
            security_blacklist: None,
            created_at: now,
            last_modified: now,
        }
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_manifest(mut self, manifest: ToolManifest) -> Self {
        self.tool_manifest_map
            .insert(manifest.identifier.clone(), manifest);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_security_blacklist(mut self, blacklist: SecurityBlacklist) -> Self {
        self.security_blacklist = Some(blacklist);
        self
    }

    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.touch();
    }

    /// Tool messages still waiting for an approval decision.
    pub fn pending_tool_messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(|m| m.is_pending_approval())
    }

    /// Calls behind the pending tool messages.
    pub fn pending_tool_calls(&self) -> Vec<ToolCallPayload> {
        self.pending_tool_messages()
            .filter_map(|m| m.plugin.clone())
            .collect()
    }

    pub fn interrupt(&mut self, reason: impl Into<String>, can_resume: bool) {
        self.status = AgentStatus::Interrupted;
        self.interruption = Some(Interruption {
            reason: reason.into(),
            interrupted_at: Utc::now(),
            can_resume,
        });
        self.touch();
    }
}
