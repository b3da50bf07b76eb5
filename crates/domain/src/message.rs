use serde::{Deserialize, Serialize};

use crate::tool::ToolCallPayload;

/// A message in the conversation history.
///
/// Tool/plugin result messages carry the originating call in `plugin` and,
/// when the call was gated behind approval, its `plugin_intervention`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<ToolCallPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_intervention: Option<PluginIntervention>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolCallPayload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionStatus {
    Pending,
    Approved,
    Rejected,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginIntervention {
    pub status: InterventionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_reason: Option<String>,
}

// ── Convenience constructors ───────────────────────────────────────

impl ChatMessage {
    fn base(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            parent_id: None,
            tool_call_id: None,
            plugin: None,
            plugin_intervention: None,
            tools: Vec::new(),
        }
    }

    pub fn system(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::base(id, Role::System, text)
    }
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::base(id, Role::User, text)
    }
    pub fn assistant(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::base(id, Role::Assistant, text)
    }

    /// A tool result message for `call`.
    pub fn tool_result(
        id: impl Into<String>,
        call: ToolCallPayload,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::base(id, Role::Tool, content);
        msg.tool_call_id = Some(call.id.clone());
        msg.plugin = Some(call);
        msg
    }

    /// A placeholder tool message waiting for human approval.
    pub fn pending_tool(id: impl Into<String>, call: ToolCallPayload) -> Self {
        let mut msg = Self::tool_result(id, call, "");
        msg.plugin_intervention = Some(PluginIntervention {
            status: InterventionStatus::Pending,
            rejected_reason: None,
        });
        msg
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// True for tool messages still waiting on an approval decision.
    pub fn is_pending_approval(&self) -> bool {
        self.role == Role::Tool
            && self
                .plugin_intervention
                .as_ref()
                .is_some_and(|i| i.status == InterventionStatus::Pending)
    }

    pub fn set_intervention(&mut self, status: InterventionStatus) {
        match self.plugin_intervention.as_mut() {
            Some(i) => i.status = status,
            None => {
                self.plugin_intervention = Some(PluginIntervention {
                    status,
                    rejected_reason: None,
                })
            }
        }
    }
}
