use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use sw_domain::message::ChatMessage;
use sw_domain::tool::{ToolCallPayload, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the driver needs to invoke the model.
///
/// Fields the caller put on the triggering payload that Steward does not
/// model (RAG hints, search flags, …) are carried through in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLlmPayload {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CallLlmPayload {
    /// Build from a loosely-shaped phase payload. Known keys are typed,
    /// unknown keys land in `extra`; a payload whose known keys do not
    /// parse keeps everything as `extra`.
    pub fn from_phase_payload(payload: &Value) -> Self {
        let Some(map) = payload.as_object() else {
            return Self::default();
        };
        let mut map = map.clone();
        map.remove("messages");
        match serde_json::from_value::<Self>(Value::Object(map.clone())) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "call_llm payload has malformed fields, passing them through");
                Self {
                    extra: map,
                    ..Default::default()
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolPayload {
    pub parent_message_id: String,
    pub tool_calling: ToolCallPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsBatchPayload {
    pub parent_message_id: String,
    pub tools_calling: Vec<ToolCallPayload>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Instructions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Completed,
    ErrorRecovery,
    AgentDecision,
    UserRequested,
    MaxStepsExceeded,
}

impl FinishReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::ErrorRecovery => "error_recovery",
            Self::AgentDecision => "agent_decision",
            Self::UserRequested => "user_requested",
            Self::MaxStepsExceeded => "max_steps_exceeded",
        }
    }
}

/// One step the driver must carry out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentInstruction {
    CallLlm {
        payload: CallLlmPayload,
    },
    CallTool {
        payload: CallToolPayload,
    },
    CallToolsBatch {
        payload: ToolsBatchPayload,
    },
    RequestHumanApprove {
        #[serde(rename = "pendingToolsCalling")]
        pending_tools_calling: Vec<ToolCallPayload>,
        reason: String,
        /// Tool messages already exist (re-request after a partial result).
        #[serde(rename = "skipCreateToolMessage", default)]
        skip_create_tool_message: bool,
    },
    /// Close out tool calls left dangling by a user abort.
    ResolveAbortedTools {
        payload: ToolsBatchPayload,
    },
    Finish {
        reason: FinishReason,
        #[serde(rename = "reasonDetail")]
        reason_detail: String,
    },
}

impl AgentInstruction {
    pub fn finish(reason: FinishReason, detail: impl Into<String>) -> Self {
        Self::Finish {
            reason,
            reason_detail: detail.into(),
        }
    }

    /// Wire tag, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CallLlm { .. } => "call_llm",
            Self::CallTool { .. } => "call_tool",
            Self::CallToolsBatch { .. } => "call_tools_batch",
            Self::RequestHumanApprove { .. } => "request_human_approve",
            Self::ResolveAbortedTools { .. } => "resolve_aborted_tools",
            Self::Finish { .. } => "finish",
        }
    }
}

/// What one `runner` call produced: a single instruction or an ordered
/// list to execute in sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Decision {
    Single(AgentInstruction),
    Many(Vec<AgentInstruction>),
}

impl Decision {
    /// Collapse a list: one element becomes `Single`.
    pub fn from_vec(mut instructions: Vec<AgentInstruction>) -> Self {
        if instructions.len() == 1 {
            if let Some(only) = instructions.pop() {
                return Self::Single(only);
            }
        }
        Self::Many(instructions)
    }

    pub fn into_vec(self) -> Vec<AgentInstruction> {
        match self {
            Self::Single(one) => vec![one],
            Self::Many(many) => many,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Many(many) => many.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<AgentInstruction> for Decision {
    fn from(instruction: AgentInstruction) -> Self {
        Self::Single(instruction)
    }
}
