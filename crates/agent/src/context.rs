use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sw_domain::tool::ToolCallPayload;

/// Where the agent loop is when the decision engine is asked for the next
/// step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Phase {
    Init,
    UserInput,
    LlmResult,
    ToolResult,
    ToolsBatchResult,
    HumanAbort,
    Error,
    /// Kept verbatim so the finish diagnostic can name it.
    Unknown(String),
}

impl Phase {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "init" => Self::Init,
            "user_input" => Self::UserInput,
            "llm_result" => Self::LlmResult,
            "tool_result" => Self::ToolResult,
            "tools_batch_result" => Self::ToolsBatchResult,
            "human_abort" => Self::HumanAbort,
            "error" => Self::Error,
            other => Self::Unknown(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Init => "init",
            Self::UserInput => "user_input",
            Self::LlmResult => "llm_result",
            Self::ToolResult => "tool_result",
            Self::ToolsBatchResult => "tools_batch_result",
            Self::HumanAbort => "human_abort",
            Self::Error => "error",
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Phase {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<Phase> for String {
    fn from(phase: Phase) -> Self {
        phase.as_str().to_owned()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `(phase, payload)` handed to the agent on each step. The payload shape
/// depends on the phase and is read leniently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRuntimeContext {
    pub phase: Phase,
    #[serde(default)]
    pub payload: Value,
}

impl AgentRuntimeContext {
    pub fn new(phase: Phase, payload: Value) -> Self {
        Self { phase, payload }
    }

    pub fn init() -> Self {
        Self::new(Phase::Init, Value::Object(Default::default()))
    }

    pub fn user_input(payload: Value) -> Self {
        Self::new(Phase::UserInput, payload)
    }

    pub fn llm_result(result: &LlmResultPayload) -> Self {
        Self::new(Phase::LlmResult, to_value_or_null(result))
    }

    pub fn tool_result(parent_message_id: impl Into<String>) -> Self {
        Self::new(
            Phase::ToolResult,
            to_value_or_null(&ToolResultPayload {
                parent_message_id: parent_message_id.into(),
            }),
        )
    }

    pub fn tools_batch_result(parent_message_id: impl Into<String>) -> Self {
        Self::new(
            Phase::ToolsBatchResult,
            to_value_or_null(&ToolResultPayload {
                parent_message_id: parent_message_id.into(),
            }),
        )
    }

    pub fn human_abort(abort: &HumanAbortPayload) -> Self {
        Self::new(Phase::HumanAbort, to_value_or_null(abort))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            Phase::Error,
            serde_json::json!({ "error": { "message": message.into() } }),
        )
    }

    /// Read the payload as `T`, falling back to `T::default()` when it does
    /// not have the expected shape.
    pub fn payload_as<T: DeserializeOwned + Default>(&self) -> T {
        if self.payload.is_null() {
            return T::default();
        }
        match serde_json::from_value(self.payload.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(phase = %self.phase, error = %e, "malformed phase payload");
                T::default()
            }
        }
    }

    /// `error.message` of an `error` phase payload, if present and non-empty.
    pub fn error_message(&self) -> Option<&str> {
        self.payload
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
    }
}

fn to_value_or_null<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phase payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmResultPayload {
    pub has_tools_calling: bool,
    pub tools_calling: Vec<ToolCallPayload>,
    pub parent_message_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolResultPayload {
    pub parent_message_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HumanAbortPayload {
    pub has_tools_calling: bool,
    pub tools_calling: Vec<ToolCallPayload>,
    pub parent_message_id: String,
    pub reason: String,
}
