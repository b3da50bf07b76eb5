use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use sw_domain::context::{context_key, normalize_topic};

use crate::cancel::CancelToken;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Unique operation id (`op_<uuid>`), never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub(crate) fn generate() -> Self {
        Self(format!("op_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for OperationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Type & status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    SendMessage,
    CreateAssistantMessage,
    ExecAgentRuntime,
    CallLlm,
    Reasoning,
    ToolCalling,
    ExecuteToolCall,
    PluginApi,
    Rag,
    HumanInteraction,
    Compression,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SendMessage => "sendMessage",
            Self::CreateAssistantMessage => "createAssistantMessage",
            Self::ExecAgentRuntime => "execAgentRuntime",
            Self::CallLlm => "callLlm",
            Self::Reasoning => "reasoning",
            Self::ToolCalling => "toolCalling",
            Self::ExecuteToolCall => "executeToolCall",
            Self::PluginApi => "pluginApi",
            Self::Rag => "rag",
            Self::HumanInteraction => "humanInteraction",
            Self::Compression => "compression",
        }
    }

    /// Operations that create a message the UI is still waiting on.
    pub fn is_message_creation(self) -> bool {
        matches!(self, Self::SendMessage | Self::CreateAssistantMessage)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The isolation scope of an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationContext {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl OperationContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn topic(mut self, topic_id: impl Into<String>) -> Self {
        self.topic_id = Some(topic_id.into());
        self
    }

    pub fn message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Canonical key for the context index.
    pub fn key(&self) -> String {
        context_key(&self.session_id, self.topic_id.as_deref())
    }

    /// Topic id with blank values treated as absent.
    pub fn normalized_topic(&self) -> Option<&str> {
        normalize_topic(self.topic_id.as_deref())
    }
}

impl From<&sw_domain::ConversationContext> for OperationContext {
    fn from(c: &sw_domain::ConversationContext) -> Self {
        Self {
            session_id: c.session_id.clone(),
            topic_id: c.topic_id.clone(),
            ..Default::default()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Metadata
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structured failure record stored on a failed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl OperationError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            code: None,
            details: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<&sw_domain::Error> for OperationError {
    fn from(err: &sw_domain::Error) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u64,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetadata {
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    /// Set the moment an `execAgentRuntime` operation is asked to stop, so
    /// the UI can react before the work actually unwinds.
    #[serde(default)]
    pub is_aborting: bool,
    /// Caller-specific fields (`inputSendErrorMsg`, editor snapshots, …).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OperationMetadata {
    pub(crate) fn started_now() -> Self {
        Self {
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            cancel_reason: None,
            error: None,
            progress: None,
            is_aborting: false,
            extra: Map::new(),
        }
    }

    /// Stamp `end_time` and `duration_ms`.
    pub(crate) fn finish(&mut self) {
        let now = Utc::now();
        self.end_time = Some(now);
        self.duration_ms = Some((now - self.start_time).num_milliseconds().max(0) as u64);
    }

    pub(crate) fn apply(&mut self, patch: MetadataPatch) {
        if let Some(aborting) = patch.is_aborting {
            self.is_aborting = aborting;
        }
        for (key, value) in patch.extra {
            if value.is_null() {
                self.extra.remove(&key);
            } else {
                self.extra.insert(key, value);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

/// A partial metadata update. `Value::Null` removes an `extra` key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataPatch {
    pub is_aborting: Option<bool>,
    pub extra: Map<String, Value>,
}

impl MetadataPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.extra.insert(key.into(), Value::Null);
        self
    }

    pub fn aborting(mut self, aborting: bool) -> Self {
        self.is_aborting = Some(aborting);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Operation record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: OperationId,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub status: OperationStatus,
    pub context: OperationContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<OperationId>,
    pub child_ids: Vec<OperationId>,
    #[serde(skip)]
    pub cancel_token: CancelToken,
    pub metadata: OperationMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Operation {
    pub fn is_running(&self) -> bool {
        self.status == OperationStatus::Running
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Passed to cancel handlers registered with
/// [`OperationRegistry::on_operation_cancel`](crate::OperationRegistry::on_operation_cancel).
#[derive(Debug, Clone)]
pub struct CancelContext {
    pub operation_id: OperationId,
    pub op_type: OperationType,
    pub reason: String,
    pub metadata: OperationMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let a = OperationId::generate();
        let b = OperationId::generate();
        assert!(a.as_str().starts_with("op_"));
        assert_ne!(a, b);
    }

    #[test]
    fn only_running_is_non_terminal() {
        assert!(!OperationStatus::Running.is_terminal());
        assert!(OperationStatus::Completed.is_terminal());
        assert!(OperationStatus::Cancelled.is_terminal());
        assert!(OperationStatus::Failed.is_terminal());
    }

    #[test]
    fn operation_type_wire_names() {
        assert_eq!(
            serde_json::to_value(OperationType::ExecAgentRuntime).unwrap(),
            json!("execAgentRuntime")
        );
        assert_eq!(OperationType::ToolCalling.to_string(), "toolCalling");
    }

    #[test]
    fn patch_merges_and_removes_extra_keys() {
        let mut meta = OperationMetadata::started_now();
        meta.apply(MetadataPatch::new().set("inputSendErrorMsg", json!("quota exceeded")));
        assert_eq!(meta.get("inputSendErrorMsg"), Some(&json!("quota exceeded")));

        meta.apply(MetadataPatch::new().remove("inputSendErrorMsg").aborting(true));
        assert!(meta.get("inputSendErrorMsg").is_none());
        assert!(meta.is_aborting);
    }

    #[test]
    fn finish_stamps_non_negative_duration() {
        let mut meta = OperationMetadata::started_now();
        meta.finish();
        assert!(meta.end_time.is_some());
        assert!(meta.duration_ms.is_some());
    }

    #[test]
    fn error_serializes_type_field() {
        let err = OperationError::new("network", "reset by peer").with_code("ECONNRESET");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "network");
        assert_eq!(value["code"], "ECONNRESET");
    }
}
