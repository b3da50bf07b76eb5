//! Deterministic model and tool executors driven by a script.
//!
//! Used by the `steward simulate` command and by tests. A [`Script`] is a
//! JSON document describing a conversation: the user message, the model's
//! turns in order, canned tool responses and which gated calls to approve.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use sw_agent::CallLlmPayload;
use sw_domain::tool::{ToolCallPayload, ToolManifest};
use sw_domain::{Error, Result};
use sw_operations::CancelToken;

use crate::executor::{LlmOutcome, ModelRuntime, TokenCounts, ToolExecutor, ToolOutcome};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Script format
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptedTurn {
    pub content: String,
    pub tools_calling: Vec<ToolCallPayload>,
    pub delay_ms: u64,
    /// When set the turn fails with a model error carrying this message.
    pub error: Option<String>,
    pub usage: Option<TokenCounts>,
}

impl ScriptedTurn {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn tools(tools_calling: Vec<ToolCallPayload>) -> Self {
        Self {
            tools_calling,
            ..Default::default()
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn delayed(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptedToolResponse {
    pub content: String,
    pub delay_ms: u64,
    pub error: Option<String>,
}

impl ScriptedToolResponse {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn delayed(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Script {
    pub session_id: String,
    pub topic_id: Option<String>,
    pub user_message: String,
    pub turns: Vec<ScriptedTurn>,
    /// Keyed by `identifier/apiName`.
    pub tools: HashMap<String, ScriptedToolResponse>,
    pub manifests: Vec<ToolManifest>,
    /// Tool call ids to approve when the run pauses. Anything else pending
    /// is rejected.
    pub approve: Vec<String>,
}

impl Script {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sleep for `ms`, giving up early with `Error::Cancelled` if the token fires.
async fn pause(ms: u64, cancel: &CancelToken) -> Result<()> {
    if ms == 0 {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled(cancel.reason().unwrap_or_default())),
        _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
    }
}

/// Replays model turns in order. Runs out with a model error.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    calls: Mutex<Vec<CallLlmPayload>>,
}

impl ScriptedModel {
    pub fn new(turns: impl IntoIterator<Item = ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Payloads received so far.
    pub fn calls(&self) -> Vec<CallLlmPayload> {
        self.calls.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.turns.lock().len()
    }
}

#[async_trait::async_trait]
impl ModelRuntime for ScriptedModel {
    async fn call(&self, payload: CallLlmPayload, cancel: CancelToken) -> Result<LlmOutcome> {
        self.calls.lock().push(payload);
        let turn = self.turns.lock().pop_front().ok_or_else(|| Error::Model {
            provider: "scripted".into(),
            message: "script has no more turns".into(),
        })?;

        pause(turn.delay_ms, &cancel).await?;
        if let Some(message) = turn.error {
            return Err(Error::Model {
                provider: "scripted".into(),
                message,
            });
        }
        Ok(LlmOutcome {
            content: turn.content,
            tools_calling: turn.tools_calling,
            usage: turn.usage,
        })
    }
}

/// Answers tool calls from a fixed table.
#[derive(Debug, Default)]
pub struct ScriptedTools {
    responses: HashMap<String, ScriptedToolResponse>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedTools {
    pub fn new(responses: HashMap<String, ScriptedToolResponse>) -> Self {
        Self {
            responses,
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, tool_key: impl Into<String>, response: ScriptedToolResponse) -> Self {
        self.responses.insert(tool_key.into(), response);
        self
    }

    /// Ids of calls that ran to completion, in completion order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait::async_trait]
impl ToolExecutor for ScriptedTools {
    async fn execute(&self, call: ToolCallPayload, cancel: CancelToken) -> Result<ToolOutcome> {
        let key = call.tool_key();
        let response = self.responses.get(&key).cloned().ok_or_else(|| Error::Tool {
            tool: key.clone(),
            message: "no scripted response".into(),
        })?;

        pause(response.delay_ms, &cancel).await?;
        if let Some(message) = response.error {
            return Err(Error::Tool { tool: key, message });
        }
        self.executed.lock().push(call.id);
        Ok(ToolOutcome::ok(response.content))
    }
}
