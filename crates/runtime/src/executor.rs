use serde::{Deserialize, Serialize};

use sw_agent::CallLlmPayload;
use sw_domain::tool::ToolCallPayload;
use sw_domain::Result;
use sw_operations::CancelToken;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
}

/// One completed model turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmOutcome {
    pub content: String,
    pub tools_calling: Vec<ToolCallPayload>,
    pub usage: Option<TokenCounts>,
}

impl LlmOutcome {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolCallPayload>) -> Self {
        self.tools_calling = tools;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolOutcome {
    pub content: String,
    /// The tool ran but reported a failure the model should see.
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Invokes a model for a `call_llm` instruction.
///
/// The token belongs to the `callLlm` operation. Implementations should
/// stop early once it is cancelled; the driver also races the returned
/// future against it.
#[async_trait::async_trait]
pub trait ModelRuntime: Send + Sync {
    async fn call(&self, payload: CallLlmPayload, cancel: CancelToken) -> Result<LlmOutcome>;
}

/// Executes one tool call.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: ToolCallPayload, cancel: CancelToken) -> Result<ToolOutcome>;
}
