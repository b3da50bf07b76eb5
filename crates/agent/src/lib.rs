//! Agent decision engine for Steward.
//!
//! [`Agent::runner`] maps `(runtime context, agent state)` to the next
//! [`AgentInstruction`]s. It performs no I/O; the runtime driver executes
//! the instructions and reports back with the next phase.

pub mod agent;
pub mod blacklist;
pub mod context;
pub mod general;
pub mod instruction;
pub mod intervention;
pub mod state;

pub use agent::Agent;
pub use blacklist::{SecurityBlacklist, SecurityRule};
pub use context::{AgentRuntimeContext, HumanAbortPayload, LlmResultPayload, Phase, ToolResultPayload};
pub use general::{GeneralAgentConfig, GeneralChatAgent};
pub use instruction::{
    AgentInstruction, CallLlmPayload, CallToolPayload, Decision, FinishReason, ToolsBatchPayload,
};
pub use intervention::{InterventionPolicy, Partition};
pub use state::{AgentState, AgentStatus, Interruption, Usage};
