//! Async driver for Steward agents.
//!
//! [`AgentRuntime`] feeds runtime contexts to an [`sw_agent::Agent`],
//! executes the instructions it returns through a [`ModelRuntime`] and a
//! [`ToolExecutor`], and records each piece of work in the operation
//! registry so it can be observed and cancelled.

pub mod executor;
pub mod runtime;
pub mod scripted;
pub mod simulate;

pub use executor::{LlmOutcome, ModelRuntime, TokenCounts, ToolExecutor, ToolOutcome};
pub use runtime::{AgentRuntime, RunResult, StepOutcome};
pub use scripted::{Script, ScriptedModel, ScriptedToolResponse, ScriptedTools, ScriptedTurn};
pub use simulate::{simulate, Simulation};
