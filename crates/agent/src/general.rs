//! The general chat agent.
//!
//! ```text
//! init / user_input  → call_llm
//! llm_result         → finish                          (no tool calls)
//!                    → call_tool | call_tools_batch     (approval-free calls)
//!                      then request_human_approve       (gated calls)
//! tool_result(s)     → request_human_approve            (tools still pending)
//!                    → call_llm                         (feed results back)
//! human_abort        → resolve_aborted_tools | finish
//! error              → finish(error_recovery)
//! ```
//!
//! An interrupted state skips phase dispatch and goes straight to abort
//! handling.

use sw_domain::config::AgentConfig;
use sw_domain::tool::ToolCallPayload;

use crate::agent::Agent;
use crate::context::{AgentRuntimeContext, HumanAbortPayload, LlmResultPayload, Phase, ToolResultPayload};
use crate::instruction::{
    AgentInstruction, CallLlmPayload, CallToolPayload, Decision, FinishReason, ToolsBatchPayload,
};
use crate::intervention::InterventionPolicy;
use crate::state::{AgentState, AgentStatus};

pub const NO_TOOL_CALLS: &str = "LLM response completed without tool calls";
pub const APPROVAL_REQUIRED: &str = "human_intervention_required";
pub const STILL_PENDING: &str = "Some tools still pending approval";
pub const CANCELLED_BY_USER: &str = "Operation cancelled by user";
pub const UNKNOWN_ERROR: &str = "Unknown error occurred";

#[derive(Debug, Clone, Default)]
pub struct GeneralAgentConfig {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub intervention: InterventionPolicy,
}

impl From<&AgentConfig> for GeneralAgentConfig {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            model: cfg.model.clone(),
            provider: cfg.provider.clone(),
            intervention: InterventionPolicy::from(cfg),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GeneralChatAgent {
    config: GeneralAgentConfig,
}

impl GeneralChatAgent {
    pub fn new(config: GeneralAgentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeneralAgentConfig {
        &self.config
    }

    fn call_llm_from_input(&self, ctx: &AgentRuntimeContext, state: &AgentState) -> AgentInstruction {
        let mut payload = CallLlmPayload::from_phase_payload(&ctx.payload);
        payload.messages = state.messages.clone();
        if payload.model.is_none() {
            payload.model = self.config.model.clone();
        }
        if payload.provider.is_none() {
            payload.provider = self.config.provider.clone();
        }
        AgentInstruction::CallLlm { payload }
    }

    fn on_llm_result(&self, ctx: &AgentRuntimeContext, state: &AgentState) -> Decision {
        let result: LlmResultPayload = ctx.payload_as();
        if !result.has_tools_calling || result.tools_calling.is_empty() {
            return AgentInstruction::finish(FinishReason::Completed, NO_TOOL_CALLS).into();
        }

        let split = match &state.security_blacklist {
            Some(custom) => self
                .config
                .intervention
                .clone()
                .with_blacklist(custom.clone())
                .partition(&result.tools_calling, &state.tool_manifest_map),
            None => self
                .config
                .intervention
                .partition(&result.tools_calling, &state.tool_manifest_map),
        };
        tracing::debug!(
            to_execute = split.to_execute.len(),
            needs_approval = split.needs_approval.len(),
            "partitioned tool calls"
        );

        let mut instructions = Vec::with_capacity(2);
        let parent_message_id = result.parent_message_id;
        match split.to_execute.len() {
            0 => {}
            1 => {
                let mut calls = split.to_execute;
                if let Some(tool_calling) = calls.pop() {
                    instructions.push(AgentInstruction::CallTool {
                        payload: CallToolPayload {
                            parent_message_id: parent_message_id.clone(),
                            tool_calling,
                        },
                    });
                }
            }
            _ => instructions.push(AgentInstruction::CallToolsBatch {
                payload: ToolsBatchPayload {
                    parent_message_id: parent_message_id.clone(),
                    tools_calling: split.to_execute,
                },
            }),
        }
        if !split.needs_approval.is_empty() {
            instructions.push(AgentInstruction::RequestHumanApprove {
                pending_tools_calling: split.needs_approval,
                reason: APPROVAL_REQUIRED.into(),
                skip_create_tool_message: false,
            });
        }
        Decision::from_vec(instructions)
    }

    fn on_tool_result(&self, ctx: &AgentRuntimeContext, state: &AgentState) -> AgentInstruction {
        let pending = state.pending_tool_calls();
        if !pending.is_empty() {
            return AgentInstruction::RequestHumanApprove {
                pending_tools_calling: pending,
                reason: STILL_PENDING.into(),
                skip_create_tool_message: true,
            };
        }

        let result: ToolResultPayload = ctx.payload_as();
        AgentInstruction::CallLlm {
            payload: CallLlmPayload {
                messages: state.messages.clone(),
                model: self.config.model.clone(),
                provider: self.config.provider.clone(),
                tools: state.tools.clone(),
                parent_message_id: Some(result.parent_message_id),
                extra: Default::default(),
            },
        }
    }

    fn on_human_abort(&self, ctx: &AgentRuntimeContext) -> AgentInstruction {
        let abort: HumanAbortPayload = ctx.payload_as();
        if abort.has_tools_calling && !abort.tools_calling.is_empty() {
            return resolve_aborted(abort.parent_message_id, abort.tools_calling);
        }
        let detail = if abort.reason.is_empty() {
            CANCELLED_BY_USER.to_owned()
        } else {
            abort.reason
        };
        AgentInstruction::finish(FinishReason::UserRequested, detail)
    }

    /// Abort handling for an interrupted run: whatever tool calls the
    /// current phase knows about get resolved, otherwise the run finishes.
    fn handle_abort(&self, ctx: &AgentRuntimeContext, state: &AgentState) -> AgentInstruction {
        let (has_tools, parent_message_id, tools) = match &ctx.phase {
            Phase::LlmResult => {
                let p: LlmResultPayload = ctx.payload_as();
                (p.has_tools_calling, p.parent_message_id, p.tools_calling)
            }
            Phase::HumanAbort => {
                let p: HumanAbortPayload = ctx.payload_as();
                (p.has_tools_calling, p.parent_message_id, p.tools_calling)
            }
            Phase::ToolResult | Phase::ToolsBatchResult => {
                let p: ToolResultPayload = ctx.payload_as();
                let pending = state.pending_tool_calls();
                (!pending.is_empty(), p.parent_message_id, pending)
            }
            _ => (false, String::new(), Vec::new()),
        };

        if has_tools && !tools.is_empty() {
            resolve_aborted(parent_message_id, tools)
        } else {
            AgentInstruction::finish(FinishReason::UserRequested, CANCELLED_BY_USER)
        }
    }
}

fn resolve_aborted(parent_message_id: String, tools_calling: Vec<ToolCallPayload>) -> AgentInstruction {
    AgentInstruction::ResolveAbortedTools {
        payload: ToolsBatchPayload {
            parent_message_id,
            tools_calling,
        },
    }
}

impl Agent for GeneralChatAgent {
    fn runner(&self, ctx: &AgentRuntimeContext, state: &AgentState) -> Decision {
        if state.status == AgentStatus::Interrupted {
            tracing::debug!(phase = %ctx.phase, session_id = %state.session_id, "state interrupted, handling abort");
            return self.handle_abort(ctx, state).into();
        }

        let decision: Decision = match &ctx.phase {
            Phase::Init | Phase::UserInput => self.call_llm_from_input(ctx, state).into(),
            Phase::LlmResult => self.on_llm_result(ctx, state),
            Phase::ToolResult | Phase::ToolsBatchResult => self.on_tool_result(ctx, state).into(),
            Phase::HumanAbort => self.on_human_abort(ctx).into(),
            Phase::Error => AgentInstruction::finish(
                FinishReason::ErrorRecovery,
                ctx.error_message().unwrap_or(UNKNOWN_ERROR),
            )
            .into(),
            Phase::Unknown(raw) => {
                AgentInstruction::finish(FinishReason::AgentDecision, format!("Unknown phase: {raw}"))
                    .into()
            }
        };

        tracing::debug!(
            phase = %ctx.phase,
            session_id = %state.session_id,
            instructions = decision.len(),
            "agent decided"
        );
        decision
    }
}
