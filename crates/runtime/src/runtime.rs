//! The agent step loop.
//!
//! Each run is an `execAgentRuntime` operation. Every instruction that does
//! I/O gets its own child operation (`callLlm`, `toolCalling` →
//! `executeToolCall`), so cancelling the run cascades to whatever is in
//! flight. The decision engine stays pure; this module is the only place
//! that awaits.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use sw_agent::general::CANCELLED_BY_USER;
use sw_agent::{
    Agent, AgentInstruction, AgentRuntimeContext, AgentState, AgentStatus, CallLlmPayload,
    FinishReason, HumanAbortPayload, LlmResultPayload,
};
use sw_domain::config::RuntimeConfig;
use sw_domain::message::{ChatMessage, InterventionStatus, Role};
use sw_domain::tool::ToolCallPayload;
use sw_domain::{ConversationContext, Error, Result};
use sw_operations::{
    CancelToken, MetadataPatch, OperationContext, OperationError, OperationFilter, OperationId,
    OperationRegistry, OperationType, StartOperation, StartedOperation,
};

use crate::executor::{ModelRuntime, ToolExecutor, ToolOutcome};

const DEFAULT_MAX_STEPS: u32 = 20;
const ABORTED_TOOL_CONTENT: &str = "Tool call was cancelled";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How one run segment ended.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub operation_id: OperationId,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_detail: Option<String>,
    pub steps: u32,
}

impl RunResult {
    pub fn is_waiting(&self) -> bool {
        self.status == AgentStatus::WaitingForHumanInput
    }
}

#[derive(Debug)]
pub enum StepOutcome {
    /// Feed this context into the next step.
    Continue(AgentRuntimeContext),
    Finished { reason: FinishReason, detail: String },
    /// Blocked on a human decision.
    Paused,
}

enum ToolRunStatus {
    Done(ToolOutcome),
    Failed(Error),
    Aborted,
}

struct ToolRun {
    call: ToolCallPayload,
    status: ToolRunStatus,
}

enum Exec {
    Next(AgentRuntimeContext),
    Aborted {
        parent_message_id: String,
        tools: Vec<ToolCallPayload>,
    },
}

fn new_message_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AgentRuntime {
    agent: Arc<dyn Agent>,
    registry: Arc<OperationRegistry>,
    model: Arc<dyn ModelRuntime>,
    tools: Arc<dyn ToolExecutor>,
    config: RuntimeConfig,
    default_max_steps: u32,
}

impl AgentRuntime {
    pub fn new(
        agent: Arc<dyn Agent>,
        registry: Arc<OperationRegistry>,
        model: Arc<dyn ModelRuntime>,
        tools: Arc<dyn ToolExecutor>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            agent,
            registry,
            model,
            tools,
            config,
            default_max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Step cap used when the state does not carry its own.
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.default_max_steps = max_steps;
        self
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    // ── Entry points ────────────────────────────────────────────────

    /// Run the loop from `initial` until it finishes, pauses for approval,
    /// or is interrupted.
    pub async fn run(
        &self,
        session: &ConversationContext,
        state: &mut AgentState,
        initial: AgentRuntimeContext,
    ) -> RunResult {
        let started = self.begin(session, state);
        let outcome = self
            .drive(&started.operation_id, &started.cancel_token, state, initial)
            .await;
        self.finish_run(started.operation_id, state, outcome)
    }

    /// Approve a pending tool call, execute it, and continue the run.
    pub async fn approve_tool_call(
        &self,
        session: &ConversationContext,
        state: &mut AgentState,
        tool_call_id: &str,
    ) -> Result<RunResult> {
        let (call, parent_message_id) =
            take_pending(state, tool_call_id, InterventionStatus::Approved)?;
        tracing::info!(tool_call_id, tool = %call.tool_key(), "tool call approved");

        let started = self.begin(session, state);
        let root = started.operation_id.clone();
        let ctx = match self
            .call_tools(&root, state, parent_message_id, vec![call], false)
            .await
        {
            Exec::Next(ctx) => ctx,
            Exec::Aborted {
                parent_message_id,
                tools,
            } => self.abort_context(&started.cancel_token, state, parent_message_id, tools),
        };
        let outcome = self.drive(&root, &started.cancel_token, state, ctx).await;
        Ok(self.finish_run(root, state, outcome))
    }

    /// Reject a pending tool call and let the agent continue without it.
    pub async fn reject_tool_call(
        &self,
        session: &ConversationContext,
        state: &mut AgentState,
        tool_call_id: &str,
        reason: Option<&str>,
    ) -> Result<RunResult> {
        let (_, parent_message_id) =
            take_pending(state, tool_call_id, InterventionStatus::Rejected)?;
        if let Some(msg) = tool_message_mut(state, tool_call_id) {
            msg.content = match reason {
                Some(r) => format!("Tool call rejected by user: {r}"),
                None => "Tool call rejected by user".to_owned(),
            };
            if let Some(intervention) = msg.plugin_intervention.as_mut() {
                intervention.rejected_reason = reason.map(str::to_owned);
            }
        }
        tracing::info!(tool_call_id, reason = ?reason, "tool call rejected");

        let started = self.begin(session, state);
        let ctx = AgentRuntimeContext::tool_result(parent_message_id);
        let outcome = self
            .drive(&started.operation_id, &started.cancel_token, state, ctx)
            .await;
        Ok(self.finish_run(started.operation_id, state, outcome))
    }

    /// Cancel a run's root operation and everything below it. The loop
    /// notices at its next suspension point.
    pub fn interrupt(&self, run: &OperationId, reason: &str) -> Vec<OperationId> {
        tracing::info!(operation_id = %run, reason, "interrupting agent run");
        self.registry.cancel_operation(run, reason)
    }

    /// Cancel every running operation in one conversation context.
    pub fn interrupt_context(&self, session: &ConversationContext, reason: &str) -> Vec<OperationId> {
        let filter = match session.topic_id.as_deref() {
            Some(topic) => OperationFilter::session(session.session_id.clone()).topic(topic),
            None => OperationFilter::session(session.session_id.clone()).without_topic(),
        };
        self.registry.cancel_operations(&filter, reason)
    }

    // ── Loop ────────────────────────────────────────────────────────

    fn begin(&self, session: &ConversationContext, state: &mut AgentState) -> StartedOperation {
        let started = self.registry.start_operation(
            StartOperation::new(OperationType::ExecAgentRuntime)
                .context(OperationContext::from(session))
                .label("Agent running"),
        );
        state.status = AgentStatus::Running;
        state.interruption = None;
        state.touch();
        tracing::info!(
            operation_id = %started.operation_id,
            session_id = %session.session_id,
            topic_id = ?session.topic_id,
            "agent run started"
        );
        started
    }

    async fn drive(
        &self,
        root: &OperationId,
        token: &CancelToken,
        state: &mut AgentState,
        initial: AgentRuntimeContext,
    ) -> Option<(FinishReason, String)> {
        let mut ctx = initial;
        loop {
            if token.is_cancelled() && state.status != AgentStatus::Interrupted {
                ctx = self.abort_context(token, state, String::new(), Vec::new());
            }
            match self.step(root, token, state, ctx).await {
                StepOutcome::Continue(next) => ctx = next,
                StepOutcome::Finished { reason, detail } => return Some((reason, detail)),
                StepOutcome::Paused => return None,
            }
        }
    }

    /// One decision plus the execution of every instruction it produced.
    pub async fn step(
        &self,
        root: &OperationId,
        token: &CancelToken,
        state: &mut AgentState,
        ctx: AgentRuntimeContext,
    ) -> StepOutcome {
        state.step_count += 1;
        state.touch();
        let max_steps = state.max_steps.unwrap_or(self.default_max_steps);
        if state.step_count > max_steps {
            tracing::warn!(operation_id = %root, max_steps, "agent exceeded step limit");
            return apply_finish(
                state,
                FinishReason::MaxStepsExceeded,
                format!("Maximum steps exceeded: {max_steps}"),
            );
        }

        let decision = self.agent.runner(&ctx, state);
        let mut next = None;

        let mut instructions = decision.into_vec().into_iter();
        while let Some(instruction) = instructions.next() {
            tracing::debug!(
                operation_id = %root,
                step = state.step_count,
                instruction = instruction.kind(),
                "executing instruction"
            );
            let exec = match instruction {
                AgentInstruction::CallLlm { payload } => {
                    if token.is_cancelled() {
                        let parent = payload.parent_message_id.unwrap_or_default();
                        let gated = gated_calls(instructions.as_slice());
                        return StepOutcome::Continue(self.abort_context(token, state, parent, gated));
                    }
                    self.call_llm(root, state, payload).await
                }
                AgentInstruction::CallTool { payload } => {
                    if token.is_cancelled() {
                        let mut tools = vec![payload.tool_calling];
                        tools.extend(gated_calls(instructions.as_slice()));
                        return StepOutcome::Continue(self.abort_context(
                            token,
                            state,
                            payload.parent_message_id,
                            tools,
                        ));
                    }
                    self.call_tools(root, state, payload.parent_message_id, vec![payload.tool_calling], false)
                        .await
                }
                AgentInstruction::CallToolsBatch { payload } => {
                    if token.is_cancelled() {
                        let mut tools = payload.tools_calling;
                        tools.extend(gated_calls(instructions.as_slice()));
                        return StepOutcome::Continue(self.abort_context(
                            token,
                            state,
                            payload.parent_message_id,
                            tools,
                        ));
                    }
                    self.call_tools(root, state, payload.parent_message_id, payload.tools_calling, true)
                        .await
                }
                AgentInstruction::RequestHumanApprove {
                    pending_tools_calling,
                    reason,
                    skip_create_tool_message,
                } => {
                    request_approval(state, pending_tools_calling, &reason, skip_create_tool_message);
                    continue;
                }
                AgentInstruction::ResolveAbortedTools { payload } => {
                    resolve_aborted(state, &payload.tools_calling);
                    return apply_finish(state, FinishReason::UserRequested, CANCELLED_BY_USER.to_owned());
                }
                AgentInstruction::Finish {
                    reason,
                    reason_detail,
                } => return apply_finish(state, reason, reason_detail),
            };

            match exec {
                Exec::Next(ctx) => next = Some(ctx),
                Exec::Aborted {
                    parent_message_id,
                    mut tools,
                } => {
                    // Calls still waiting behind an approval gate never ran either.
                    tools.extend(gated_calls(instructions.as_slice()));
                    return StepOutcome::Continue(self.abort_context(
                        token,
                        state,
                        parent_message_id,
                        tools,
                    ))
                }
            }
        }

        if state.status == AgentStatus::WaitingForHumanInput {
            return StepOutcome::Paused;
        }
        match next {
            Some(ctx) => StepOutcome::Continue(ctx),
            None => apply_finish(
                state,
                FinishReason::AgentDecision,
                "Agent produced no instruction".to_owned(),
            ),
        }
    }

    /// Mark the state interrupted and build the context the agent sees for
    /// its abort handling step.
    fn abort_context(
        &self,
        token: &CancelToken,
        state: &mut AgentState,
        parent_message_id: String,
        tools: Vec<ToolCallPayload>,
    ) -> AgentRuntimeContext {
        let reason = token
            .reason()
            .unwrap_or_else(|| CANCELLED_BY_USER.to_owned());
        tracing::info!(reason = %reason, aborted_tools = tools.len(), "agent run interrupted");
        state.interrupt(reason.clone(), false);
        AgentRuntimeContext::human_abort(&HumanAbortPayload {
            has_tools_calling: !tools.is_empty(),
            tools_calling: tools,
            parent_message_id,
            reason,
        })
    }

    fn finish_run(
        &self,
        root: OperationId,
        state: &AgentState,
        outcome: Option<(FinishReason, String)>,
    ) -> RunResult {
        match &outcome {
            Some((FinishReason::ErrorRecovery, detail)) => {
                // Failing does not cascade, so stop stragglers first.
                for child in self.registry.children(&root) {
                    if child.is_running() {
                        self.registry
                            .cancel_operation(&child.id, "Parent operation failed");
                    }
                }
                self.registry
                    .fail_operation(&root, OperationError::new("agent", detail.clone()));
            }
            Some((reason, _)) => {
                self.registry.complete_operation(
                    &root,
                    Some(MetadataPatch::new().set("finishReason", json!(reason.as_str()))),
                );
            }
            None => {
                self.registry.complete_operation(
                    &root,
                    Some(MetadataPatch::new().set("waitingForHuman", json!(true))),
                );
            }
        }

        let (finish_reason, reason_detail) = match outcome {
            Some((reason, detail)) => (Some(reason), Some(detail)),
            None => (None, None),
        };
        tracing::info!(
            operation_id = %root,
            status = ?state.status,
            finish_reason = ?finish_reason,
            steps = state.step_count,
            "agent run segment ended"
        );
        RunResult {
            operation_id: root,
            status: state.status,
            finish_reason,
            reason_detail,
            steps: state.step_count,
        }
    }

    // ── Instruction executors ───────────────────────────────────────

    async fn call_llm(&self, root: &OperationId, state: &mut AgentState, payload: CallLlmPayload) -> Exec {
        let op = self.registry.start_operation(
            StartOperation::new(OperationType::CallLlm)
                .parent(root)
                .label("Calling model"),
        );
        let assistant_id = new_message_id("msg");
        self.registry
            .associate_message_with_operation(&assistant_id, &op.operation_id);

        let parent_message_id = payload.parent_message_id.clone();
        let cancel = op.cancel_token.clone();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = self.model.call(payload, op.cancel_token.clone()) => Some(r),
        };

        match result {
            None => Exec::Aborted {
                parent_message_id: parent_message_id.unwrap_or_default(),
                tools: Vec::new(),
            },
            Some(Err(_)) if cancel.is_cancelled() => Exec::Aborted {
                parent_message_id: parent_message_id.unwrap_or_default(),
                tools: Vec::new(),
            },
            Some(Err(e)) => {
                tracing::warn!(operation_id = %op.operation_id, error = %e, "model call failed");
                self.registry
                    .fail_operation(&op.operation_id, OperationError::from(&e));
                Exec::Next(AgentRuntimeContext::error(e.to_string()))
            }
            Some(Ok(outcome)) => {
                let tokens = outcome.usage.unwrap_or_default();
                state.usage.record_llm_call(tokens.input, tokens.output);
                self.registry.complete_operation(
                    &op.operation_id,
                    Some(
                        MetadataPatch::new()
                            .set("inputTokens", json!(tokens.input))
                            .set("outputTokens", json!(tokens.output)),
                    ),
                );

                let tools_calling = outcome.tools_calling;
                let mut message = ChatMessage::assistant(assistant_id.clone(), outcome.content);
                message.parent_id = parent_message_id;
                message.tools = tools_calling.clone();
                state.push_message(message);

                Exec::Next(AgentRuntimeContext::llm_result(&LlmResultPayload {
                    has_tools_calling: !tools_calling.is_empty(),
                    tools_calling,
                    parent_message_id: assistant_id,
                }))
            }
        }
    }

    /// Run one or more calls under a `toolCalling` group operation, at most
    /// `max_parallel_tools` at a time. Results are recorded in call order.
    async fn call_tools(
        &self,
        root: &OperationId,
        state: &mut AgentState,
        parent_message_id: String,
        calls: Vec<ToolCallPayload>,
        batch: bool,
    ) -> Exec {
        let label = match calls.as_slice() {
            [single] => format!("Calling {}", single.tool_key()),
            many => format!("Calling {} tools", many.len()),
        };
        let group = self.registry.start_operation(
            StartOperation::new(OperationType::ToolCalling)
                .parent(root)
                .label(label),
        );

        let width = self.config.max_parallel_tools.max(1);
        let mut runs = Vec::with_capacity(calls.len());
        for chunk in calls.chunks(width) {
            if group.cancel_token.is_cancelled() {
                runs.extend(chunk.iter().cloned().map(|call| ToolRun {
                    call,
                    status: ToolRunStatus::Aborted,
                }));
                continue;
            }
            let futures = chunk
                .iter()
                .cloned()
                .map(|call| self.execute_tool(&group.operation_id, call));
            runs.extend(futures_util::future::join_all(futures).await);
        }

        if group.cancel_token.is_cancelled() {
            let mut aborted = Vec::new();
            for run in runs {
                match run.status {
                    ToolRunStatus::Aborted => aborted.push(run.call),
                    _ => record_tool_run(state, &parent_message_id, run),
                }
            }
            return Exec::Aborted {
                parent_message_id,
                tools: aborted,
            };
        }

        for run in runs {
            record_tool_run(state, &parent_message_id, run);
        }
        self.registry.complete_operation(&group.operation_id, None);

        Exec::Next(if batch {
            AgentRuntimeContext::tools_batch_result(parent_message_id)
        } else {
            AgentRuntimeContext::tool_result(parent_message_id)
        })
    }

    async fn execute_tool(&self, group: &OperationId, call: ToolCallPayload) -> ToolRun {
        let key = call.tool_key();
        let op = self.registry.start_operation(
            StartOperation::new(OperationType::ExecuteToolCall)
                .parent(group)
                .label(key.clone()),
        );
        let cancel = op.cancel_token.clone();
        let timeout = self.config.tool_timeout();

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => ToolRunStatus::Aborted,
            r = tokio::time::timeout(timeout, self.tools.execute(call.clone(), op.cancel_token.clone())) => {
                match r {
                    Ok(Ok(outcome)) => {
                        self.registry.complete_operation(
                            &op.operation_id,
                            Some(MetadataPatch::new().set("isError", json!(outcome.is_error))),
                        );
                        ToolRunStatus::Done(outcome)
                    }
                    Ok(Err(_)) if cancel.is_cancelled() => ToolRunStatus::Aborted,
                    Ok(Err(e)) => {
                        tracing::warn!(tool = %key, error = %e, "tool call failed");
                        self.registry
                            .fail_operation(&op.operation_id, OperationError::from(&e));
                        ToolRunStatus::Failed(e)
                    }
                    Err(_) => {
                        let e = Error::Timeout(format!(
                            "tool {key} exceeded {}ms",
                            timeout.as_millis()
                        ));
                        tracing::warn!(tool = %key, timeout_ms = timeout.as_millis() as u64, "tool call timed out");
                        self.registry.fail_operation(
                            &op.operation_id,
                            OperationError::from(&e).with_code("TIMEOUT"),
                        );
                        ToolRunStatus::Failed(e)
                    }
                }
            }
        };

        ToolRun { call, status }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn apply_finish(state: &mut AgentState, reason: FinishReason, detail: String) -> StepOutcome {
    state.status = match reason {
        FinishReason::ErrorRecovery => AgentStatus::Error,
        _ if state.status == AgentStatus::Interrupted => AgentStatus::Interrupted,
        _ => AgentStatus::Done,
    };
    state.touch();
    tracing::debug!(reason = reason.as_str(), detail = %detail, "agent finished");
    StepOutcome::Finished { reason, detail }
}

fn tool_message_mut<'a>(state: &'a mut AgentState, tool_call_id: &str) -> Option<&'a mut ChatMessage> {
    state
        .messages
        .iter_mut()
        .find(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(tool_call_id))
}

/// Flip a pending tool message to `status` and drop it from the pending
/// list. Returns the call and the id of the assistant message it hangs off.
fn take_pending(
    state: &mut AgentState,
    tool_call_id: &str,
    status: InterventionStatus,
) -> Result<(ToolCallPayload, String)> {
    let msg = state
        .messages
        .iter_mut()
        .find(|m| m.is_pending_approval() && m.tool_call_id.as_deref() == Some(tool_call_id))
        .ok_or_else(|| Error::Other(format!("no pending tool call {tool_call_id}")))?;
    let call = msg
        .plugin
        .clone()
        .ok_or_else(|| Error::Other(format!("tool message for {tool_call_id} has no call")))?;
    msg.set_intervention(status);
    let parent = msg.parent_id.clone().unwrap_or_default();

    state.pending_tools_calling.retain(|c| c.id != tool_call_id);
    state.touch();
    Ok((call, parent))
}

fn record_tool_run(state: &mut AgentState, parent_message_id: &str, run: ToolRun) {
    let (content, intervention) = match run.status {
        ToolRunStatus::Done(outcome) => {
            state.usage.record_tool_call(&run.call);
            (outcome.content, None)
        }
        ToolRunStatus::Failed(e) => {
            state.usage.record_tool_call(&run.call);
            (format!("Error: {e}"), None)
        }
        ToolRunStatus::Aborted => (
            ABORTED_TOOL_CONTENT.to_owned(),
            Some(InterventionStatus::Aborted),
        ),
    };

    // An approved placeholder is filled in place.
    if let Some(existing) = tool_message_mut(state, &run.call.id) {
        existing.content = content;
        if let Some(status) = intervention {
            existing.set_intervention(status);
        }
    } else {
        let mut msg = ChatMessage::tool_result(new_message_id("tool"), run.call, content);
        if !parent_message_id.is_empty() {
            msg.parent_id = Some(parent_message_id.to_owned());
        }
        if let Some(status) = intervention {
            msg.set_intervention(status);
        }
        state.messages.push(msg);
    }
    state.touch();
}

fn request_approval(
    state: &mut AgentState,
    calls: Vec<ToolCallPayload>,
    reason: &str,
    skip_create_tool_message: bool,
) {
    if !skip_create_tool_message {
        for call in &calls {
            let parent = state
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::Assistant && m.tools.iter().any(|t| t.id == call.id))
                .map(|m| m.id.clone());
            let mut msg = ChatMessage::pending_tool(new_message_id("tool"), call.clone());
            msg.parent_id = parent;
            state.messages.push(msg);
        }
    }
    tracing::info!(pending = calls.len(), reason, "waiting for human approval");
    state.usage.human.approval_requests += 1;
    state.pending_tools_calling = calls;
    state.status = AgentStatus::WaitingForHumanInput;
    state.touch();
}

/// Calls carried by approval requests that have not been executed yet.
fn gated_calls(rest: &[AgentInstruction]) -> Vec<ToolCallPayload> {
    rest.iter()
        .filter_map(|instruction| match instruction {
            AgentInstruction::RequestHumanApprove {
                pending_tools_calling,
                ..
            } => Some(pending_tools_calling.iter().cloned()),
            _ => None,
        })
        .flatten()
        .collect()
}

fn resolve_aborted(state: &mut AgentState, calls: &[ToolCallPayload]) {
    for call in calls {
        match tool_message_mut(state, &call.id) {
            Some(msg) => {
                if msg.is_pending_approval() {
                    msg.set_intervention(InterventionStatus::Aborted);
                    msg.content = ABORTED_TOOL_CONTENT.to_owned();
                }
            }
            None => {
                let mut msg = ChatMessage::tool_result(
                    new_message_id("tool"),
                    call.clone(),
                    ABORTED_TOOL_CONTENT,
                );
                msg.set_intervention(InterventionStatus::Aborted);
                state.messages.push(msg);
            }
        }
    }
    state.pending_tools_calling.clear();
    state.touch();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCallPayload {
        ToolCallPayload::new(id, "fs", "delete", "{}")
    }

    #[test]
    fn request_approval_creates_pending_messages_once() {
        let mut state = AgentState::new("s1");
        let mut assistant = ChatMessage::assistant("a1", "");
        assistant.tools = vec![call("c1")];
        state.messages.push(assistant);

        request_approval(&mut state, vec![call("c1")], "human_intervention_required", false);
        assert_eq!(state.status, AgentStatus::WaitingForHumanInput);
        assert_eq!(state.pending_tool_calls(), vec![call("c1")]);
        assert_eq!(state.messages[1].parent_id.as_deref(), Some("a1"));

        request_approval(&mut state, vec![call("c1")], "Some tools still pending approval", true);
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.usage.human.approval_requests, 2);
    }

    #[test]
    fn take_pending_flips_status_and_returns_parent() {
        let mut state = AgentState::new("s1");
        state
            .messages
            .push(ChatMessage::pending_tool("t1", call("c1")).with_parent("a1"));
        state.pending_tools_calling = vec![call("c1")];

        let (taken, parent) = take_pending(&mut state, "c1", InterventionStatus::Approved).unwrap();
        assert_eq!(taken, call("c1"));
        assert_eq!(parent, "a1");
        assert!(state.pending_tools_calling.is_empty());
        assert!(take_pending(&mut state, "c1", InterventionStatus::Approved).is_err());
    }

    #[test]
    fn gated_calls_collects_only_approval_requests() {
        let rest = vec![
            AgentInstruction::RequestHumanApprove {
                pending_tools_calling: vec![call("c2"), call("c3")],
                reason: "human_intervention_required".into(),
                skip_create_tool_message: false,
            },
            AgentInstruction::Finish {
                reason: FinishReason::Completed,
                reason_detail: String::new(),
            },
        ];
        let ids: Vec<String> = gated_calls(&rest).into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["c2", "c3"]);
        assert!(gated_calls(&[]).is_empty());
    }

    #[test]
    fn resolve_aborted_covers_pending_and_missing_messages() {
        let mut state = AgentState::new("s1");
        state.messages.push(ChatMessage::pending_tool("t1", call("c1")));
        state.pending_tools_calling = vec![call("c1")];

        resolve_aborted(&mut state, &[call("c1"), call("c2")]);
        assert_eq!(state.messages.len(), 2);
        for msg in &state.messages {
            assert_eq!(
                msg.plugin_intervention.as_ref().map(|i| i.status),
                Some(InterventionStatus::Aborted)
            );
            assert_eq!(msg.content, ABORTED_TOOL_CONTENT);
        }
        assert!(state.pending_tools_calling.is_empty());
    }

    #[test]
    fn error_recovery_finish_marks_error_status() {
        let mut state = AgentState::new("s1");
        apply_finish(&mut state, FinishReason::ErrorRecovery, "boom".into());
        assert_eq!(state.status, AgentStatus::Error);

        let mut state = AgentState::new("s1");
        state.interrupt("stop", false);
        apply_finish(&mut state, FinishReason::UserRequested, "stop".into());
        assert_eq!(state.status, AgentStatus::Interrupted);
    }
}
