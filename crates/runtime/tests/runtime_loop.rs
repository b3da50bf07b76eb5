use std::sync::Arc;

use serde_json::json;

use sw_agent::{
    AgentRuntimeContext, AgentState, AgentStatus, FinishReason, GeneralAgentConfig,
    GeneralChatAgent,
};
use sw_domain::config::{RegistryConfig, RuntimeConfig};
use sw_domain::message::{ChatMessage, InterventionStatus, Role};
use sw_domain::tool::{HumanIntervention, ToolCallPayload, ToolManifest};
use sw_domain::ConversationContext;
use sw_operations::{OperationRegistry, OperationStatus, OperationType};
use sw_runtime::{
    AgentRuntime, ScriptedModel, ScriptedToolResponse, ScriptedTools, ScriptedTurn, TokenCounts,
};

struct Harness {
    runtime: Arc<AgentRuntime>,
    registry: Arc<OperationRegistry>,
    model: Arc<ScriptedModel>,
    tools: Arc<ScriptedTools>,
}

fn harness(turns: Vec<ScriptedTurn>, tools: ScriptedTools, config: RuntimeConfig) -> Harness {
    let registry = Arc::new(OperationRegistry::new(RegistryConfig {
        auto_cleanup: false,
        ..Default::default()
    }));
    let model = Arc::new(ScriptedModel::new(turns));
    let tools = Arc::new(tools);
    let runtime = Arc::new(AgentRuntime::new(
        Arc::new(GeneralChatAgent::new(GeneralAgentConfig::default())),
        registry.clone(),
        model.clone(),
        tools.clone(),
        config,
    ));
    Harness {
        runtime,
        registry,
        model,
        tools,
    }
}

fn default_tools() -> ScriptedTools {
    ScriptedTools::default()
        .with("web/search", ScriptedToolResponse::ok("3 results"))
        .with("fs/read", ScriptedToolResponse::ok("file body"))
        .with("fs/delete", ScriptedToolResponse::ok("deleted"))
}

fn state() -> AgentState {
    AgentState::new("s1")
        .with_messages(vec![ChatMessage::user("u1", "tidy up")])
        .with_manifest(ToolManifest::new("web").with_api("search", None))
        .with_manifest(
            ToolManifest::new("fs")
                .with_api("read", None)
                .with_api("delete", Some(HumanIntervention::Require)),
        )
}

fn session() -> ConversationContext {
    ConversationContext::session("s1")
}

fn call(id: &str, identifier: &str, api: &str) -> ToolCallPayload {
    ToolCallPayload::new(id, identifier, api, "{}")
}

fn start() -> AgentRuntimeContext {
    AgentRuntimeContext::user_input(json!({ "message": "tidy up" }))
}

fn assert_consistent(registry: &OperationRegistry) {
    let problems = registry.snapshot().check_consistency();
    assert!(problems.is_empty(), "inconsistent registry: {problems:#?}");
}

async fn wait_for_running(registry: &OperationRegistry, op_type: OperationType) {
    while !registry.has_running_operation_type(op_type) {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn plain_answer_completes_in_two_steps() {
    let mut turn = ScriptedTurn::text("All tidy.");
    turn.usage = Some(TokenCounts { input: 12, output: 4 });
    let h = harness(vec![turn], default_tools(), RuntimeConfig::default());
    let mut state = state();

    let result = h.runtime.run(&session(), &mut state, start()).await;

    assert_eq!(result.status, AgentStatus::Done);
    assert_eq!(result.finish_reason, Some(FinishReason::Completed));
    assert_eq!(result.steps, 2);
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[1].role, Role::Assistant);
    assert_eq!(state.messages[1].content, "All tidy.");
    assert_eq!(state.usage.llm.api_calls, 1);
    assert_eq!(state.usage.llm.tokens.total, 16);

    let root = h.registry.get(&result.operation_id).unwrap();
    assert_eq!(root.status, OperationStatus::Completed);
    assert_eq!(root.metadata.get("finishReason"), Some(&json!("completed")));
    let children = h.registry.children(&result.operation_id);
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].op_type, OperationType::CallLlm);
    assert!(h.registry.operation_for_message(&state.messages[1].id).is_some());
    assert!(!h.registry.is_agent_runtime_running("s1", None));
    assert_consistent(&h.registry);
}

#[tokio::test]
async fn single_tool_result_is_fed_back_to_the_model() {
    let h = harness(
        vec![
            ScriptedTurn::tools(vec![call("c1", "web", "search")]),
            ScriptedTurn::text("Found 3 results."),
        ],
        default_tools(),
        RuntimeConfig::default(),
    );
    let mut state = state();

    let result = h.runtime.run(&session(), &mut state, start()).await;

    assert_eq!(result.finish_reason, Some(FinishReason::Completed));
    assert_eq!(h.tools.executed(), vec!["c1".to_string()]);
    let tool_msg = state
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert_eq!(tool_msg.content, "3 results");
    assert_eq!(tool_msg.parent_id.as_deref(), Some(state.messages[1].id.as_str()));
    assert_eq!(state.usage.tools.total_calls, 1);

    // The second model call saw the tool result.
    let calls = h.model.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].messages.iter().any(|m| m.content == "3 results"));
    assert_eq!(h.registry.operations_by_type(OperationType::ExecuteToolCall).len(), 1);
    assert_consistent(&h.registry);
}

#[tokio::test]
async fn batch_runs_every_call_in_order() {
    let h = harness(
        vec![
            ScriptedTurn::tools(vec![call("c1", "web", "search"), call("c2", "fs", "read")]),
            ScriptedTurn::text("done"),
        ],
        ScriptedTools::default()
            .with("web/search", ScriptedToolResponse::ok("3 results").delayed(20))
            .with("fs/read", ScriptedToolResponse::ok("file body")),
        RuntimeConfig::default(),
    );
    let mut state = state();

    let result = h.runtime.run(&session(), &mut state, start()).await;

    assert_eq!(result.status, AgentStatus::Done);
    // Completion order differs from call order; history does not.
    assert_eq!(h.tools.executed(), vec!["c2".to_string(), "c1".to_string()]);
    let tool_contents: Vec<&str> = state
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(tool_contents, vec!["3 results", "file body"]);

    let groups = h.registry.operations_by_type(OperationType::ToolCalling);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].child_ids.len(), 2);
    assert_consistent(&h.registry);
}

#[tokio::test]
async fn gated_call_pauses_until_approved() {
    let h = harness(
        vec![
            ScriptedTurn::tools(vec![call("c1", "web", "search"), call("c2", "fs", "delete")]),
            ScriptedTurn::text("Cleaned up."),
        ],
        default_tools(),
        RuntimeConfig::default(),
    );
    let mut state = state();

    let paused = h.runtime.run(&session(), &mut state, start()).await;
    assert!(paused.is_waiting());
    assert_eq!(paused.finish_reason, None);
    assert_eq!(h.tools.executed(), vec!["c1".to_string()]);
    assert_eq!(state.pending_tool_calls(), vec![call("c2", "fs", "delete")]);
    assert_eq!(state.usage.human.approval_requests, 1);
    let root = h.registry.get(&paused.operation_id).unwrap();
    assert_eq!(root.status, OperationStatus::Completed);
    assert_eq!(root.metadata.get("waitingForHuman"), Some(&json!(true)));

    let resumed = h
        .runtime
        .approve_tool_call(&session(), &mut state, "c2")
        .await
        .unwrap();
    assert_eq!(resumed.status, AgentStatus::Done);
    assert_ne!(resumed.operation_id, paused.operation_id);
    assert_eq!(h.tools.executed(), vec!["c1".to_string(), "c2".to_string()]);

    let approved = state
        .messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("c2"))
        .unwrap();
    assert_eq!(approved.content, "deleted");
    assert_eq!(
        approved.plugin_intervention.as_ref().map(|i| i.status),
        Some(InterventionStatus::Approved)
    );
    assert!(state.pending_tools_calling.is_empty());
    assert_consistent(&h.registry);
}

#[tokio::test]
async fn rejected_call_is_reported_to_the_model() {
    let h = harness(
        vec![
            ScriptedTurn::tools(vec![call("c2", "fs", "delete")]),
            ScriptedTurn::text("Okay, leaving it."),
        ],
        default_tools(),
        RuntimeConfig::default(),
    );
    let mut state = state();

    let paused = h.runtime.run(&session(), &mut state, start()).await;
    assert!(paused.is_waiting());

    let resumed = h
        .runtime
        .reject_tool_call(&session(), &mut state, "c2", Some("too risky"))
        .await
        .unwrap();
    assert_eq!(resumed.finish_reason, Some(FinishReason::Completed));
    assert!(h.tools.executed().is_empty());

    let rejected = state
        .messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("c2"))
        .unwrap();
    let intervention = rejected.plugin_intervention.as_ref().unwrap();
    assert_eq!(intervention.status, InterventionStatus::Rejected);
    assert_eq!(intervention.rejected_reason.as_deref(), Some("too risky"));
    assert!(h.model.calls()[1]
        .messages
        .iter()
        .any(|m| m.content.contains("too risky")));
}

#[tokio::test]
async fn approving_an_unknown_call_is_an_error() {
    let h = harness(vec![], default_tools(), RuntimeConfig::default());
    let mut state = state();
    assert!(h
        .runtime
        .approve_tool_call(&session(), &mut state, "nope")
        .await
        .is_err());
    assert!(h.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn interrupt_during_model_call_cancels_the_tree() {
    let h = harness(
        vec![ScriptedTurn::text("too late").delayed(60_000)],
        default_tools(),
        RuntimeConfig::default(),
    );
    let runtime = h.runtime.clone();
    let task = tokio::spawn(async move {
        let mut state = state();
        let result = runtime.run(&session(), &mut state, start()).await;
        (result, state)
    });

    wait_for_running(&h.registry, OperationType::CallLlm).await;
    let cancelled = h.runtime.interrupt_context(&session(), "stop requested");
    assert_eq!(cancelled.len(), 2);

    let (result, state) = task.await.unwrap();
    assert_eq!(result.status, AgentStatus::Interrupted);
    assert_eq!(result.finish_reason, Some(FinishReason::UserRequested));
    assert_eq!(
        state.interruption.as_ref().map(|i| i.reason.as_str()),
        Some("stop requested")
    );
    // No assistant message was produced.
    assert_eq!(state.messages.len(), 1);

    let root = h.registry.get(&result.operation_id).unwrap();
    assert_eq!(root.status, OperationStatus::Cancelled);
    for op in h.registry.snapshot().operations.values() {
        assert_eq!(op.status, OperationStatus::Cancelled);
        assert!(op.is_aborted());
    }
    assert_consistent(&h.registry);
}

#[tokio::test(start_paused = true)]
async fn interrupt_during_tools_marks_them_aborted() {
    let h = harness(
        vec![ScriptedTurn::tools(vec![
            call("c1", "web", "search"),
            call("c2", "fs", "read"),
        ])],
        ScriptedTools::default()
            .with("web/search", ScriptedToolResponse::ok("3 results").delayed(30_000))
            .with("fs/read", ScriptedToolResponse::ok("file body").delayed(30_000)),
        RuntimeConfig::default(),
    );
    let runtime = h.runtime.clone();
    let task = tokio::spawn(async move {
        let mut state = state();
        let result = runtime.run(&session(), &mut state, start()).await;
        (result, state)
    });

    wait_for_running(&h.registry, OperationType::ExecuteToolCall).await;
    let root = h
        .registry
        .operations_by_type(OperationType::ExecAgentRuntime)
        .remove(0)
        .id;
    h.runtime.interrupt(&root, "stop requested");

    let (result, state) = task.await.unwrap();
    assert_eq!(result.status, AgentStatus::Interrupted);
    assert!(h.tools.executed().is_empty());

    let aborted: Vec<_> = state
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .collect();
    assert_eq!(aborted.len(), 2);
    for msg in aborted {
        assert_eq!(
            msg.plugin_intervention.as_ref().map(|i| i.status),
            Some(InterventionStatus::Aborted)
        );
    }
    for op in h.registry.operations_by_type(OperationType::ExecuteToolCall) {
        assert_eq!(op.status, OperationStatus::Cancelled);
    }
    assert_consistent(&h.registry);
}

#[tokio::test(start_paused = true)]
async fn interrupt_skips_chunks_that_have_not_started() {
    let h = harness(
        vec![ScriptedTurn::tools(vec![
            call("c1", "web", "search"),
            call("c2", "fs", "read"),
        ])],
        ScriptedTools::default()
            .with("web/search", ScriptedToolResponse::ok("3 results").delayed(30_000))
            .with("fs/read", ScriptedToolResponse::ok("file body").delayed(30_000)),
        RuntimeConfig {
            max_parallel_tools: 1,
            ..Default::default()
        },
    );
    let runtime = h.runtime.clone();
    let task = tokio::spawn(async move {
        let mut state = state();
        let result = runtime.run(&session(), &mut state, start()).await;
        (result, state)
    });

    wait_for_running(&h.registry, OperationType::ExecuteToolCall).await;
    let root = h
        .registry
        .operations_by_type(OperationType::ExecAgentRuntime)
        .remove(0)
        .id;
    h.runtime.interrupt(&root, "stop requested");

    let (result, state) = task.await.unwrap();
    assert_eq!(result.status, AgentStatus::Interrupted);
    // The second call sat in a later chunk and never reached the executor.
    assert!(h.tools.executed().is_empty());

    let execs = h.registry.operations_by_type(OperationType::ExecuteToolCall);
    assert_eq!(execs.len(), 1);
    assert_eq!(execs[0].status, OperationStatus::Cancelled);
    assert!(!h.registry.has_running_operation_type(OperationType::ExecuteToolCall));

    let aborted: Vec<&str> = state
        .messages
        .iter()
        .filter(|m| {
            m.role == Role::Tool
                && m.plugin_intervention.as_ref().map(|i| i.status)
                    == Some(InterventionStatus::Aborted)
        })
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    assert_eq!(aborted, vec!["c1", "c2"]);
    assert_consistent(&h.registry);
}

#[tokio::test(start_paused = true)]
async fn interrupt_before_approval_gate_aborts_the_gated_call() {
    let h = harness(
        vec![ScriptedTurn::tools(vec![
            call("c1", "web", "search"),
            call("c2", "fs", "delete"),
        ])],
        ScriptedTools::default()
            .with("web/search", ScriptedToolResponse::ok("3 results").delayed(30_000))
            .with("fs/delete", ScriptedToolResponse::ok("deleted")),
        RuntimeConfig::default(),
    );
    let runtime = h.runtime.clone();
    let task = tokio::spawn(async move {
        let mut state = state();
        let result = runtime.run(&session(), &mut state, start()).await;
        (result, state)
    });

    wait_for_running(&h.registry, OperationType::ExecuteToolCall).await;
    h.runtime.interrupt_context(&session(), "stop requested");

    let (result, state) = task.await.unwrap();
    assert_eq!(result.status, AgentStatus::Interrupted);
    assert_eq!(result.finish_reason, Some(FinishReason::UserRequested));
    assert!(h.tools.executed().is_empty());
    assert!(state.pending_tools_calling.is_empty());

    let gated = state
        .messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("c2"))
        .expect("gated call gets a tool message");
    assert_eq!(
        gated.plugin_intervention.as_ref().map(|i| i.status),
        Some(InterventionStatus::Aborted)
    );
    let tool_messages = state.messages.iter().filter(|m| m.role == Role::Tool).count();
    assert_eq!(tool_messages, 2);
    assert_consistent(&h.registry);
}

#[tokio::test(start_paused = true)]
async fn slow_tool_times_out_and_the_run_continues() {
    let h = harness(
        vec![
            ScriptedTurn::tools(vec![call("c1", "web", "search")]),
            ScriptedTurn::text("Search is down."),
        ],
        ScriptedTools::default()
            .with("web/search", ScriptedToolResponse::ok("late").delayed(120_000)),
        RuntimeConfig {
            tool_timeout_ms: 1_000,
            ..Default::default()
        },
    );
    let mut state = state();

    let result = h.runtime.run(&session(), &mut state, start()).await;

    assert_eq!(result.finish_reason, Some(FinishReason::Completed));
    let tool_msg = state
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert!(tool_msg.content.starts_with("Error: timeout"));

    let exec = h
        .registry
        .operations_by_type(OperationType::ExecuteToolCall)
        .remove(0);
    assert_eq!(exec.status, OperationStatus::Failed);
    assert!(!exec.is_aborted());
    assert_eq!(
        exec.metadata.error.as_ref().and_then(|e| e.code.as_deref()),
        Some("TIMEOUT")
    );
}

#[tokio::test]
async fn step_limit_stops_a_looping_agent() {
    let h = harness(
        vec![
            ScriptedTurn::tools(vec![call("c1", "web", "search")]),
            ScriptedTurn::tools(vec![call("c2", "web", "search")]),
        ],
        default_tools(),
        RuntimeConfig::default(),
    );
    let mut state = state().with_max_steps(3);

    let result = h.runtime.run(&session(), &mut state, start()).await;

    assert_eq!(result.finish_reason, Some(FinishReason::MaxStepsExceeded));
    assert_eq!(result.steps, 4);
    assert_eq!(h.tools.executed(), vec!["c1".to_string()]);
}

#[tokio::test]
async fn model_error_fails_the_run() {
    let h = harness(
        vec![ScriptedTurn::failing("rate limited")],
        default_tools(),
        RuntimeConfig::default(),
    );
    let mut state = state();

    let result = h.runtime.run(&session(), &mut state, start()).await;

    assert_eq!(result.status, AgentStatus::Error);
    assert_eq!(result.finish_reason, Some(FinishReason::ErrorRecovery));
    assert!(result.reason_detail.unwrap().contains("rate limited"));

    let root = h.registry.get(&result.operation_id).unwrap();
    assert_eq!(root.status, OperationStatus::Failed);
    let llm = h.registry.operations_by_type(OperationType::CallLlm).remove(0);
    assert_eq!(llm.status, OperationStatus::Failed);
    assert_eq!(
        llm.metadata.error.as_ref().map(|e| e.error_type.as_str()),
        Some("model")
    );
    assert_consistent(&h.registry);
}
