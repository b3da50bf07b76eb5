use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;

use sw_agent::{AgentRuntimeContext, AgentState, AgentStatus, GeneralAgentConfig, GeneralChatAgent};
use sw_domain::config::Config;
use sw_domain::message::ChatMessage;
use sw_domain::{ConversationContext, Result};
use sw_operations::{Operation, OperationEvent, OperationRegistry};

use crate::runtime::{AgentRuntime, RunResult};
use crate::scripted::{Script, ScriptedModel, ScriptedTools};

const SCRIPT_REJECTION: &str = "not approved by script";

/// Everything a scripted run produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Simulation {
    /// One entry per run segment; approvals start a new segment.
    pub segments: Vec<RunResult>,
    pub state: AgentState,
    /// Registry events in emission order. Older events are dropped when
    /// the run outgrows `registry.event_buffer`.
    pub events: Vec<OperationEvent>,
    /// Every operation the registry saw, oldest first.
    pub operations: Vec<Operation>,
    pub executed_tools: Vec<String>,
    /// Registry index problems. Empty on a healthy run.
    pub consistency: Vec<String>,
}

impl Simulation {
    pub fn final_status(&self) -> AgentStatus {
        self.state.status
    }
}

/// Play `script` through the general chat agent with scripted executors.
///
/// Each pause for approval is answered from `script.approve`: listed calls
/// are approved, anything else pending is rejected.
pub async fn simulate(script: &Script, config: &Config) -> Result<Simulation> {
    let registry = Arc::new(OperationRegistry::new(config.registry.clone()));
    let mut events_rx = registry.subscribe();
    let agent = Arc::new(GeneralChatAgent::new(GeneralAgentConfig::from(&config.agent)));
    let model = Arc::new(ScriptedModel::new(script.turns.clone()));
    let tools = Arc::new(ScriptedTools::new(script.tools.clone()));
    let runtime = AgentRuntime::new(
        agent,
        registry.clone(),
        model,
        tools.clone(),
        config.runtime.clone(),
    )
    .with_max_steps(config.agent.max_steps);

    let session = ConversationContext::new(script.session_id.clone(), script.topic_id.clone());
    let mut state = AgentState::new(script.session_id.clone())
        .with_messages(vec![ChatMessage::user("msg_user", script.user_message.clone())])
        .with_max_steps(config.agent.max_steps);
    for manifest in &script.manifests {
        state = state.with_manifest(manifest.clone());
    }

    let mut segments = Vec::new();
    let first = runtime
        .run(
            &session,
            &mut state,
            AgentRuntimeContext::user_input(json!({ "message": script.user_message })),
        )
        .await;
    segments.push(first);

    while state.status == AgentStatus::WaitingForHumanInput {
        let Some(next) = state.pending_tool_calls().into_iter().next() else {
            break;
        };
        let result = if script.approve.iter().any(|id| *id == next.id) {
            runtime.approve_tool_call(&session, &mut state, &next.id).await?
        } else {
            runtime
                .reject_tool_call(&session, &mut state, &next.id, Some(SCRIPT_REJECTION))
                .await?
        };
        segments.push(result);
    }

    let mut events = Vec::new();
    loop {
        match events_rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "simulation event log lagged");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }

    let snapshot = registry.snapshot();
    let consistency = snapshot.check_consistency();
    let mut operations: Vec<Operation> = snapshot.operations.into_values().collect();
    operations.sort_by_key(|op| op.metadata.start_time);

    tracing::info!(
        session_id = %script.session_id,
        status = ?state.status,
        segments = segments.len(),
        operations = operations.len(),
        "simulation finished"
    );

    Ok(Simulation {
        segments,
        state,
        events,
        operations,
        executed_tools: tools.executed(),
        consistency,
    })
}
