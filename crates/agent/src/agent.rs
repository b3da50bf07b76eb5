use crate::context::AgentRuntimeContext;
use crate::instruction::Decision;
use crate::state::AgentState;

/// Decides the next step of an agent run.
///
/// Implementations are synchronous and free of side effects: every I/O
/// step is expressed as an instruction for the driver. A phase or payload
/// the agent cannot handle must still yield an instruction (usually
/// `finish`) so the loop always has a way out.
pub trait Agent: Send + Sync {
    fn runner(&self, ctx: &AgentRuntimeContext, state: &AgentState) -> Decision;
}
