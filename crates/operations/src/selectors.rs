//! Read-only queries over the registry.
//!
//! Every selector takes the read lock once and answers from a single
//! consistent view of the canonical map and its indices.

use std::collections::HashMap;

use sw_domain::context::context_key;

use crate::operation::{Operation, OperationId, OperationType};
use crate::registry::OperationRegistry;

impl OperationRegistry {
    /// Operations of one type, in start order.
    pub fn operations_by_type(&self, op_type: OperationType) -> Vec<Operation> {
        let inner = self.inner.read();
        inner
            .by_type
            .get(&op_type)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.operations.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Operations registered under exactly this `(session, topic)` context.
    pub fn operations_in_context(&self, session_id: &str, topic_id: Option<&str>) -> Vec<Operation> {
        let key = context_key(session_id, topic_id);
        let inner = self.inner.read();
        inner
            .by_context
            .get(&key)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.operations.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Operations that touched a message, in association order.
    pub fn operations_for_message(&self, message_id: &str) -> Vec<Operation> {
        let inner = self.inner.read();
        inner
            .by_message
            .get(message_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.operations.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn children(&self, id: &OperationId) -> Vec<Operation> {
        let inner = self.inner.read();
        let Some(op) = inner.operations.get(id) else {
            return Vec::new();
        };
        op.child_ids
            .iter()
            .filter_map(|cid| inner.operations.get(cid).cloned())
            .collect()
    }

    fn any_running_in_context(
        &self,
        session_id: &str,
        topic_id: Option<&str>,
        pred: impl Fn(&Operation) -> bool,
    ) -> bool {
        let key = context_key(session_id, topic_id);
        let inner = self.inner.read();
        inner.by_context.get(&key).is_some_and(|ids| {
            ids.iter()
                .filter_map(|id| inner.operations.get(id))
                .any(|op| op.is_running() && pred(op))
        })
    }

    // ── Conversation-level predicates ───────────────────────────────

    /// True iff an agent runtime is running in this exact context.
    pub fn is_ai_generating(&self, session_id: &str, topic_id: Option<&str>) -> bool {
        self.any_running_in_context(session_id, topic_id, |op| {
            op.op_type == OperationType::ExecAgentRuntime
        })
    }

    /// Running agent runtimes in the context, thread-scoped ones included,
    /// minus those already aborting.
    pub fn is_agent_runtime_running(&self, session_id: &str, topic_id: Option<&str>) -> bool {
        self.any_running_in_context(session_id, topic_id, |op| {
            op.op_type == OperationType::ExecAgentRuntime && !op.metadata.is_aborting
        })
    }

    /// Like [`is_agent_runtime_running`](Self::is_agent_runtime_running) but
    /// ignores runtimes scoped to a thread.
    pub fn is_main_window_agent_runtime_running(
        &self,
        session_id: &str,
        topic_id: Option<&str>,
    ) -> bool {
        self.any_running_in_context(session_id, topic_id, |op| {
            op.op_type == OperationType::ExecAgentRuntime
                && !op.metadata.is_aborting
                && op.context.thread_id.is_none()
        })
    }

    pub fn is_sending_message(&self, session_id: &str, topic_id: Option<&str>) -> bool {
        self.any_running_in_context(session_id, topic_id, |op| {
            op.op_type == OperationType::SendMessage
        })
    }

    pub fn is_in_rag_flow(&self, session_id: &str, topic_id: Option<&str>) -> bool {
        self.any_running_in_context(session_id, topic_id, |op| op.op_type == OperationType::Rag)
    }

    pub fn can_send_message(&self, session_id: &str, topic_id: Option<&str>) -> bool {
        !self.is_ai_generating(session_id, topic_id)
    }

    /// True when anything in the context could be stopped.
    pub fn can_interrupt(&self, session_id: &str, topic_id: Option<&str>) -> bool {
        self.any_running_in_context(session_id, topic_id, |_| true)
    }

    /// Label of the most recently started running operation in the context.
    pub fn current_operation_label(&self, session_id: &str, topic_id: Option<&str>) -> Option<String> {
        let key = context_key(session_id, topic_id);
        let inner = self.inner.read();
        let ids = inner.by_context.get(&key)?;
        ids.iter()
            .rev()
            .filter_map(|id| inner.operations.get(id))
            .filter(|op| op.is_running())
            .find_map(|op| op.label.clone())
    }

    // ── Global predicates ───────────────────────────────────────────

    pub fn get_running_operations(&self) -> Vec<Operation> {
        let inner = self.inner.read();
        let mut running: Vec<Operation> = inner
            .operations
            .values()
            .filter(|op| op.is_running())
            .cloned()
            .collect();
        running.sort_by_key(|op| op.metadata.start_time);
        running
    }

    pub fn has_any_running_operation(&self) -> bool {
        self.inner.read().operations.values().any(Operation::is_running)
    }

    pub fn has_running_operation_type(&self, op_type: OperationType) -> bool {
        let inner = self.inner.read();
        inner.by_type.get(&op_type).is_some_and(|ids| {
            ids.iter()
                .filter_map(|id| inner.operations.get(id))
                .any(Operation::is_running)
        })
    }

    /// Any running operation is working on this message.
    pub fn is_message_processing(&self, message_id: &str) -> bool {
        let inner = self.inner.read();
        inner.by_message.get(message_id).is_some_and(|ids| {
            ids.iter()
                .filter_map(|id| inner.operations.get(id))
                .any(Operation::is_running)
        })
    }

    /// The message is still being created (send or assistant placeholder).
    pub fn is_message_creating(&self, message_id: &str) -> bool {
        let inner = self.inner.read();
        inner.by_message.get(message_id).is_some_and(|ids| {
            ids.iter()
                .filter_map(|id| inner.operations.get(id))
                .any(|op| op.is_running() && op.op_type.is_message_creation())
        })
    }

    // ── Snapshot ────────────────────────────────────────────────────

    /// Clone the canonical map and every index under one read lock.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.read();
        RegistrySnapshot {
            operations: inner.operations.clone(),
            by_type: inner.by_type.clone(),
            by_context: inner.by_context.clone(),
            by_message: inner.by_message.clone(),
            message_operation: inner.message_operation.clone(),
        }
    }
}

/// A point-in-time copy of the registry, for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub operations: HashMap<OperationId, Operation>,
    pub by_type: HashMap<OperationType, Vec<OperationId>>,
    pub by_context: HashMap<String, Vec<OperationId>>,
    pub by_message: HashMap<String, Vec<OperationId>>,
    pub message_operation: HashMap<String, OperationId>,
}

impl RegistrySnapshot {
    /// List every index inconsistency found. Empty means consistent.
    pub fn check_consistency(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let indices = [
            ("by_type", self.by_type.values().flatten().collect::<Vec<_>>()),
            ("by_context", self.by_context.values().flatten().collect()),
            ("by_message", self.by_message.values().flatten().collect()),
            ("message_operation", self.message_operation.values().collect()),
        ];
        for (name, ids) in &indices {
            for id in ids {
                if !self.operations.contains_key(*id) {
                    problems.push(format!("{name} references unknown operation {id}"));
                }
            }
        }

        for (id, op) in &self.operations {
            if !self.by_type.get(&op.op_type).is_some_and(|ids| ids.contains(id)) {
                problems.push(format!("{id} missing from by_type[{}]", op.op_type));
            }
            let key = op.context.key();
            if !self.by_context.get(&key).is_some_and(|ids| ids.contains(id)) {
                problems.push(format!("{id} missing from by_context[{key}]"));
            }
            if let Some(mid) = &op.context.message_id {
                if !self.by_message.get(mid).is_some_and(|ids| ids.contains(id)) {
                    problems.push(format!("{id} missing from by_message[{mid}]"));
                }
            }
            if let Some(pid) = &op.parent_id {
                match self.operations.get(pid) {
                    Some(parent) if parent.child_ids.contains(id) => {}
                    Some(_) => problems.push(format!("{id} not listed in parent {pid} children")),
                    None => problems.push(format!("{id} has dangling parent {pid}")),
                }
            }
            for child in &op.child_ids {
                if !self.operations.contains_key(child) {
                    problems.push(format!("{id} lists unknown child {child}"));
                }
            }
            if op.is_aborted() != (op.status == crate::OperationStatus::Cancelled) {
                problems.push(format!("{id} token/status mismatch ({:?})", op.status));
            }
        }

        problems
    }
}
