//! The operation registry: canonical map plus derived indices.
//!
//! All state lives in one [`RegistryInner`] behind a single `RwLock`.
//! Every mutation takes the write lock once, updates the canonical map and
//! every affected index, then releases it; events and cancel handlers run
//! only after the lock is dropped. Readers therefore never observe an
//! operation present in one index but missing from another.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use sw_domain::config::RegistryConfig;
use sw_domain::{ConversationContext, Error, Result};

use crate::cancel::CancelToken;
use crate::events::OperationEvent;
use crate::filter::OperationFilter;
use crate::operation::{
    CancelContext, MetadataPatch, Operation, OperationContext, OperationError, OperationId,
    OperationMetadata, OperationStatus, OperationType, Progress,
};

/// Reason stamped on descendants reached by a cascading cancel.
pub const PARENT_CANCELLED: &str = "Parent operation cancelled";

pub type CancelHandler = Arc<dyn Fn(&CancelContext) + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Start parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parameters for [`OperationRegistry::start_operation`].
///
/// With a `parent` and no explicit `context`, the new operation inherits the
/// parent's context. `message` overrides only the message id on top of
/// whichever context applies.
#[derive(Debug, Clone)]
pub struct StartOperation {
    pub op_type: OperationType,
    pub context: Option<OperationContext>,
    pub message_id: Option<String>,
    pub parent_id: Option<OperationId>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<MetadataPatch>,
}

impl StartOperation {
    pub fn new(op_type: OperationType) -> Self {
        Self {
            op_type,
            context: None,
            message_id: None,
            parent_id: None,
            label: None,
            description: None,
            metadata: None,
        }
    }

    pub fn context(mut self, context: OperationContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn parent(mut self, parent_id: &OperationId) -> Self {
        self.parent_id = Some(parent_id.clone());
        self
    }

    pub fn message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn metadata(mut self, patch: MetadataPatch) -> Self {
        self.metadata = Some(patch);
        self
    }
}

/// Handle returned to the caller that started an operation.
#[derive(Debug, Clone)]
pub struct StartedOperation {
    pub operation_id: OperationId,
    pub cancel_token: CancelToken,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interior state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub(crate) struct RegistryInner {
    pub(crate) operations: HashMap<OperationId, Operation>,
    pub(crate) by_type: HashMap<OperationType, Vec<OperationId>>,
    pub(crate) by_context: HashMap<String, Vec<OperationId>>,
    pub(crate) by_message: HashMap<String, Vec<OperationId>>,
    /// message id → the most granular operation working on it.
    pub(crate) message_operation: HashMap<String, OperationId>,
    handlers: HashMap<OperationId, CancelHandler>,
}

/// A node flipped to cancelled inside the lock, waiting for its event and
/// handler to be dispatched outside it.
struct CancelledNode {
    context: CancelContext,
    handler: Option<CancelHandler>,
}

impl RegistryInner {
    fn insert(&mut self, op: Operation) {
        let id = op.id.clone();
        self.by_type.entry(op.op_type).or_default().push(id.clone());
        self.by_context
            .entry(op.context.key())
            .or_default()
            .push(id.clone());
        if let Some(mid) = &op.context.message_id {
            push_unique(self.by_message.entry(mid.clone()).or_default(), &id);
            self.message_operation.insert(mid.clone(), id.clone());
        }
        if let Some(pid) = &op.parent_id {
            if let Some(parent) = self.operations.get_mut(pid) {
                push_unique(&mut parent.child_ids, &id);
            }
        }
        self.operations.insert(id, op);
    }

    /// True when `id` or any operation above it is cancelled.
    fn has_cancelled_ancestor(&self, id: &OperationId) -> bool {
        let mut seen = HashSet::new();
        let mut current = Some(id);
        while let Some(cid) = current {
            if !seen.insert(cid.clone()) {
                return false;
            }
            let Some(op) = self.operations.get(cid) else {
                return false;
            };
            if op.status == OperationStatus::Cancelled {
                return true;
            }
            current = op.parent_id.as_ref();
        }
        false
    }

    /// Walk the subtree rooted at `root` and cancel every running node.
    ///
    /// Terminal nodes are skipped but their children are still visited, so
    /// a completed parent does not shield a running grandchild.
    fn cancel_subtree(&mut self, root: &OperationId, reason: &str, out: &mut Vec<CancelledNode>) {
        let mut stack = vec![(root.clone(), reason.to_owned())];
        let mut seen = HashSet::new();

        while let Some((current, why)) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let Some(op) = self.operations.get_mut(&current) else {
                continue;
            };

            if op.is_running() {
                op.cancel_token.cancel(&why);
                op.status = OperationStatus::Cancelled;
                op.metadata.cancel_reason = Some(why.clone());
                op.metadata.finish();
                if op.op_type == OperationType::ExecAgentRuntime {
                    op.metadata.is_aborting = true;
                }
                out.push(CancelledNode {
                    context: CancelContext {
                        operation_id: current.clone(),
                        op_type: op.op_type,
                        reason: why.clone(),
                        metadata: op.metadata.clone(),
                    },
                    handler: self.handlers.remove(&current),
                });
            }

            for child in op.child_ids.iter().rev() {
                stack.push((child.clone(), PARENT_CANCELLED.to_owned()));
            }
        }
    }
}

/// Fill the gaps of an explicit context from the parent's. Explicit fields
/// win.
fn merge_context(explicit: OperationContext, parent: &OperationContext) -> OperationContext {
    OperationContext {
        session_id: if explicit.session_id.is_empty() {
            parent.session_id.clone()
        } else {
            explicit.session_id
        },
        topic_id: explicit.topic_id.or_else(|| parent.topic_id.clone()),
        message_id: explicit.message_id.or_else(|| parent.message_id.clone()),
        thread_id: explicit.thread_id.or_else(|| parent.thread_id.clone()),
        agent_id: explicit.agent_id.or_else(|| parent.agent_id.clone()),
        group_id: explicit.group_id.or_else(|| parent.group_id.clone()),
    }
}

fn push_unique(ids: &mut Vec<OperationId>, id: &OperationId) {
    if !ids.contains(id) {
        ids.push(id.clone());
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Thread-safe, explicitly owned store of in-flight work.
///
/// Share it as `Arc<OperationRegistry>`; there is no global instance.
pub struct OperationRegistry {
    pub(crate) inner: RwLock<RegistryInner>,
    events: broadcast::Sender<OperationEvent>,
    config: RegistryConfig,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl OperationRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            inner: RwLock::new(RegistryInner::default()),
            events,
            config,
        }
    }

    /// Receive lifecycle events for every operation.
    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: OperationEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // ── Start ───────────────────────────────────────────────────────

    /// Allocate a new `running` operation and register it in every index.
    ///
    /// Under a cancelled ancestor the operation is registered already
    /// cancelled, with its token aborted.
    pub fn start_operation(&self, params: StartOperation) -> StartedOperation {
        let StartOperation {
            op_type,
            context,
            message_id,
            parent_id,
            label,
            description,
            metadata,
        } = params;

        let id = OperationId::generate();
        let cancel_token = CancelToken::new();
        let mut meta = OperationMetadata::started_now();
        if let Some(patch) = metadata {
            meta.apply(patch);
        }

        let (parent_id, context_key, status) = {
            let mut inner = self.inner.write();

            let parent_id = parent_id.filter(|pid| {
                let found = inner.operations.contains_key(pid);
                if !found {
                    tracing::warn!(parent_id = %pid, "parent operation not found, starting top-level");
                }
                found
            });

            let mut ctx = match (context, &parent_id) {
                (Some(explicit), Some(pid)) => {
                    merge_context(explicit, &inner.operations[pid].context)
                }
                (Some(explicit), None) => explicit,
                (None, Some(pid)) => inner.operations[pid].context.clone(),
                (None, None) => {
                    tracing::warn!(op_type = %op_type, "operation started without context or parent");
                    OperationContext::default()
                }
            };
            if let Some(mid) = message_id {
                ctx.message_id = Some(mid);
            }
            let context_key = ctx.key();

            // A child of a cancelled subtree is born cancelled so the work
            // it stands for never starts.
            let mut status = OperationStatus::Running;
            if parent_id
                .as_ref()
                .is_some_and(|pid| inner.has_cancelled_ancestor(pid))
            {
                cancel_token.cancel(PARENT_CANCELLED);
                status = OperationStatus::Cancelled;
                meta.cancel_reason = Some(PARENT_CANCELLED.to_owned());
                meta.finish();
                if op_type == OperationType::ExecAgentRuntime {
                    meta.is_aborting = true;
                }
            }

            inner.insert(Operation {
                id: id.clone(),
                op_type,
                status,
                context: ctx,
                parent_id: parent_id.clone(),
                child_ids: Vec::new(),
                cancel_token: cancel_token.clone(),
                metadata: meta,
                label,
                description,
            });

            (parent_id, context_key, status)
        };

        tracing::debug!(
            operation_id = %id,
            op_type = %op_type,
            parent_id = ?parent_id.as_ref().map(OperationId::as_str),
            context = %context_key,
            "operation started"
        );
        self.emit(OperationEvent::Started {
            operation_id: id.clone(),
            op_type,
            parent_id: parent_id.clone(),
            context_key,
        });
        if status == OperationStatus::Cancelled {
            tracing::debug!(operation_id = %id, "parent already cancelled, operation started cancelled");
            self.emit(OperationEvent::Cancelled {
                operation_id: id.clone(),
                reason: PARENT_CANCELLED.to_owned(),
            });
        }

        // Only top-level starts sweep, to keep child starts cheap.
        if parent_id.is_none() && self.config.auto_cleanup {
            self.cleanup_completed(self.config.cleanup_after());
        }

        StartedOperation {
            operation_id: id,
            cancel_token,
        }
    }

    // ── Cancellation ────────────────────────────────────────────────

    /// Cancel an operation and every running descendant.
    ///
    /// Returns the ids that actually transitioned to `cancelled`. Unknown
    /// ids and already-terminal roots with no running descendants yield an
    /// empty list.
    pub fn cancel_operation(&self, id: &OperationId, reason: &str) -> Vec<OperationId> {
        let mut cancelled = Vec::new();
        {
            let mut inner = self.inner.write();
            if !inner.operations.contains_key(id) {
                tracing::warn!(operation_id = %id, "cancel: operation not found");
                return Vec::new();
            }
            inner.cancel_subtree(id, reason, &mut cancelled);
        }
        self.dispatch_cancelled(cancelled)
    }

    /// Cancel every running operation matching `filter`. Returns the
    /// matched ids.
    pub fn cancel_operations(&self, filter: &OperationFilter, reason: &str) -> Vec<OperationId> {
        let mut cancelled = Vec::new();
        let matched: Vec<OperationId> = {
            let mut inner = self.inner.write();
            let matched: Vec<OperationId> = inner
                .operations
                .values()
                .filter(|op| op.is_running() && filter.matches(op))
                .map(|op| op.id.clone())
                .collect();
            for id in &matched {
                inner.cancel_subtree(id, reason, &mut cancelled);
            }
            matched
        };
        tracing::debug!(
            session_id = ?filter.session_id,
            matched = matched.len(),
            reason,
            "batch cancel"
        );
        self.dispatch_cancelled(cancelled);
        matched
    }

    /// Cancel every running operation in the registry.
    pub fn cancel_all(&self, reason: &str) -> Vec<OperationId> {
        self.cancel_operations(&OperationFilter::default(), reason)
    }

    fn dispatch_cancelled(&self, cancelled: Vec<CancelledNode>) -> Vec<OperationId> {
        let mut ids = Vec::with_capacity(cancelled.len());
        for node in cancelled {
            let ctx = node.context;
            tracing::debug!(
                operation_id = %ctx.operation_id,
                op_type = %ctx.op_type,
                reason = %ctx.reason,
                "operation cancelled"
            );
            self.emit(OperationEvent::Cancelled {
                operation_id: ctx.operation_id.clone(),
                reason: ctx.reason.clone(),
            });
            if let Some(handler) = node.handler {
                if catch_unwind(AssertUnwindSafe(|| handler(&ctx))).is_err() {
                    tracing::warn!(operation_id = %ctx.operation_id, "cancel handler panicked");
                }
            }
            ids.push(ctx.operation_id);
        }
        ids
    }

    /// Register a callback run when the operation becomes cancelled
    /// (directly or through its ancestors). Returns false when the
    /// operation is unknown or already terminal.
    pub fn on_operation_cancel<F>(&self, id: &OperationId, handler: F) -> bool
    where
        F: Fn(&CancelContext) + Send + Sync + 'static,
    {
        let mut inner = self.inner.write();
        match inner.operations.get(id) {
            Some(op) if op.is_running() => {
                tracing::debug!(operation_id = %id, op_type = %op.op_type, "cancel handler registered");
                inner.handlers.insert(id.clone(), Arc::new(handler));
                true
            }
            Some(op) => {
                tracing::debug!(operation_id = %id, status = ?op.status, "cancel handler ignored, operation terminal");
                false
            }
            None => {
                tracing::warn!(operation_id = %id, "cancel handler: operation not found");
                false
            }
        }
    }

    // ── Terminal transitions ────────────────────────────────────────

    /// Mark an operation completed. Children are left as they are.
    pub fn complete_operation(&self, id: &OperationId, patch: Option<MetadataPatch>) -> bool {
        let duration_ms = {
            let mut inner = self.inner.write();
            let inner = &mut *inner;
            let Some(op) = inner.operations.get_mut(id) else {
                tracing::warn!(operation_id = %id, "complete: operation not found");
                return false;
            };
            if op.status.is_terminal() {
                tracing::debug!(operation_id = %id, status = ?op.status, "complete: already terminal");
                return false;
            }
            op.status = OperationStatus::Completed;
            op.metadata.finish();
            if let Some(patch) = patch {
                op.metadata.apply(patch);
            }
            inner.handlers.remove(id);
            op.metadata.duration_ms.unwrap_or(0)
        };

        tracing::debug!(operation_id = %id, duration_ms, "operation completed");
        self.emit(OperationEvent::Completed {
            operation_id: id.clone(),
            duration_ms,
        });
        true
    }

    /// Mark an operation failed with a structured error. Children are left
    /// as they are; callers that want them stopped cancel them explicitly.
    pub fn fail_operation(&self, id: &OperationId, error: OperationError) -> bool {
        {
            let mut inner = self.inner.write();
            let inner = &mut *inner;
            let Some(op) = inner.operations.get_mut(id) else {
                tracing::warn!(operation_id = %id, "fail: operation not found");
                return false;
            };
            if op.status.is_terminal() {
                tracing::debug!(operation_id = %id, status = ?op.status, "fail: already terminal");
                return false;
            }
            op.status = OperationStatus::Failed;
            op.metadata.finish();
            op.metadata.error = Some(error.clone());
            inner.handlers.remove(id);
        }

        tracing::debug!(
            operation_id = %id,
            error_type = %error.error_type,
            error = %error.message,
            "operation failed"
        );
        self.emit(OperationEvent::Failed {
            operation_id: id.clone(),
            error,
        });
        true
    }

    /// Generic status transition, routed through the dedicated transitions
    /// so the cancel-token invariant and terminal immutability hold.
    pub fn update_operation_status(
        &self,
        id: &OperationId,
        status: OperationStatus,
        patch: Option<MetadataPatch>,
    ) -> bool {
        match status {
            OperationStatus::Running => {
                let running = self.get(id).is_some_and(|op| op.is_running());
                if running {
                    if let Some(patch) = patch {
                        self.update_operation_metadata(id, patch);
                    }
                }
                running
            }
            OperationStatus::Completed => self.complete_operation(id, patch),
            OperationStatus::Failed => {
                let changed =
                    self.fail_operation(id, OperationError::new("unknown", "Operation failed"));
                if changed {
                    if let Some(patch) = patch {
                        self.update_operation_metadata(id, patch);
                    }
                }
                changed
            }
            OperationStatus::Cancelled => {
                let changed = self
                    .cancel_operation(id, "Status set to cancelled")
                    .contains(id);
                if changed {
                    if let Some(patch) = patch {
                        self.update_operation_metadata(id, patch);
                    }
                }
                changed
            }
        }
    }

    // ── Metadata & associations ─────────────────────────────────────

    /// Merge fields into an operation's metadata. Allowed on terminal
    /// operations so UI state (e.g. `inputSendErrorMsg`) can be cleared.
    pub fn update_operation_metadata(&self, id: &OperationId, patch: MetadataPatch) -> bool {
        {
            let mut inner = self.inner.write();
            let Some(op) = inner.operations.get_mut(id) else {
                tracing::warn!(operation_id = %id, "update metadata: operation not found");
                return false;
            };
            if patch.is_aborting == Some(true) {
                tracing::debug!(operation_id = %id, op_type = %op.op_type, "marking operation as aborting");
            }
            op.metadata.apply(patch);
        }
        self.emit(OperationEvent::MetadataUpdated {
            operation_id: id.clone(),
        });
        true
    }

    pub fn update_operation_progress(&self, id: &OperationId, current: u64, total: Option<u64>) -> bool {
        let mut inner = self.inner.write();
        let Some(op) = inner.operations.get_mut(id) else {
            return false;
        };
        let effective_total = total
            .or_else(|| op.metadata.progress.map(|p| p.total))
            .unwrap_or(current);
        let percentage = total
            .filter(|t| *t > 0)
            .map(|t| ((current as f64 / t as f64) * 100.0).round().min(100.0) as u8);
        op.metadata.progress = Some(Progress {
            current,
            total: effective_total,
            percentage,
        });
        true
    }

    /// Point `message_id` at `id` so the work behind that message can find
    /// its own cancel token. Overwrites any previous association.
    pub fn associate_message_with_operation(&self, message_id: &str, id: &OperationId) -> bool {
        let mut inner = self.inner.write();
        if !inner.operations.contains_key(id) {
            tracing::warn!(operation_id = %id, message_id, "associate: operation not found");
            return false;
        }
        inner
            .message_operation
            .insert(message_id.to_owned(), id.clone());
        push_unique(
            inner.by_message.entry(message_id.to_owned()).or_default(),
            id,
        );
        tracing::debug!(operation_id = %id, message_id, "message associated");
        true
    }

    // ── Cleanup ─────────────────────────────────────────────────────

    /// Drop terminal operations that ended at least `older_than` ago.
    /// Returns the number removed.
    pub fn cleanup_completed(&self, older_than: Duration) -> usize {
        let now = Utc::now();
        let threshold_ms = i64::try_from(older_than.as_millis()).unwrap_or(i64::MAX);

        let mut inner = self.inner.write();
        let inner = &mut *inner;

        let doomed: HashSet<OperationId> = inner
            .operations
            .values()
            .filter(|op| {
                op.status.is_terminal()
                    && op
                        .metadata
                        .end_time
                        .is_some_and(|end| (now - end).num_milliseconds() >= threshold_ms)
            })
            .map(|op| op.id.clone())
            .collect();

        if doomed.is_empty() {
            return 0;
        }

        for id in &doomed {
            let Some(op) = inner.operations.remove(id) else {
                continue;
            };
            if let Some(pid) = &op.parent_id {
                if let Some(parent) = inner.operations.get_mut(pid) {
                    parent.child_ids.retain(|c| c != id);
                }
            }
            for child in &op.child_ids {
                if let Some(c) = inner.operations.get_mut(child) {
                    c.parent_id = None;
                }
            }
        }

        let keep = |ids: &mut Vec<OperationId>| {
            ids.retain(|i| !doomed.contains(i));
            !ids.is_empty()
        };
        inner.by_type.retain(|_, ids| keep(ids));
        inner.by_context.retain(|_, ids| keep(ids));
        inner.by_message.retain(|_, ids| keep(ids));
        inner.message_operation.retain(|_, id| !doomed.contains(id));
        inner.handlers.retain(|id, _| !doomed.contains(id));

        tracing::debug!(removed = doomed.len(), "cleaned up terminal operations");
        doomed.len()
    }

    // ── Direct lookups ──────────────────────────────────────────────

    pub fn get(&self, id: &OperationId) -> Option<Operation> {
        self.inner.read().operations.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().operations.is_empty()
    }

    pub fn cancel_token(&self, id: &OperationId) -> Option<CancelToken> {
        self.inner
            .read()
            .operations
            .get(id)
            .map(|op| op.cancel_token.clone())
    }

    /// Like [`cancel_token`](Self::cancel_token) but an unknown id is an
    /// error, for callers that must have a token to proceed.
    pub fn abort_signal(&self, id: &OperationId) -> Result<CancelToken> {
        self.cancel_token(id)
            .ok_or_else(|| Error::OperationNotFound(id.to_string()))
    }

    pub fn operation_for_message(&self, message_id: &str) -> Option<OperationId> {
        self.inner.read().message_operation.get(message_id).cloned()
    }

    /// Cancel token of the operation currently associated with a message.
    pub fn cancel_token_for_message(&self, message_id: &str) -> Option<CancelToken> {
        let inner = self.inner.read();
        let id = inner.message_operation.get(message_id)?;
        inner.operations.get(id).map(|op| op.cancel_token.clone())
    }

    /// Session/topic an operation belongs to.
    pub fn session_context(&self, id: &OperationId) -> Result<ConversationContext> {
        let inner = self.inner.read();
        let op = inner
            .operations
            .get(id)
            .ok_or_else(|| Error::OperationNotFound(id.to_string()))?;
        Ok(ConversationContext::new(
            op.context.session_id.clone(),
            op.context.topic_id.clone(),
        ))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
