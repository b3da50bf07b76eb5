use serde::Serialize;

use crate::operation::{OperationError, OperationId, OperationStatus, OperationType};

/// Lifecycle events broadcast by the registry after each committed
/// mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OperationEvent {
    #[serde(rename = "operation.started")]
    Started {
        operation_id: OperationId,
        op_type: OperationType,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_id: Option<OperationId>,
        context_key: String,
    },
    #[serde(rename = "operation.completed")]
    Completed { operation_id: OperationId, duration_ms: u64 },
    #[serde(rename = "operation.failed")]
    Failed { operation_id: OperationId, error: OperationError },
    #[serde(rename = "operation.cancelled")]
    Cancelled { operation_id: OperationId, reason: String },
    #[serde(rename = "operation.metadata")]
    MetadataUpdated { operation_id: OperationId },
}

impl OperationEvent {
    pub fn operation_id(&self) -> &OperationId {
        match self {
            Self::Started { operation_id, .. }
            | Self::Completed { operation_id, .. }
            | Self::Failed { operation_id, .. }
            | Self::Cancelled { operation_id, .. }
            | Self::MetadataUpdated { operation_id } => operation_id,
        }
    }

    /// Status the operation reached, for terminal events.
    pub fn terminal_status(&self) -> Option<OperationStatus> {
        match self {
            Self::Completed { .. } => Some(OperationStatus::Completed),
            Self::Failed { .. } => Some(OperationStatus::Failed),
            Self::Cancelled { .. } => Some(OperationStatus::Cancelled),
            _ => None,
        }
    }
}
