//! Operation lifecycle tracking for Steward.
//!
//! Every asynchronous activity the agent spawns (message sends, model calls,
//! reasoning, single and batched tool calls) is registered here as an
//! [`Operation`]: a cancelable node in a per-conversation tree.
//!
//! - [`OperationRegistry`] owns the canonical operation map plus the derived
//!   indices (by type, by context, by message, parent → children) behind a
//!   single write lock, so readers never observe a torn update.
//! - [`CancelToken`] is the cooperative signal handed to the async work.
//!   Cancelling a node walks its subtree and aborts every running descendant.
//! - Read-only selectors (`is_ai_generating`, `can_send_message`, …) live in
//!   [`selectors`].

pub mod cancel;
pub mod events;
pub mod filter;
pub mod operation;
pub mod registry;
pub mod selectors;

pub use cancel::CancelToken;
pub use events::OperationEvent;
pub use filter::{OperationFilter, TopicFilter};
pub use operation::{
    CancelContext, MetadataPatch, Operation, OperationContext, OperationError, OperationId,
    OperationMetadata, OperationStatus, OperationType, Progress,
};
pub use registry::{OperationRegistry, StartOperation, StartedOperation};
pub use selectors::RegistrySnapshot;
