//! Shared types for Steward.
//!
//! Everything the operation registry, the decision engine and the runtime
//! driver need to agree on lives here: the error type, configuration, the
//! conversation context resolver, and the tool/message model.

pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod tool;

pub use context::{context_key, ConversationContext};
pub use error::{Error, Result};
