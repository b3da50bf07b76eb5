//! Cooperative cancellation tokens.
//!
//! Each operation owns a `CancelToken`. The async work performing the
//! operation checks `is_cancelled()` before starting and races
//! `cancelled()` against its own I/O. Only the registry can flip a token,
//! which keeps "status is cancelled" and "token is aborted" in lockstep.
//!
//! Callers that need an additional stop condition (a timeout, a UI abort)
//! derive a [`CancellationToken`] with [`CancelToken::signal`]; cancelling
//! that derived signal never touches the operation itself.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// A cancellation token that can be checked by the async work it guards.
#[derive(Clone, Debug)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug)]
struct TokenInner {
    signal: CancellationToken,
    reason: Mutex<Option<String>>,
}

impl CancelToken {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                signal: CancellationToken::new(),
                reason: Mutex::new(None),
            }),
        }
    }

    /// Abort the token. The first reason wins; later calls are no-ops.
    pub(crate) fn cancel(&self, reason: &str) {
        {
            let mut slot = self.inner.reason.lock();
            if slot.is_none() {
                *slot = Some(reason.to_owned());
            }
        }
        self.inner.signal.cancel();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.signal.is_cancelled()
    }

    /// The reason passed when the owning operation was cancelled.
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().clone()
    }

    /// Resolves once the token is aborted.
    pub async fn cancelled(&self) {
        self.inner.signal.cancelled().await;
    }

    /// A derived signal that fires when this token is aborted, and that the
    /// caller may additionally cancel on its own (e.g. on a timer).
    pub fn signal(&self) -> CancellationToken {
        self.inner.signal.child_token()
    }
}
