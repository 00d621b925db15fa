// Copyright 2026 Build Acceleration Team.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A cancellation scope that carries the reason it was canceled for, unlike a bare
//! `tokio_util::sync::CancellationToken`. This is the Rust analogue of Go's `context.Cause(ctx)`:
//! spec testable property 5 requires that when the race coordinator's parent scope is canceled,
//! the `Result` it returns carries the parent's cancellation cause, which a payload-less token
//! can't express.
//!
//! Only the caller-facing parent scope needs this. The sibling scopes the race coordinator
//! creates for itself (`local_cancel`, `remote_watch_cancel`, the detached remote scope) stay
//! plain `CancellationToken`s, since nothing downstream ever reads their cause -- they're pure
//! "stop" signals.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct CancelScope {
    token: CancellationToken,
    cause: Arc<Mutex<Option<String>>>,
}

impl CancelScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the scope, recording `cause` if this is the first call to win the race to cancel
    /// it. Idempotent: later calls only take effect on the token, not the recorded cause.
    pub fn cancel(&self, cause: impl Into<String>) {
        let mut slot = self.cause.lock();
        if slot.is_none() {
            *slot = Some(cause.into());
        }
        drop(slot);
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// The reason `cancel` was called, if it has been.
    pub fn cause(&self) -> Option<String> {
        self.cause.lock().clone()
    }

    /// A plain child token for forwarding into collaborator traits (`RemoteExecClient`,
    /// `LocalPool`), which only need to know whether to stop, not why.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
