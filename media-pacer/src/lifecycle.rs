use std::{
    fmt::{Display, Formatter},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::clock::ClockReference;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Explicit,
    EndOfStream,
    StageError,
    TrackWriteFailed,
    Internal,
}

impl Display for CloseReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CloseReason::Explicit => "explicit close",
            CloseReason::EndOfStream => "end of stream",
            CloseReason::StageError => "processing stage error",
            CloseReason::TrackWriteFailed => "track write failed",
            CloseReason::Internal => "internal error",
        };
        write!(f, "{}", s)
    }
}

/// Close-once gate shared by every output of a session.
///
/// The first `close` cancels the session token, which wakes every pending
/// pacing wait, and releases the clock. Every other call is a no-op.
pub struct Lifecycle {
    closed: AtomicBool,
    reason: OnceLock<CloseReason>,
    cancel: CancellationToken,
    clock: Arc<dyn ClockReference>,
}

impl Lifecycle {
    pub fn new(clock: Arc<dyn ClockReference>) -> Self {
        Self {
            closed: AtomicBool::new(false),
            reason: OnceLock::new(),
            cancel: CancellationToken::new(),
            clock,
        }
    }

    /// Returns `true` for the one call that performed the teardown.
    pub fn close(&self, reason: CloseReason) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("session already closed, ignoring {}", reason);
            return false;
        }

        let _ = self.reason.set(reason);
        self.cancel.cancel();
        self.clock.release();
        log::info!("session closed: {}", reason);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Cause of the close, set by whichever caller won.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }

    /// Token cancelled when the session closes.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolves once the session has closed.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }
}

#[cfg(test)]
#[path = "lifecycle_test.rs"]
mod lifecycle_test;
