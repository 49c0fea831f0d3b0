use std::{
    fmt::{Display, Formatter},
    time::Duration,
};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::clock::ClockTime;

/// Behind-live tolerance used when no threshold is configured.
pub const DEFAULT_BEHIND_THRESHOLD: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Further behind running time than the threshold allows.
    Late,
    /// The session clock has no base time (not started or already released).
    NoClockBase,
    /// The sample timestamp has no running time under its segment.
    OutOfSegment,
    /// The session closed while the sample was waiting to be released.
    Cancelled,
}

impl DropReason {
    /// Drops that count as loss in the statistics. A cancelled wait is a
    /// shutdown artefact, not loss.
    pub fn is_loss(&self) -> bool {
        !matches!(self, DropReason::Cancelled)
    }
}

impl Display for DropReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DropReason::Late => "late",
            DropReason::NoClockBase => "no clock base",
            DropReason::OutOfSegment => "out of segment",
            DropReason::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacingDecision {
    Forward,
    WaitThenForward(Duration),
    Drop(DropReason),
}

impl PacingDecision {
    /// How long to hold the sample before writing it, `None` when it is dropped.
    pub fn wait(&self) -> Option<Duration> {
        match self {
            PacingDecision::Forward => Some(Duration::ZERO),
            PacingDecision::WaitThenForward(wait) => Some(*wait),
            PacingDecision::Drop(_) => None,
        }
    }

    pub fn is_drop(&self) -> bool {
        matches!(self, PacingDecision::Drop(_))
    }
}

/// Per-output decision function: forward now, forward after a wait, or drop.
#[derive(Clone, Copy, Debug)]
pub struct PacingGate {
    behind_threshold: Duration,
}

impl PacingGate {
    pub fn new(behind_threshold: Duration) -> Self {
        Self { behind_threshold }
    }

    pub fn behind_threshold(&self) -> Duration {
        self.behind_threshold
    }

    /// Decides the fate of a sample whose running time is `pts`, given the
    /// session's current running time `now`.
    ///
    /// A sample ahead of `now` waits out the offset. A sample behind `now` by
    /// no more than the threshold is held for its lateness. Anything further
    /// behind is dropped, as is anything that cannot be placed on the clock.
    pub fn decide(&self, pts: Option<ClockTime>, now: Option<ClockTime>) -> PacingDecision {
        let Some(now) = now else {
            return PacingDecision::Drop(DropReason::NoClockBase);
        };
        let Some(pts) = pts else {
            return PacingDecision::Drop(DropReason::OutOfSegment);
        };

        // the difference of two i64 always fits in i128 and its magnitude in u64
        let offset = i128::from(pts.nanos()) - i128::from(now.nanos());
        if offset == 0 {
            return PacingDecision::Forward;
        }

        let magnitude = Duration::from_nanos(offset.unsigned_abs() as u64);
        if offset < 0 && magnitude > self.behind_threshold {
            PacingDecision::Drop(DropReason::Late)
        } else {
            PacingDecision::WaitThenForward(magnitude)
        }
    }
}

impl Default for PacingGate {
    fn default() -> Self {
        Self::new(DEFAULT_BEHIND_THRESHOLD)
    }
}

/// Holds the caller for `wait`, waking early when `cancel` fires.
/// Returns `false` when the wait was cancelled.
pub(crate) async fn suspend(wait: Duration, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    if wait.is_zero() {
        return true;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(wait) => true,
    }
}

#[cfg(test)]
#[path = "gate_test.rs"]
mod gate_test;
