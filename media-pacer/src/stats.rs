use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::{gate::DropReason, sample::MediaKind};

/// Fire-and-forget statistics consumer. Implementations must not block.
pub trait StatsSink: Send + Sync {
    fn on_delivered(&self, kind: MediaKind, bytes: usize);
    fn on_dropped(&self, kind: MediaKind, reason: DropReason);
    /// A sample discarded while the output waited for its track.
    fn on_discarded(&self, kind: MediaKind);
    fn on_keyframe_requested(&self, kind: MediaKind);
}

/// Per-output counters.
#[derive(Default)]
pub struct OutputStats {
    samples_written: AtomicU64,
    bytes_delivered: AtomicU64,
    samples_dropped: AtomicU64,
    samples_discarded: AtomicU64,
    loss_events: AtomicU64,
    keyframe_requests: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub samples_written: u64,
    pub bytes_delivered: u64,
    pub samples_dropped: u64,
    pub samples_discarded: u64,
    pub loss_events: u64,
    pub keyframe_requests: u64,
}

impl OutputStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_written: self.samples_written.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            samples_discarded: self.samples_discarded.load(Ordering::Relaxed),
            loss_events: self.loss_events.load(Ordering::Relaxed),
            keyframe_requests: self.keyframe_requests.load(Ordering::Relaxed),
        }
    }
}

impl StatsSink for OutputStats {
    fn on_delivered(&self, _kind: MediaKind, bytes: usize) {
        self.samples_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_delivered
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn on_dropped(&self, _kind: MediaKind, reason: DropReason) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
        if reason.is_loss() {
            self.loss_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_discarded(&self, _kind: MediaKind) {
        self.samples_discarded.fetch_add(1, Ordering::Relaxed);
    }

    fn on_keyframe_requested(&self, _kind: MediaKind) {
        self.keyframe_requests.fetch_add(1, Ordering::Relaxed);
    }
}
