//! Test doubles shared by the unit tests.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    clock::{ClockReference, ClockTime},
    encoder::{EncoderControl, KeyframeRequest},
    sample::Sample,
    track::TrackSink,
};

/// Clock whose running time only moves when the test says so.
pub(crate) struct ManualClock {
    now: Mutex<Option<ClockTime>>,
    releases: AtomicUsize,
}

impl ManualClock {
    pub(crate) fn at(now: ClockTime) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Some(now)),
            releases: AtomicUsize::new(0),
        })
    }

    pub(crate) fn unstarted() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(None),
            releases: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set(&self, now: ClockTime) {
        *self.now.lock() = Some(now);
    }

    pub(crate) fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl ClockReference for ManualClock {
    fn running_time(&self) -> Option<ClockTime> {
        *self.now.lock()
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Track that records every write and can be told to fail the n-th one.
#[derive(Default)]
pub(crate) struct RecordingTrack {
    written: Mutex<Vec<Sample>>,
    attempts: AtomicUsize,
    fail_on: Option<usize>,
}

impl RecordingTrack {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails the `attempt`-th write (1-based).
    pub(crate) fn failing_on(attempt: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_on: Some(attempt),
            ..Self::default()
        })
    }

    pub(crate) fn written(&self) -> Vec<Sample> {
        self.written.lock().clone()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackSink for RecordingTrack {
    async fn write_sample(&self, sample: Sample) -> anyhow::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on == Some(attempt) {
            anyhow::bail!("peer connection closed");
        }
        self.written.lock().push(sample);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingEncoder {
    requests: Mutex<Vec<KeyframeRequest>>,
    reject: bool,
}

impl RecordingEncoder {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            reject: true,
            ..Self::default()
        })
    }

    pub(crate) fn requests(&self) -> Vec<KeyframeRequest> {
        self.requests.lock().clone()
    }
}

impl EncoderControl for RecordingEncoder {
    fn force_keyframe(&self, request: KeyframeRequest) -> anyhow::Result<()> {
        if self.reject {
            anyhow::bail!("encoder is not accepting control events");
        }
        self.requests.lock().push(request);
        Ok(())
    }
}
