use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::{
    clock::{ClockReference, ClockTime},
    config::PacerConfig,
    encoder::{EncoderControl, KeyframeRequest},
    error::PacerError,
    gate::{DropReason, PacingDecision, PacingGate, suspend},
    lifecycle::{CloseReason, Lifecycle},
    sample::{Codec, MediaKind, RawSample, Sample, SampleCmd, SampleReceiver},
    stats::{OutputStats, StatsSink, StatsSnapshot},
    track::TrackSink,
};

/// Only every Nth drop is logged.
const DROP_LOG_INTERVAL: u64 = 120;

/// Codec-specific part of an output: how stage timestamps are read and how a
/// sample is put together for the track.
pub trait SampleAssembly: Send + Sync {
    fn kind(&self) -> MediaKind;

    fn codec(&self) -> Codec;

    fn decode_segment_timestamp(
        &self,
        clock: &dyn ClockReference,
        raw: &RawSample,
    ) -> Option<ClockTime> {
        clock.to_running_time(&raw.segment, raw.pts)
    }

    fn assemble(&self, raw: RawSample, running_time: ClockTime) -> Sample;
}

pub struct AudioAssembly {
    codec: Codec,
    frame_duration: Duration,
}

impl AudioAssembly {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            frame_duration: Duration::from_millis(20),
        }
    }

    pub fn with_frame_duration(mut self, frame_duration: Duration) -> Self {
        self.frame_duration = frame_duration;
        self
    }
}

impl SampleAssembly for AudioAssembly {
    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn codec(&self) -> Codec {
        self.codec
    }

    fn assemble(&self, raw: RawSample, running_time: ClockTime) -> Sample {
        let duration = raw.duration.unwrap_or(self.frame_duration);
        // every audio frame decodes on its own
        Sample::new(raw.data, duration, running_time, true)
    }
}

pub struct VideoAssembly {
    codec: Codec,
    frame_duration: Duration,
}

impl VideoAssembly {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            frame_duration: Duration::from_nanos(1_000_000_000 / 30),
        }
    }

    pub fn with_frame_rate(mut self, numerator: u32, denominator: u32) -> Self {
        if numerator > 0 && denominator > 0 {
            self.frame_duration = Duration::from_nanos(
                1_000_000_000u64 * u64::from(denominator) / u64::from(numerator),
            );
        }
        self
    }
}

impl SampleAssembly for VideoAssembly {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn codec(&self) -> Codec {
        self.codec
    }

    fn assemble(&self, raw: RawSample, running_time: ClockTime) -> Sample {
        let duration = raw.duration.unwrap_or(self.frame_duration);
        Sample::new(raw.data, duration, running_time, !raw.is_delta)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PullOutcome {
    Delivered { bytes: usize },
    Dropped(DropReason),
    /// Discarded because the track is not ready yet.
    Discarded,
    /// The session is closed; the stage should stop pulling.
    StreamEnded,
}

impl PullOutcome {
    pub fn is_stream_ended(&self) -> bool {
        matches!(self, PullOutcome::StreamEnded)
    }
}

/// One audio or video branch: pulls samples from its stage, paces them
/// against the session clock and writes them to the outbound track.
pub struct Output {
    assembly: Box<dyn SampleAssembly>,
    clock: Arc<dyn ClockReference>,
    lifecycle: Arc<Lifecycle>,
    gate: PacingGate,
    encoder: Option<Arc<dyn EncoderControl>>,
    track: RwLock<Option<Arc<dyn TrackSink>>>,
    drop_phase: AtomicBool,
    stage_attached: AtomicBool,
    stats: OutputStats,
    telemetry: Option<Arc<dyn StatsSink>>,
}

impl Output {
    pub fn new(
        assembly: Box<dyn SampleAssembly>,
        clock: Arc<dyn ClockReference>,
        lifecycle: Arc<Lifecycle>,
        config: &PacerConfig,
    ) -> Self {
        Self {
            assembly,
            clock,
            lifecycle,
            gate: PacingGate::new(config.behind_threshold()),
            encoder: None,
            track: RwLock::new(None),
            drop_phase: AtomicBool::new(config.initial_drop),
            stage_attached: AtomicBool::new(false),
            stats: OutputStats::new(),
            telemetry: None,
        }
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn EncoderControl>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn StatsSink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn kind(&self) -> MediaKind {
        self.assembly.kind()
    }

    pub fn codec(&self) -> Codec {
        self.assembly.codec()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn has_track(&self) -> bool {
        self.track.read().is_some()
    }

    pub fn in_drop_phase(&self) -> bool {
        self.drop_phase.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    /// Stores the outbound track and ends the initial drop phase.
    ///
    /// A later call replaces the track; the drop phase only ends once.
    pub fn on_track_ready(&self, track: Arc<dyn TrackSink>) {
        let kind = self.kind();
        // the track must be visible before the drop phase ends
        if self.track.write().replace(track).is_some() {
            log::warn!("{} output: track replaced", kind);
        }
        if self
            .drop_phase
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            log::info!("{} output ({}): track ready, forwarding samples", kind, self.codec());
        }
    }

    /// Handles one finished sample from the stage.
    ///
    /// Drops are reported as `Ok(PullOutcome::Dropped)`. Errors are fatal: the
    /// session is already closed when one is returned.
    pub async fn on_sample_pulled(&self, raw: RawSample) -> Result<PullOutcome, PacerError> {
        if self.lifecycle.is_closed() {
            return Ok(PullOutcome::StreamEnded);
        }

        let running_time = self
            .assembly
            .decode_segment_timestamp(self.clock.as_ref(), &raw);

        if self.in_drop_phase() {
            let kind = self.kind();
            self.record(|s| s.on_discarded(kind));
            return Ok(PullOutcome::Discarded);
        }

        let decision = self.gate.decide(running_time, self.clock.running_time());
        let (running_time, wait) = match (running_time, decision) {
            (_, PacingDecision::Drop(reason)) => {
                // a close racing this pull has already released the clock
                if self.lifecycle.is_closed() {
                    self.drop_sample(&raw, DropReason::Cancelled);
                    return Ok(PullOutcome::StreamEnded);
                }
                return Ok(self.drop_sample(&raw, reason));
            }
            (Some(running_time), PacingDecision::Forward) => (running_time, Duration::ZERO),
            (Some(running_time), PacingDecision::WaitThenForward(wait)) => (running_time, wait),
            (None, _) => return Err(self.fail("gate forwarded a sample without running time")),
        };

        if !suspend(wait, self.lifecycle.token()).await {
            self.drop_sample(&raw, DropReason::Cancelled);
            return Ok(PullOutcome::StreamEnded);
        }

        let track = self.track.read().clone();
        let Some(track) = track else {
            return Err(self.fail("drop phase ended before a track was set"));
        };

        let kind = self.kind();
        let sample = self.assembly.assemble(raw, running_time);
        let bytes = sample.size();
        match track.write_sample(sample).await {
            Ok(()) => {
                self.record(|s| s.on_delivered(kind, bytes));
                Ok(PullOutcome::Delivered { bytes })
            }
            Err(e) => {
                log::error!("{} output: track write failed: {:#}", kind, e);
                self.lifecycle.close(CloseReason::TrackWriteFailed);
                Err(PacerError::TrackWrite(e))
            }
        }
    }

    pub fn on_end_of_stream(&self) {
        log::info!("{} output: end of stream", self.kind());
        self.lifecycle.close(CloseReason::EndOfStream);
    }

    pub fn on_stage_error(&self, message: &str) {
        log::error!("{} output: processing stage failed: {}", self.kind(), message);
        self.lifecycle.close(CloseReason::StageError);
    }

    /// Closes the session this output belongs to. Idempotent.
    pub fn close(&self) -> bool {
        self.lifecycle.close(CloseReason::Explicit)
    }

    /// Asks the encoder for a keyframe with all headers. Does not touch the
    /// data path; a failure leaves the output open.
    pub fn request_keyframe(&self) -> Result<(), PacerError> {
        let kind = self.kind();
        if kind != MediaKind::Video {
            return Err(PacerError::Unsupported {
                kind,
                op: "keyframe request",
            });
        }

        self.record(|s| s.on_keyframe_requested(kind));
        let Some(encoder) = self.encoder.as_ref() else {
            return Err(PacerError::Control(anyhow::anyhow!(
                "no encoder control attached"
            )));
        };
        encoder
            .force_keyframe(KeyframeRequest::new(self.clock.running_time()))
            .map_err(|e| {
                log::warn!("{} output: keyframe request not delivered: {:#}", kind, e);
                PacerError::Control(e)
            })
    }

    fn drop_sample(&self, raw: &RawSample, reason: DropReason) -> PullOutcome {
        let kind = self.kind();
        self.record(|s| s.on_dropped(kind, reason));
        let dropped = self.stats.snapshot().samples_dropped;
        if dropped % DROP_LOG_INTERVAL == 1 {
            log::debug!(
                "{} output dropped sample at {} ({}), {} dropped so far",
                kind,
                raw.pts,
                reason,
                dropped
            );
        }
        PullOutcome::Dropped(reason)
    }

    fn fail(&self, what: &'static str) -> PacerError {
        log::error!("{} output: {}", self.kind(), what);
        self.lifecycle.close(CloseReason::Internal);
        PacerError::Inconsistent(what)
    }

    fn record(&self, event: impl Fn(&dyn StatsSink)) {
        let local: &dyn StatsSink = &self.stats;
        event(local);
        if let Some(telemetry) = self.telemetry.as_deref() {
            event(telemetry);
        }
    }
}

/// Drives one output from its stage queue until the stream ends, the
/// session closes or the stage goes away.
pub struct OutputTask {
    handle: JoinHandle<()>,
}

impl OutputTask {
    /// Spawns the pull loop. Fails if `output` is already driven by a task.
    pub fn start(output: Arc<Output>, receiver: SampleReceiver) -> Result<Self, PacerError> {
        if output.stage_attached.swap(true, Ordering::AcqRel) {
            return Err(PacerError::StageAttached(output.kind()));
        }
        let handle = tokio::spawn(Self::pull_loop(output, receiver));
        Ok(Self { handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            log::error!("output task failed: {}", e);
        }
    }

    async fn pull_loop(output: Arc<Output>, mut receiver: SampleReceiver) {
        let kind = output.kind();
        let cancel = output.lifecycle.token().clone();
        log::info!("{} output loop started, codec: {}", kind, output.codec());

        loop {
            let cmd = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                cmd = receiver.recv() => cmd,
            };

            match cmd {
                Some(SampleCmd::Data(raw)) => match output.on_sample_pulled(raw).await {
                    Ok(PullOutcome::StreamEnded) => break,
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("{} output stopped: {}", kind, e);
                        break;
                    }
                },
                Some(SampleCmd::EOF) => {
                    output.on_end_of_stream();
                    break;
                }
                Some(SampleCmd::Error(message)) => {
                    output.on_stage_error(&message);
                    break;
                }
                None => {
                    // stage stopped without EOF: a stall, not an error
                    log::debug!("{} output: stage went away", kind);
                    break;
                }
            }
        }

        let stats = output.stats();
        log::info!(
            "{} output loop finished, written: {}, dropped: {}, discarded: {}",
            kind,
            stats.samples_written,
            stats.samples_dropped,
            stats.samples_discarded
        );
    }
}

#[cfg(test)]
#[path = "output_test.rs"]
mod output_test;
