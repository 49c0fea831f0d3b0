use std::time::Duration;

use bytes::Bytes;
use media_pacer::{
    ClockTime, MediaKind, RawSample, SampleCmd,
    encoder::{KeyframeReceiver, take_keyframe_request},
    sample::SampleSender,
};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const AUDIO_PAYLOAD: usize = 160;
const VIDEO_PAYLOAD: usize = 1200;
const KEYFRAME_SCALE: usize = 4;

/// Stand-in for an upstream encoder: emits fixed-size samples at a steady
/// rate, timestamped on the session's running time.
pub struct SyntheticStage {
    kind: MediaKind,
    interval: Duration,
    payload: usize,
    // frames between forced keyframes
    gop: u64,
    keyframes: Option<KeyframeReceiver>,
    origin: ClockTime,
    limit: Option<Duration>,
}

impl SyntheticStage {
    pub fn audio(frame: Duration) -> Self {
        Self {
            kind: MediaKind::Audio,
            interval: frame.max(Duration::from_millis(1)),
            payload: AUDIO_PAYLOAD,
            gop: 1,
            keyframes: None,
            origin: ClockTime::ZERO,
            limit: None,
        }
    }

    pub fn video(frame_rate: u32, keyframes: KeyframeReceiver) -> Self {
        let frame_rate = frame_rate.max(1);
        Self {
            kind: MediaKind::Video,
            interval: Duration::from_secs(1) / frame_rate,
            payload: VIDEO_PAYLOAD,
            gop: frame_rate as u64 * 2,
            keyframes: Some(keyframes),
            origin: ClockTime::ZERO,
            limit: None,
        }
    }

    /// Running time of the first sample.
    pub fn with_origin(mut self, origin: ClockTime) -> Self {
        self.origin = origin;
        self
    }

    /// Signals end of stream once `limit` has elapsed.
    pub fn with_limit(mut self, limit: Duration) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Produces until cancelled, the limit is reached or the output stops
    /// pulling. Returns the number of samples handed over.
    pub async fn run(mut self, tx: SampleSender, cancel: CancellationToken) -> u64 {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut frame = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.limit.is_some_and(|limit| started.elapsed() >= limit) {
                log::info!("{} stage: limit reached after {} samples", self.kind, frame);
                let _ = tx.send(SampleCmd::EOF).await;
                break;
            }

            let sample = self.next_sample(frame);
            if tx.send(SampleCmd::Data(sample)).await.is_err() {
                log::debug!("{} stage: output stopped pulling", self.kind);
                break;
            }
            frame += 1;
        }
        frame
    }

    fn next_sample(&mut self, frame: u64) -> RawSample {
        let offset = self.interval.as_nanos() as i64 * frame as i64;
        let pts = ClockTime::from_nanos(self.origin.nanos().saturating_add(offset));

        let requested = self
            .keyframes
            .as_mut()
            .and_then(take_keyframe_request)
            .is_some();
        if requested {
            log::debug!("{} stage: keyframe forced at frame {}", self.kind, frame);
        }
        let is_key = match self.kind {
            MediaKind::Audio => true,
            MediaKind::Video => requested || frame % self.gop == 0,
        };

        let size = match (self.kind, is_key) {
            (MediaKind::Video, true) => self.payload * KEYFRAME_SCALE,
            _ => self.payload,
        };
        RawSample::new(Bytes::from(vec![frame as u8; size]), pts)
            .with_duration(self.interval)
            .with_delta(!is_key)
    }
}
