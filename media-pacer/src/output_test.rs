// ============================================================================
// Output Tests
// ============================================================================

use std::{
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;

use super::{AudioAssembly, Output, OutputTask, PullOutcome, SampleAssembly, VideoAssembly};
use crate::{
    clock::{ClockReference, ClockTime, Segment},
    config::PacerConfig,
    error::PacerError,
    gate::DropReason,
    lifecycle::{CloseReason, Lifecycle},
    sample::{Codec, MediaKind, RawSample, SampleCmd},
    stats::StatsSink,
    testing::{ManualClock, RecordingEncoder, RecordingTrack},
};

const NOW_MS: i64 = 10_000;

fn ms(v: i64) -> ClockTime {
    ClockTime::from_millis(v)
}

fn raw_at(pts_ms: i64) -> RawSample {
    RawSample::new(vec![0u8; 100], ms(pts_ms)).with_duration(Duration::from_millis(33))
}

fn video_output(clock: &Arc<ManualClock>, config: &PacerConfig) -> (Arc<Lifecycle>, Output) {
    let lifecycle = Arc::new(Lifecycle::new(clock.clone()));
    let output = Output::new(
        Box::new(VideoAssembly::new(Codec::H264)),
        clock.clone(),
        Arc::clone(&lifecycle),
        config,
    );
    (lifecycle, output)
}

fn ready_video_output() -> (Arc<ManualClock>, Arc<Lifecycle>, Output, Arc<RecordingTrack>) {
    let clock = ManualClock::at(ms(NOW_MS));
    let (lifecycle, output) = video_output(&clock, &PacerConfig::default());
    let track = RecordingTrack::new();
    output.on_track_ready(track.clone());
    (clock, lifecycle, output, track)
}

// ------------------------------------------------------------------------
// Drop phase
// ------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_drop_phase_discards_until_track_ready() {
    let clock = ManualClock::at(ms(NOW_MS));
    let (_lifecycle, output) = video_output(&clock, &PacerConfig::default());
    let track = RecordingTrack::new();
    assert!(output.in_drop_phase());

    for pts in [NOW_MS - 700, NOW_MS, NOW_MS + 40] {
        let outcome = output.on_sample_pulled(raw_at(pts)).await.unwrap();
        assert_eq!(outcome, PullOutcome::Discarded);
    }
    assert_eq!(track.attempts(), 0);
    assert_eq!(output.stats().samples_discarded, 3);
    assert_eq!(output.stats().loss_events, 0);

    output.on_track_ready(track.clone());
    assert!(!output.in_drop_phase());
    assert!(output.has_track());

    let outcome = output.on_sample_pulled(raw_at(NOW_MS)).await.unwrap();
    assert_eq!(outcome, PullOutcome::Delivered { bytes: 100 });
    assert_eq!(track.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_next_sample_after_track_ready_goes_through_gate() {
    let clock = ManualClock::at(ms(NOW_MS));
    let (_lifecycle, output) = video_output(&clock, &PacerConfig::default());
    output.on_track_ready(RecordingTrack::new());

    let outcome = output.on_sample_pulled(raw_at(NOW_MS - 900)).await.unwrap();
    assert_eq!(outcome, PullOutcome::Dropped(DropReason::Late));
}

#[tokio::test(start_paused = true)]
async fn test_track_replacement_is_last_write_wins() {
    let (_clock, _lifecycle, output, first) = ready_video_output();
    let second = RecordingTrack::new();
    output.on_track_ready(second.clone());
    assert!(!output.in_drop_phase());

    output.on_sample_pulled(raw_at(NOW_MS)).await.unwrap();
    assert_eq!(first.attempts(), 0);
    assert_eq!(second.attempts(), 1);
}

// ------------------------------------------------------------------------
// Pacing
// ------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_dispositions_around_running_time() {
    let (_clock, _lifecycle, output, track) = ready_video_output();
    let started = tokio::time::Instant::now();

    let mut outcomes = Vec::new();
    for rel in [-600, -100, 0, 50] {
        outcomes.push(output.on_sample_pulled(raw_at(NOW_MS + rel)).await.unwrap());
    }

    assert_eq!(outcomes[0], PullOutcome::Dropped(DropReason::Late));
    for outcome in &outcomes[1..] {
        assert_eq!(*outcome, PullOutcome::Delivered { bytes: 100 });
    }
    // held 100ms for the late sample, nothing for the on-time one, 50ms ahead
    assert!(started.elapsed() >= Duration::from_millis(150));

    let written: Vec<ClockTime> = track.written().iter().map(|s| s.pts()).collect();
    assert_eq!(written, vec![ms(NOW_MS - 100), ms(NOW_MS), ms(NOW_MS + 50)]);
    assert_eq!(output.stats().loss_events, 1);
}

#[tokio::test(start_paused = true)]
async fn test_each_late_sample_counts_one_loss() {
    let (_clock, _lifecycle, output, track) = ready_video_output();

    for (i, behind) in [501, 750, 2_000, 60_000].into_iter().enumerate() {
        let outcome = output.on_sample_pulled(raw_at(NOW_MS - behind)).await.unwrap();
        assert_eq!(outcome, PullOutcome::Dropped(DropReason::Late));
        assert_eq!(output.stats().loss_events, i as u64 + 1);
    }
    assert_eq!(track.attempts(), 0);
    assert_eq!(output.stats().samples_dropped, 4);
}

#[tokio::test(start_paused = true)]
async fn test_accepted_samples_keep_pull_order() {
    let (_clock, _lifecycle, output, track) = ready_video_output();
    let pulled = [-300, -2_000, 0, 10, 20, -5_000, 40, 80];

    for rel in pulled {
        output.on_sample_pulled(raw_at(NOW_MS + rel)).await.unwrap();
    }

    let written: Vec<ClockTime> = track.written().iter().map(|s| s.pts()).collect();
    let expected: Vec<ClockTime> = pulled
        .into_iter()
        .filter(|rel| *rel >= -500)
        .map(|rel| ms(NOW_MS + rel))
        .collect();
    assert_eq!(written, expected);
}

#[tokio::test(start_paused = true)]
async fn test_segment_maps_stage_timestamps() {
    let (_clock, _lifecycle, output, track) = ready_video_output();
    // stage restarted its timestamps at zero after NOW_MS of playback
    let segment = Segment::new().with_base(ms(NOW_MS));

    let outcome = output
        .on_sample_pulled(raw_at(20).with_segment(segment))
        .await
        .unwrap();
    assert_eq!(outcome, PullOutcome::Delivered { bytes: 100 });
    assert_eq!(track.written()[0].pts(), ms(NOW_MS + 20));

    let outcome = output
        .on_sample_pulled(raw_at(20).with_segment(segment.with_stop(ms(10))))
        .await
        .unwrap();
    assert_eq!(outcome, PullOutcome::Dropped(DropReason::OutOfSegment));
}

#[tokio::test(start_paused = true)]
async fn test_missing_clock_base_drops_with_loss() {
    let clock = ManualClock::unstarted();
    let (_lifecycle, output) = video_output(&clock, &PacerConfig::default());
    let track = RecordingTrack::new();
    output.on_track_ready(track.clone());

    let outcome = output.on_sample_pulled(raw_at(0)).await.unwrap();
    assert_eq!(outcome, PullOutcome::Dropped(DropReason::NoClockBase));
    assert_eq!(output.stats().loss_events, 1);
    assert_eq!(track.attempts(), 0);

    clock.set(ms(0));
    let outcome = output.on_sample_pulled(raw_at(0)).await.unwrap();
    assert_eq!(outcome, PullOutcome::Delivered { bytes: 100 });
}

// ------------------------------------------------------------------------
// Shutdown
// ------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_close_while_waiting_drops_sample() {
    let (clock, lifecycle, output, track) = ready_video_output();
    let output = Arc::new(output);

    let pending = {
        let output = Arc::clone(&output);
        tokio::spawn(async move { output.on_sample_pulled(raw_at(NOW_MS + 10_000)).await })
    };
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }
    assert!(!pending.is_finished());

    let started = tokio::time::Instant::now();
    assert!(output.close());
    let outcome = pending.await.unwrap().unwrap();

    assert_eq!(outcome, PullOutcome::StreamEnded);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(track.attempts(), 0);
    assert_eq!(output.stats().samples_dropped, 1);
    assert_eq!(output.stats().loss_events, 0);
    assert_eq!(clock.releases(), 1);
    assert_eq!(lifecycle.close_reason(), Some(CloseReason::Explicit));
}

#[tokio::test(start_paused = true)]
async fn test_closed_output_reports_stream_ended() {
    let (clock, _lifecycle, output, track) = ready_video_output();
    assert!(output.close());
    assert!(!output.close());

    let outcome = output.on_sample_pulled(raw_at(NOW_MS)).await.unwrap();
    assert!(outcome.is_stream_ended());
    assert_eq!(track.attempts(), 0);
    assert_eq!(clock.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_forward_without_track_is_internal_error() {
    let clock = ManualClock::at(ms(NOW_MS));
    let config = PacerConfig::default().with_initial_drop(false);
    let (lifecycle, output) = video_output(&clock, &config);

    let err = output.on_sample_pulled(raw_at(NOW_MS)).await.unwrap_err();
    assert!(matches!(err, PacerError::Inconsistent(_)));
    assert!(err.is_fatal());
    assert!(output.is_closed());
    assert_eq!(lifecycle.close_reason(), Some(CloseReason::Internal));
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_closes_output() {
    let clock = ManualClock::at(ms(NOW_MS));
    let (lifecycle, output) = video_output(&clock, &PacerConfig::default());
    let track = RecordingTrack::failing_on(1);
    output.on_track_ready(track.clone());

    let err = output.on_sample_pulled(raw_at(NOW_MS)).await.unwrap_err();
    assert!(matches!(err, PacerError::TrackWrite(_)));
    assert!(err.to_string().contains("peer connection closed"));
    assert_eq!(lifecycle.close_reason(), Some(CloseReason::TrackWriteFailed));
    assert_eq!(clock.releases(), 1);
}

// ------------------------------------------------------------------------
// OutputTask
// ------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_task_stops_after_failed_write() {
    let clock = ManualClock::at(ms(NOW_MS));
    let (lifecycle, output) = video_output(&clock, &PacerConfig::default());
    let track = RecordingTrack::failing_on(3);
    output.on_track_ready(track.clone());
    let output = Arc::new(output);

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    for i in 0..5 {
        tx.send(SampleCmd::Data(raw_at(NOW_MS + i))).await.unwrap();
    }
    let task = OutputTask::start(Arc::clone(&output), rx).unwrap();
    task.join().await;

    assert_eq!(track.attempts(), 3);
    assert_eq!(track.written().len(), 2);
    assert_eq!(lifecycle.close_reason(), Some(CloseReason::TrackWriteFailed));
    assert!(tx.send(SampleCmd::Data(raw_at(NOW_MS))).await.is_err());

    let outcome = output.on_sample_pulled(raw_at(NOW_MS + 5)).await.unwrap();
    assert_eq!(outcome, PullOutcome::StreamEnded);
    assert_eq!(track.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_task_closes_on_end_of_stream() {
    let (clock, lifecycle, output, track) = ready_video_output();
    let output = Arc::new(output);
    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let task = OutputTask::start(Arc::clone(&output), rx).unwrap();

    tx.send(SampleCmd::Data(raw_at(NOW_MS))).await.unwrap();
    tx.send(SampleCmd::EOF).await.unwrap();
    task.join().await;

    assert_eq!(track.attempts(), 1);
    assert_eq!(lifecycle.close_reason(), Some(CloseReason::EndOfStream));
    assert_eq!(clock.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_task_closes_on_stage_error() {
    let (_clock, lifecycle, output, _track) = ready_video_output();
    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let task = OutputTask::start(Arc::new(output), rx).unwrap();

    tx.send(SampleCmd::Error("encoder crashed".to_string()))
        .await
        .unwrap();
    task.join().await;
    assert_eq!(lifecycle.close_reason(), Some(CloseReason::StageError));
}

#[tokio::test(start_paused = true)]
async fn test_task_treats_silent_stage_as_stall() {
    let (clock, lifecycle, output, _track) = ready_video_output();
    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let task = OutputTask::start(Arc::new(output), rx).unwrap();

    drop(tx);
    task.join().await;
    assert!(!lifecycle.is_closed());
    assert_eq!(clock.releases(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_task_exits_on_session_close() {
    let (_clock, lifecycle, output, _track) = ready_video_output();
    let (_tx, rx) = tokio::sync::mpsc::channel(8);
    let task = OutputTask::start(Arc::new(output), rx).unwrap();

    tokio::task::yield_now().await;
    assert!(!task.is_finished());
    lifecycle.close(CloseReason::Explicit);
    task.join().await;
}

/// Clock that closes its session while a sample is being mapped onto it, so
/// the close lands after the pull's own closed check.
struct ClosingClock {
    now: Mutex<Option<ClockTime>>,
    lifecycle: OnceLock<Arc<Lifecycle>>,
}

impl ClockReference for ClosingClock {
    fn running_time(&self) -> Option<ClockTime> {
        *self.now.lock()
    }

    fn to_running_time(&self, segment: &Segment, pts: ClockTime) -> Option<ClockTime> {
        if let Some(lifecycle) = self.lifecycle.get() {
            lifecycle.close(CloseReason::Explicit);
        }
        segment.to_running_time(pts)
    }

    fn release(&self) {
        *self.now.lock() = None;
    }
}

#[tokio::test(start_paused = true)]
async fn test_close_racing_a_pull_ends_stream_without_loss() {
    let clock = Arc::new(ClosingClock {
        now: Mutex::new(Some(ms(NOW_MS))),
        lifecycle: OnceLock::new(),
    });
    let lifecycle = Arc::new(Lifecycle::new(clock.clone()));
    let _ = clock.lifecycle.set(Arc::clone(&lifecycle));
    let output = Output::new(
        Box::new(VideoAssembly::new(Codec::H264)),
        clock.clone(),
        Arc::clone(&lifecycle),
        &PacerConfig::default(),
    );
    let track = RecordingTrack::new();
    output.on_track_ready(track.clone());

    let outcome = output.on_sample_pulled(raw_at(NOW_MS)).await.unwrap();
    assert_eq!(outcome, PullOutcome::StreamEnded);
    assert!(lifecycle.is_closed());

    let stats = output.stats();
    assert_eq!(stats.samples_dropped, 1);
    assert_eq!(stats.loss_events, 0);
    assert_eq!(track.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_output_accepts_one_pull_task() {
    let (_clock, lifecycle, output, _track) = ready_video_output();
    let output = Arc::new(output);
    let (_tx, rx) = tokio::sync::mpsc::channel(8);
    let task = OutputTask::start(Arc::clone(&output), rx).unwrap();

    let (_tx2, rx2) = tokio::sync::mpsc::channel(8);
    assert!(matches!(
        OutputTask::start(Arc::clone(&output), rx2),
        Err(PacerError::StageAttached(MediaKind::Video))
    ));
    assert!(!lifecycle.is_closed());

    lifecycle.close(CloseReason::Explicit);
    task.join().await;
}

// ------------------------------------------------------------------------
// Keyframe requests
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_keyframe_request_reaches_encoder() {
    let clock = ManualClock::at(ms(NOW_MS));
    let (_lifecycle, output) = video_output(&clock, &PacerConfig::default());
    let encoder = RecordingEncoder::new();
    let output = output.with_encoder(encoder.clone());

    output.request_keyframe().unwrap();
    let requests = encoder.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].all_headers);
    assert_eq!(requests[0].running_time, Some(ms(NOW_MS)));
    assert_eq!(output.stats().keyframe_requests, 1);
}

#[tokio::test]
async fn test_keyframe_failure_keeps_output_open() {
    let clock = ManualClock::at(ms(NOW_MS));
    let (lifecycle, output) = video_output(&clock, &PacerConfig::default());
    let output = output.with_encoder(RecordingEncoder::rejecting());

    let err = output.request_keyframe().unwrap_err();
    assert!(matches!(err, PacerError::Control(_)));
    assert!(!err.is_fatal());
    assert!(!lifecycle.is_closed());
    assert_eq!(output.stats().keyframe_requests, 1);
}

#[tokio::test]
async fn test_keyframe_without_encoder_is_reported() {
    let clock = ManualClock::at(ms(NOW_MS));
    let (_lifecycle, output) = video_output(&clock, &PacerConfig::default());
    assert!(matches!(
        output.request_keyframe(),
        Err(PacerError::Control(_))
    ));
}

#[tokio::test]
async fn test_keyframe_on_audio_is_unsupported() {
    let clock = ManualClock::at(ms(NOW_MS));
    let lifecycle = Arc::new(Lifecycle::new(clock.clone()));
    let output = Output::new(
        Box::new(AudioAssembly::new(Codec::Opus)),
        clock.clone(),
        lifecycle,
        &PacerConfig::default(),
    );

    let err = output.request_keyframe().unwrap_err();
    assert!(matches!(
        err,
        PacerError::Unsupported {
            kind: MediaKind::Audio,
            ..
        }
    ));
    assert_eq!(output.stats().keyframe_requests, 0);
}

// ------------------------------------------------------------------------
// Assembly and telemetry
// ------------------------------------------------------------------------

#[test]
fn test_audio_assembly_fills_duration() {
    let assembly = AudioAssembly::new(Codec::Opus);
    let sample = assembly.assemble(RawSample::new(vec![1, 2, 3], ms(0)), ms(40));
    assert_eq!(sample.duration(), Duration::from_millis(20));
    assert_eq!(sample.pts(), ms(40));
    assert!(sample.is_key());

    let assembly = AudioAssembly::new(Codec::Pcmu).with_frame_duration(Duration::from_millis(10));
    let sample = assembly.assemble(RawSample::new(vec![0; 80], ms(0)), ms(0));
    assert_eq!(sample.duration(), Duration::from_millis(10));
}

#[test]
fn test_video_assembly_marks_keyframes() {
    let assembly = VideoAssembly::new(Codec::Vp8).with_frame_rate(25, 1);
    let key = assembly.assemble(RawSample::new(vec![0; 10], ms(0)), ms(0));
    assert!(key.is_key());
    assert_eq!(key.duration(), Duration::from_millis(40));

    let delta = assembly.assemble(
        RawSample::new(vec![0; 10], ms(40))
            .with_delta(true)
            .with_duration(Duration::from_millis(41)),
        ms(40),
    );
    assert!(!delta.is_key());
    assert_eq!(delta.duration(), Duration::from_millis(41));
}

#[derive(Default)]
struct CountingSink {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl StatsSink for CountingSink {
    fn on_delivered(&self, _kind: MediaKind, bytes: usize) {
        self.delivered.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn on_dropped(&self, _kind: MediaKind, _reason: DropReason) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn on_discarded(&self, _kind: MediaKind) {}

    fn on_keyframe_requested(&self, _kind: MediaKind) {}
}

#[tokio::test(start_paused = true)]
async fn test_telemetry_receives_events() {
    let clock = ManualClock::at(ms(NOW_MS));
    let (_lifecycle, output) = video_output(&clock, &PacerConfig::default());
    let sink = Arc::new(CountingSink::default());
    let output = output.with_telemetry(sink.clone());
    output.on_track_ready(RecordingTrack::new());

    output.on_sample_pulled(raw_at(NOW_MS)).await.unwrap();
    output.on_sample_pulled(raw_at(NOW_MS - 5_000)).await.unwrap();

    assert_eq!(sink.delivered.load(Ordering::Relaxed), 100);
    assert_eq!(sink.dropped.load(Ordering::Relaxed), 1);
}
