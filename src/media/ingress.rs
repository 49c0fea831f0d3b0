use std::{sync::Arc, time::Duration};

use media_pacer::{
    ClockReference, ClockTime, Output, OutputTask, Session, encoder::ChannelEncoderControl,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    config::IngressConfig,
    media::{stage::SyntheticStage, track::LoggingTrack},
};

/// Wires one audio and one video branch of a [`Session`] to synthetic
/// stages and, after the negotiation delay, to logging tracks.
pub struct Ingress {
    session: Arc<Session>,
    tasks: Vec<OutputTask>,
    stages: Vec<JoinHandle<u64>>,
}

impl Ingress {
    pub fn start(config: &IngressConfig, session: Arc<Session>) -> anyhow::Result<Self> {
        let audio = session.add_audio_output(config.audio_codec()?)?;
        let (control, keyframes) = ChannelEncoderControl::new(session.config().keyframe_queue);
        let video = session.add_video_output(config.video_codec()?, Arc::new(control))?;

        let origin = session.clock().running_time().unwrap_or(ClockTime::ZERO);
        let limit = config.duration_secs().map(Duration::from_secs);
        let track_delay = Duration::from_millis(config.track_delay_ms());
        let cancel = session.lifecycle().token().clone();
        let audio_frame = Duration::from_millis(session.config().audio_frame_ms);
        let frame_rate = session.config().video_frame_rate;

        let branches = [
            (audio, SyntheticStage::audio(audio_frame)),
            (video, SyntheticStage::video(frame_rate, keyframes)),
        ];

        let mut tasks = Vec::new();
        let mut stages = Vec::new();
        for (output, stage) in branches {
            let mut stage = stage.with_origin(origin);
            if let Some(limit) = limit {
                stage = stage.with_limit(limit);
            }

            let (tx, task) = session.attach_stage(&output)?;
            tasks.push(task);
            stages.push(tokio::spawn(stage.run(tx, cancel.clone())));
            negotiate_track(output, track_delay, cancel.clone());
        }

        log::info!(
            "ingress {}: started, tracks ready in {:?}",
            session.id(),
            track_delay
        );
        Ok(Self {
            session,
            tasks,
            stages,
        })
    }

    /// Waits for every stage and output loop. Returns once the session has
    /// closed and all branches have wound down.
    pub async fn join(self) {
        self.session.wait_closed().await;
        for stage in self.stages {
            match stage.await {
                Ok(sent) => log::debug!("ingress {}: stage sent {} samples", self.session.id(), sent),
                Err(e) => log::error!("ingress {}: stage task failed: {}", self.session.id(), e),
            }
        }
        for task in self.tasks {
            task.join().await;
        }
        log::info!(
            "ingress {}: stopped ({})",
            self.session.id(),
            self.session
                .lifecycle()
                .close_reason()
                .map(|r| r.to_string())
                .unwrap_or_default()
        );
    }
}

fn negotiate_track(output: Arc<Output>, delay: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        let name = format!("{}-{}", output.kind(), output.codec());
        output.on_track_ready(Arc::new(LoggingTrack::new(name)));
    });
}
