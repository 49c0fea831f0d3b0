use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;

use crate::{
    clock::{ClockReference, SystemClock},
    config::PacerConfig,
    encoder::EncoderControl,
    error::PacerError,
    lifecycle::{CloseReason, Lifecycle},
    output::{AudioAssembly, Output, OutputTask, SampleAssembly, VideoAssembly},
    sample::{Codec, MediaKind, SampleSender},
    stats::{StatsSink, StatsSnapshot},
};

/// Outputs of one ingress sharing a clock and a close-once lifecycle.
pub struct Session {
    id: String,
    config: PacerConfig,
    clock: Arc<dyn ClockReference>,
    lifecycle: Arc<Lifecycle>,
    outputs: Mutex<Vec<Arc<Output>>>,
    telemetry: Option<Arc<dyn StatsSink>>,
}

impl Session {
    /// Session on a system clock whose base time is now.
    pub fn new(id: &str, config: PacerConfig) -> Result<Self, PacerError> {
        Self::with_clock(id, config, Arc::new(SystemClock::started()))
    }

    pub fn with_clock(
        id: &str,
        config: PacerConfig,
        clock: Arc<dyn ClockReference>,
    ) -> Result<Self, PacerError> {
        config.validate()?;
        log::info!(
            "session {} created, behind threshold: {:?}, initial drop: {}",
            id,
            config.behind_threshold(),
            config.initial_drop
        );
        Ok(Self {
            id: id.to_string(),
            lifecycle: Arc::new(Lifecycle::new(Arc::clone(&clock))),
            clock,
            config,
            outputs: Mutex::new(Vec::new()),
            telemetry: None,
        })
    }

    /// Fans every output's statistics out to `telemetry` as well.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn StatsSink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &PacerConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn ClockReference> {
        &self.clock
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub fn add_audio_output(&self, codec: Codec) -> Result<Arc<Output>, PacerError> {
        if codec.kind() != MediaKind::Audio {
            return Err(PacerError::config(format!("{} is not an audio codec", codec)));
        }
        let assembly = AudioAssembly::new(codec)
            .with_frame_duration(Duration::from_millis(self.config.audio_frame_ms));
        self.add_output(Box::new(assembly), None)
    }

    pub fn add_video_output(
        &self,
        codec: Codec,
        encoder: Arc<dyn EncoderControl>,
    ) -> Result<Arc<Output>, PacerError> {
        if codec.kind() != MediaKind::Video {
            return Err(PacerError::config(format!("{} is not a video codec", codec)));
        }
        let assembly =
            VideoAssembly::new(codec).with_frame_rate(self.config.video_frame_rate, 1);
        self.add_output(Box::new(assembly), Some(encoder))
    }

    /// Adds an output with a custom assembly. At most one output per media kind.
    pub fn add_output(
        &self,
        assembly: Box<dyn SampleAssembly>,
        encoder: Option<Arc<dyn EncoderControl>>,
    ) -> Result<Arc<Output>, PacerError> {
        if self.lifecycle.is_closed() {
            return Err(PacerError::Closed);
        }

        let kind = assembly.kind();
        let codec = assembly.codec();
        let mut outputs = self.outputs.lock();
        if outputs.iter().any(|o| o.kind() == kind) {
            return Err(PacerError::config(format!("{} output already exists", kind)));
        }

        let mut output = Output::new(
            assembly,
            Arc::clone(&self.clock),
            Arc::clone(&self.lifecycle),
            &self.config,
        );
        if let Some(encoder) = encoder {
            output = output.with_encoder(encoder);
        }
        if let Some(telemetry) = self.telemetry.as_ref() {
            output = output.with_telemetry(Arc::clone(telemetry));
        }

        let output = Arc::new(output);
        outputs.push(Arc::clone(&output));
        log::info!("session {}: {} output added ({})", self.id, kind, codec);
        Ok(output)
    }

    pub fn output(&self, kind: MediaKind) -> Option<Arc<Output>> {
        self.outputs.lock().iter().find(|o| o.kind() == kind).cloned()
    }

    pub fn outputs(&self) -> Vec<Arc<Output>> {
        self.outputs.lock().clone()
    }

    /// Connects a processing stage to `output`: returns the sender the stage
    /// pushes into and the task pulling from it. An output takes one stage.
    pub fn attach_stage(
        &self,
        output: &Arc<Output>,
    ) -> Result<(SampleSender, OutputTask), PacerError> {
        let (tx, rx) = tokio::sync::mpsc::channel(self.config.sample_queue);
        let task = OutputTask::start(Arc::clone(output), rx)?;
        Ok((tx, task))
    }

    pub fn stats(&self) -> Vec<(MediaKind, StatsSnapshot)> {
        self.outputs
            .lock()
            .iter()
            .map(|o| (o.kind(), o.stats()))
            .collect()
    }

    pub fn request_keyframe(&self) -> Result<(), PacerError> {
        match self.output(MediaKind::Video) {
            Some(output) => output.request_keyframe(),
            None => Err(PacerError::Control(anyhow::anyhow!(
                "session {} has no video output",
                self.id
            ))),
        }
    }

    pub fn close(&self) -> bool {
        self.lifecycle.close(CloseReason::Explicit)
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    pub async fn wait_closed(&self) {
        self.lifecycle.closed().await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
