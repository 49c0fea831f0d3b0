use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{error::PacerError, gate::DEFAULT_BEHIND_THRESHOLD};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacerConfig {
    // samples further behind running time than this are dropped
    pub behind_threshold_ms: u64,
    // discard samples until the outbound track is ready
    pub initial_drop: bool,
    // stage -> output queue, per output
    pub sample_queue: usize,
    // pending keyframe requests per video encoder
    pub keyframe_queue: usize,
    // fallback durations for samples the stage leaves untimed
    pub audio_frame_ms: u64,
    pub video_frame_rate: u32,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            behind_threshold_ms: DEFAULT_BEHIND_THRESHOLD.as_millis() as u64,
            initial_drop: true,
            sample_queue: 64,
            keyframe_queue: 8,
            audio_frame_ms: 20,
            video_frame_rate: 30,
        }
    }
}

impl PacerConfig {
    pub fn with_behind_threshold(mut self, threshold: Duration) -> Self {
        self.behind_threshold_ms = threshold.as_millis() as u64;
        self
    }

    pub fn with_initial_drop(mut self, initial_drop: bool) -> Self {
        self.initial_drop = initial_drop;
        self
    }

    pub fn with_sample_queue(mut self, capacity: usize) -> Self {
        self.sample_queue = capacity;
        self
    }

    pub fn with_audio_frame_duration(mut self, frame: Duration) -> Self {
        self.audio_frame_ms = frame.as_millis() as u64;
        self
    }

    pub fn with_video_frame_rate(mut self, frame_rate: u32) -> Self {
        self.video_frame_rate = frame_rate;
        self
    }

    pub fn behind_threshold(&self) -> Duration {
        Duration::from_millis(self.behind_threshold_ms)
    }

    pub fn validate(&self) -> Result<(), PacerError> {
        if self.behind_threshold_ms == 0 {
            return Err(PacerError::config("behind_threshold_ms must be positive"));
        }
        if self.sample_queue == 0 {
            return Err(PacerError::config("sample_queue must be positive"));
        }
        if self.keyframe_queue == 0 {
            return Err(PacerError::config("keyframe_queue must be positive"));
        }
        if self.audio_frame_ms == 0 {
            return Err(PacerError::config("audio_frame_ms must be positive"));
        }
        if self.video_frame_rate == 0 {
            return Err(PacerError::config("video_frame_rate must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PacerConfig::default();
        assert_eq!(config.behind_threshold(), Duration::from_millis(500));
        assert!(config.initial_drop);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PacerConfig =
            serde_json::from_str(r#"{ "behind_threshold_ms": 250, "initial_drop": false }"#)
                .unwrap();
        assert_eq!(config.behind_threshold(), Duration::from_millis(250));
        assert!(!config.initial_drop);
        assert_eq!(config.sample_queue, PacerConfig::default().sample_queue);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = PacerConfig::default().with_behind_threshold(Duration::ZERO);
        assert!(matches!(config.validate(), Err(PacerError::Config(_))));

        let config = PacerConfig::default().with_sample_queue(0);
        assert!(config.validate().is_err());

        let config = PacerConfig::default().with_video_frame_rate(0);
        assert!(config.validate().is_err());

        let config = PacerConfig::default().with_audio_frame_duration(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
