use std::fmt::Display;

use thiserror::Error;

use crate::sample::MediaKind;

#[derive(Debug, Error)]
pub enum PacerError {
    /// The outbound track rejected a sample. The session is closed.
    #[error("track write failed: {0:#}")]
    TrackWrite(anyhow::Error),
    /// A state the output must never reach, e.g. forwarding with no track.
    #[error("internal consistency failure: {0}")]
    Inconsistent(&'static str),
    #[error("keyframe request failed: {0:#}")]
    Control(anyhow::Error),
    #[error("{op} is not supported on {kind} outputs")]
    Unsupported { kind: MediaKind, op: &'static str },
    #[error("{0} output already has a processing stage")]
    StageAttached(MediaKind),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("session closed")]
    Closed,
}

impl PacerError {
    pub fn config(message: impl Display) -> Self {
        Self::Config(message.to_string())
    }

    /// Whether the error terminated the output it came from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TrackWrite(_) | Self::Inconsistent(_))
    }
}
