use std::{
    fmt::{Display, Formatter},
    str::FromStr,
    time::Duration,
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    clock::{ClockTime, Segment},
    error::PacerError,
};

pub type SampleSender = tokio::sync::mpsc::Sender<SampleCmd>;
pub type SampleReceiver = tokio::sync::mpsc::Receiver<SampleCmd>;

/// What a processing stage hands to an output: one finished unit, the end of
/// the stream, or an explicit failure.
pub enum SampleCmd {
    Data(RawSample),
    EOF,
    Error(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Opus,
    Pcmu,
    Pcma,
    H264,
    Vp8,
    Vp9,
    Av1,
}

impl Codec {
    pub fn kind(&self) -> MediaKind {
        match self {
            Codec::Opus | Codec::Pcmu | Codec::Pcma => MediaKind::Audio,
            Codec::H264 | Codec::Vp8 | Codec::Vp9 | Codec::Av1 => MediaKind::Video,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Codec::Opus => "audio/opus",
            Codec::Pcmu => "audio/PCMU",
            Codec::Pcma => "audio/PCMA",
            Codec::H264 => "video/H264",
            Codec::Vp8 => "video/VP8",
            Codec::Vp9 => "video/VP9",
            Codec::Av1 => "video/AV1",
        }
    }
}

impl Display for Codec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mime_type())
    }
}

impl FromStr for Codec {
    type Err = PacerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.rsplit('/').next().unwrap_or(s).to_ascii_lowercase();
        match name.as_str() {
            "opus" => Ok(Codec::Opus),
            "pcmu" => Ok(Codec::Pcmu),
            "pcma" => Ok(Codec::Pcma),
            "h264" => Ok(Codec::H264),
            "vp8" => Ok(Codec::Vp8),
            "vp9" => Ok(Codec::Vp9),
            "av1" => Ok(Codec::Av1),
            _ => Err(PacerError::config(format!("unknown codec: {}", s))),
        }
    }
}

/// Finished unit as delivered by the processing stage, before timing has
/// been resolved.
#[derive(Clone, Debug)]
pub struct RawSample {
    pub data: Bytes,
    // None = let the output derive it from the codec
    pub duration: Option<Duration>,
    // stage-relative, interpreted through `segment`
    pub pts: ClockTime,
    pub segment: Segment,
    pub is_delta: bool,
}

impl RawSample {
    pub fn new(data: impl Into<Bytes>, pts: ClockTime) -> Self {
        Self {
            data: data.into(),
            duration: None,
            pts,
            segment: Segment::default(),
            is_delta: false,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segment = segment;
        self
    }

    pub fn with_delta(mut self, is_delta: bool) -> Self {
        self.is_delta = is_delta;
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Encoded unit ready for the outbound track. `pts` is running time.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    data: Bytes,
    duration: Duration,
    pts: ClockTime,
    is_key: bool,
}

impl Sample {
    pub fn new(data: Bytes, duration: Duration, pts: ClockTime, is_key: bool) -> Self {
        Self {
            data,
            duration,
            pts,
            is_key,
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn pts(&self) -> ClockTime {
        self.pts
    }

    pub fn is_key(&self) -> bool {
        self.is_key
    }
}
