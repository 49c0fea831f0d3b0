use crate::clock::ClockTime;

/// Upstream control event asking the encoder for a self-contained frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyframeRequest {
    // re-send parameter sets (SPS/PPS) with the frame
    pub all_headers: bool,
    // running time at which the request was made, if the clock had a base
    pub running_time: Option<ClockTime>,
}

impl KeyframeRequest {
    pub fn new(running_time: Option<ClockTime>) -> Self {
        Self {
            all_headers: true,
            running_time,
        }
    }
}

/// One-way control path into an encoder owned by the processing stage.
/// `Ok` means the request was accepted for delivery, not that a keyframe
/// has been produced.
pub trait EncoderControl: Send + Sync {
    fn force_keyframe(&self, request: KeyframeRequest) -> anyhow::Result<()>;
}

pub type KeyframeReceiver = tokio::sync::mpsc::Receiver<KeyframeRequest>;

/// Encoder control delivering requests over a bounded channel. Never blocks:
/// a full queue is reported as an error to the requester.
pub struct ChannelEncoderControl {
    tx: tokio::sync::mpsc::Sender<KeyframeRequest>,
}

impl ChannelEncoderControl {
    pub fn new(capacity: usize) -> (Self, KeyframeReceiver) {
        let (tx, rx) = tokio::sync::mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EncoderControl for ChannelEncoderControl {
    fn force_keyframe(&self, request: KeyframeRequest) -> anyhow::Result<()> {
        use tokio::sync::mpsc::error::TrySendError;

        self.tx.try_send(request).map_err(|e| match e {
            TrySendError::Full(_) => anyhow::anyhow!("encoder control queue full"),
            TrySendError::Closed(_) => anyhow::anyhow!("encoder is gone"),
        })
    }
}

/// Drains every queued request and returns the latest one. Meant for the
/// encoder side of a [`ChannelEncoderControl`]; `Some` means the next frame
/// should be a keyframe.
pub fn take_keyframe_request(rx: &mut KeyframeReceiver) -> Option<KeyframeRequest> {
    let mut latest = None;
    while let Ok(request) = rx.try_recv() {
        latest = Some(request);
    }
    latest
}
