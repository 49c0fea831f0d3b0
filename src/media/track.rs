use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use media_pacer::{Sample, TrackSink};

const LOG_EVERY: u64 = 250;

/// Terminal track for the demo ingress: counts what it is given and logs a
/// line every few hundred samples.
pub struct LoggingTrack {
    name: String,
    samples: AtomicU64,
    bytes: AtomicU64,
    keyframes: AtomicU64,
}

impl LoggingTrack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            samples: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            keyframes: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn keyframes(&self) -> u64 {
        self.keyframes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TrackSink for LoggingTrack {
    async fn write_sample(&self, sample: Sample) -> anyhow::Result<()> {
        let n = self.samples.fetch_add(1, Ordering::Relaxed) + 1;
        self.bytes.fetch_add(sample.size() as u64, Ordering::Relaxed);
        if sample.is_key() {
            self.keyframes.fetch_add(1, Ordering::Relaxed);
        }
        if n % LOG_EVERY == 1 {
            log::debug!(
                "{}: sample #{} pts {} duration {:?} size {} key {}",
                self.name,
                n,
                sample.pts(),
                sample.duration(),
                sample.size(),
                sample.is_key()
            );
        }
        Ok(())
    }
}

impl Drop for LoggingTrack {
    fn drop(&mut self) {
        log::info!(
            "{}: closed after {} samples, {} bytes, {} keyframes",
            self.name(),
            self.samples(),
            self.bytes(),
            self.keyframes()
        );
    }
}
