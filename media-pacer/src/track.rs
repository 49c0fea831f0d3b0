use async_trait::async_trait;

use crate::sample::Sample;

/// Outbound real-time track. Owns each sample once `write_sample` is called.
#[async_trait]
pub trait TrackSink: Send + Sync {
    async fn write_sample(&self, sample: Sample) -> anyhow::Result<()>;
}
