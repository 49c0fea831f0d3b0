use std::sync::LazyLock;

use media_pacer::{Codec, PacerConfig};
use serde::Deserialize;

/// Env var naming an optional JSON config file.
pub const CONFIG_ENV: &str = "LITE_INGRESS_CONFIG";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    listen: String,
    pacer: PacerConfig,
    audio_codec: String,
    video_codec: String,
    // simulated transport negotiation before tracks become ready
    track_delay_ms: u64,
    // None = run until ctrl+c
    duration_secs: Option<u64>,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            pacer: PacerConfig::default(),
            audio_codec: "opus".to_string(),
            video_codec: "h264".to_string(),
            track_delay_ms: 500,
            duration_secs: None,
        }
    }
}

impl IngressConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = match std::env::var(CONFIG_ENV) {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("read config {}: {}", path, e))?;
                Self::from_json(&raw)?
            }
            Err(_) => Self::default(),
        };
        config.pacer.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn listen(&self) -> &str {
        &self.listen
    }

    pub fn pacer(&self) -> &PacerConfig {
        &self.pacer
    }

    pub fn audio_codec(&self) -> anyhow::Result<Codec> {
        Ok(self.audio_codec.parse()?)
    }

    pub fn video_codec(&self) -> anyhow::Result<Codec> {
        Ok(self.video_codec.parse()?)
    }

    pub fn track_delay_ms(&self) -> u64 {
        self.track_delay_ms
    }

    pub fn duration_secs(&self) -> Option<u64> {
        self.duration_secs
    }
}

pub fn config() -> &'static IngressConfig {
    static CONFIG: LazyLock<IngressConfig> = LazyLock::new(|| {
        IngressConfig::load().unwrap_or_else(|e| {
            eprintln!("Error loading config: {:#}", e);
            std::process::exit(1);
        })
    });
    &CONFIG
}
