//! Bridge configuration
//!
//! Read once when a session is created; there is no hot reload.
//!
//! ```toml
//! [vad]
//! energy_threshold = 0.03
//! speech_frames = 6
//! silence_frames = 10
//!
//! [media]
//! listen_addr = "0.0.0.0:8090"
//! wire_format = { sample_rate = 16000, channels = 1, bits_per_sample = 16 }
//!
//! [ai]
//! endpoint = "wss://ai.example.com/v1/realtime"
//! model = "models/gemini-2.0-flash-live-001"
//!
//! [timeouts]
//! inactivity_secs = 30
//! ```

use crate::errors::{BridgeError, Result};
use callbridge_ai_copilot::AiConfig;
use callbridge_audio_core::{AudioFormat, FrameCodec, VadConfig};
use callbridge_infra_common::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Environment variable that overrides `ai.api_key`
pub const API_KEY_ENV: &str = "CALLBRIDGE_AI_API_KEY";

/// Complete bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub vad: VadConfig,
    pub media: MediaConfig,
    pub ai: AiConfig,
    pub timeouts: TimeoutConfig,
    pub logging: LoggingConfig,
}

/// Media channel endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Address the media WebSocket server listens on
    pub listen_addr: String,
    /// PCM format on the media channel, fixed for the whole call
    pub wire_format: AudioFormat,
    /// Inbound messages buffered between the socket reader and the coordinator
    pub inbound_buffer_frames: usize,
    /// Outbound audio frames buffered before new ones are dropped
    pub outbound_buffer_frames: usize,
    /// Recent inbound frames replayed to the AI when speech starts
    pub preroll_frames: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8090".to_string(),
            wire_format: AudioFormat::pcm_16khz_mono(),
            inbound_buffer_frames: 100,
            outbound_buffer_frames: 250,
            preroll_frames: 10,
        }
    }
}

/// Session timers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// No audio and no events for this long forces the session closed
    pub inactivity_secs: u64,
    /// Upper bound on connection shutdown once closing starts
    pub close_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            inactivity_secs: 30,
            close_grace_ms: 2_000,
        }
    }
}

impl TimeoutConfig {
    pub fn inactivity(&self) -> Duration {
        Duration::from_secs(self.inactivity_secs)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    /// How often the coordinator checks for inactivity
    pub fn watchdog_interval(&self) -> Duration {
        (self.inactivity() / 4).clamp(Duration::from_millis(50), Duration::from_secs(1))
    }
}

impl BridgeConfig {
    /// Parse from TOML. Missing sections and keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| BridgeError::config(format!("invalid TOML: {}", e)))
    }

    /// Load from a TOML file, apply environment overrides and validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&text)?.with_env_overrides();
        config.validate()?;
        debug!(path = %path.display(), "loaded bridge configuration");
        Ok(config)
    }

    /// Apply `CALLBRIDGE_AI_API_KEY` if set
    pub fn with_env_overrides(self) -> Self {
        self.with_api_key_from(std::env::var(API_KEY_ENV).ok())
    }

    fn with_api_key_from(mut self, key: Option<String>) -> Self {
        if let Some(key) = key.filter(|k| !k.is_empty()) {
            self.ai.api_key = Some(key);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.vad.validate()?;
        self.ai.validate()?;
        FrameCodec::new(self.media.wire_format)?;
        if self.media.inbound_buffer_frames == 0 || self.media.outbound_buffer_frames == 0 {
            return Err(BridgeError::config("media buffers must hold at least one frame"));
        }
        if self.timeouts.inactivity_secs == 0 {
            return Err(BridgeError::config("timeouts.inactivity_secs must be positive"));
        }
        self.logging.parsed_level()?;
        Ok(())
    }
}
