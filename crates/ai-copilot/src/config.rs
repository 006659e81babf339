//! Connection parameters for the AI endpoint

use crate::error::{AiError, Result};
use crate::retry::RetryPolicy;
use callbridge_audio_core::AudioFormat;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Endpoint, credentials and audio formats for the AI streaming connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// WebSocket URL of the realtime endpoint
    pub endpoint: String,
    /// Bearer credential; usually injected from the environment
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub voice: Option<String>,
    /// System instruction sent with the setup message
    pub instructions: Option<String>,
    /// Format the endpoint expects for caller audio
    pub input_format: AudioFormat,
    /// Format the endpoint produces for assistant audio
    pub output_format: AudioFormat,
    /// Deadline for connect plus setup acknowledgement
    pub setup_timeout_ms: u64,
    /// Outbound audio frames buffered before the oldest is dropped
    pub send_buffer_frames: usize,
    pub retry: RetryPolicy,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:9000/v1/realtime".to_string(),
            api_key: None,
            model: "models/gemini-2.0-flash-live-001".to_string(),
            voice: None,
            instructions: None,
            input_format: AudioFormat::pcm_16khz_mono(),
            output_format: AudioFormat::pcm_24khz_mono(),
            setup_timeout_ms: 10_000,
            send_buffer_frames: 50,
            retry: RetryPolicy::default(),
        }
    }
}

impl AiConfig {
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(AiError::config(format!(
                "endpoint must be a ws:// or wss:// URL, got '{}'",
                self.endpoint
            )));
        }
        if self.model.is_empty() {
            return Err(AiError::config("model must not be empty"));
        }
        for (name, format) in [("input_format", &self.input_format), ("output_format", &self.output_format)] {
            if format.bits_per_sample != 16 || format.channels == 0 || format.sample_rate == 0 {
                return Err(AiError::config(format!(
                    "{} must be non-empty 16-bit PCM, got {}",
                    name, format
                )));
            }
        }
        if self.send_buffer_frames == 0 {
            return Err(AiError::config("send_buffer_frames must be at least 1"));
        }
        if self.setup_timeout_ms == 0 {
            return Err(AiError::config("setup_timeout_ms must be positive"));
        }
        self.retry.validate()
    }
}

/// Parameters for one call's AI session
#[derive(Debug, Clone, PartialEq)]
pub struct AiSessionConfig {
    /// Call id, sent in the setup message and used in logs
    pub session_id: String,
    pub ai: AiConfig,
}

impl AiSessionConfig {
    pub fn new(session_id: impl Into<String>, ai: AiConfig) -> Self {
        Self {
            session_id: session_id.into(),
            ai,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AiConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.input_format.sample_rate, 16000);
        assert_eq!(config.output_format.sample_rate, 24000);
        assert_eq!(config.setup_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_rejects_http_endpoint() {
        let config = AiConfig {
            endpoint: "https://example.com".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AiError::Configuration { .. })));
    }

    #[test]
    fn test_api_key_is_never_serialized() {
        let config = AiConfig {
            api_key: Some("secret".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
