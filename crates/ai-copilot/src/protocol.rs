//! JSON envelope spoken with the realtime AI endpoint
//!
//! Every message is a single JSON object whose one top-level key names the
//! message kind. Audio travels base64-encoded inside `inlineData` /
//! `mediaChunks` parts tagged with an `audio/pcm;rate=N` MIME type.

use crate::error::{AiError, Result};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use callbridge_audio_core::codec::pcm16_to_bytes;
use callbridge_audio_core::{AudioFormat, AudioFrame};
use serde::{Deserialize, Serialize};

/// Empty JSON object, `{}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Messages sent by the bridge
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ResponseCancel(Empty),
}

impl ClientMessage {
    /// Build the setup message for a new session
    pub fn setup(
        session_id: &str,
        model: &str,
        input_format: &AudioFormat,
        voice: Option<&str>,
        instructions: Option<&str>,
    ) -> Self {
        Self::Setup(Setup {
            session_id: session_id.to_string(),
            model: model.to_string(),
            audio_format: WireAudioFormat::from(input_format),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: voice.map(|name| SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoice {
                            voice_name: name.to_string(),
                        },
                    },
                }),
            },
            system_instruction: instructions.map(|text| Content {
                parts: vec![TextPart {
                    text: text.to_string(),
                }],
            }),
        })
    }

    /// Wrap one PCM frame as a realtime media chunk
    pub fn audio(frame: &AudioFrame) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: frame.format().mime_type(),
                data: B64.encode(pcm16_to_bytes(frame.samples())),
            }],
            ..Default::default()
        })
    }

    pub fn activity_start() -> Self {
        Self::RealtimeInput(RealtimeInput {
            activity_start: Some(Empty {}),
            ..Default::default()
        })
    }

    pub fn activity_end() -> Self {
        Self::RealtimeInput(RealtimeInput {
            activity_end: Some(Empty {}),
            ..Default::default()
        })
    }

    pub fn response_cancel() -> Self {
        Self::ResponseCancel(Empty {})
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub session_id: String,
    pub model: String,
    pub audio_format: WireAudioFormat,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAudioFormat {
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channels: u16,
}

impl From<&AudioFormat> for WireAudioFormat {
    fn from(format: &AudioFormat) -> Self {
        Self {
            sample_rate: format.sample_rate,
            bit_depth: format.bits_per_sample,
            channels: format.channels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoice,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoice {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub media_chunks: Vec<MediaChunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_start: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_end: Option<Empty>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

/// Messages received from the endpoint. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub error: Option<ServerError>,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| AiError::protocol(format!("invalid server message: {}", e)))
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub inline_data: Option<InlineData>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

impl InlineData {
    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/pcm")
    }

    /// Sample rate from a `audio/pcm;rate=N` MIME type
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.parse().ok())
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        B64.decode(self.data.as_bytes())
            .map_err(|e| AiError::protocol(format!("invalid base64 audio: {}", e)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub finished: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}
