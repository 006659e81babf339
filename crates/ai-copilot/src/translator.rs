//! Turns decoded server messages into [`AiEvent`]s

use crate::events::{AiEvent, Role};
use crate::protocol::{ServerMessage, Transcription};
use callbridge_audio_core::codec::bytes_to_pcm16;
use callbridge_audio_core::{AudioFormat, AudioFrame, FrameDirection};
use tracing::trace;

/// Stateful translator for one connection; numbers assistant audio chunks.
#[derive(Debug, Clone)]
pub struct EventTranslator {
    output_format: AudioFormat,
    next_sequence: u64,
}

impl EventTranslator {
    pub fn new(output_format: AudioFormat) -> Self {
        Self {
            output_format,
            next_sequence: 0,
        }
    }

    /// Events carried by one server message, in protocol order: audio first,
    /// then transcripts, then turn signals.
    pub fn translate(&mut self, message: ServerMessage) -> Vec<AiEvent> {
        let mut events = Vec::new();

        if let Some(content) = message.server_content {
            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    match part.inline_data {
                        Some(inline) if inline.is_audio() => {
                            let format = match inline.sample_rate() {
                                Some(rate) if rate != self.output_format.sample_rate => AudioFormat {
                                    sample_rate: rate,
                                    ..self.output_format
                                },
                                _ => self.output_format,
                            };
                            match inline.decode() {
                                Ok(bytes) => events.extend(self.audio_chunk(&bytes, format)),
                                Err(e) => events.push(AiEvent::Error {
                                    message: e.to_string(),
                                    fatal: false,
                                }),
                            }
                        }
                        Some(inline) => {
                            trace!(mime_type = %inline.mime_type, "ignoring non-audio inline data");
                        }
                        None => {
                            if let Some(text) = part.text {
                                trace!(len = text.len(), "ignoring text part");
                            }
                        }
                    }
                }
            }

            if let Some(transcription) = content.input_transcription {
                events.extend(transcript(Role::Caller, transcription));
            }
            if let Some(transcription) = content.output_transcription {
                events.extend(transcript(Role::Assistant, transcription));
            }
            if content.interrupted {
                events.push(AiEvent::Interrupted);
            }
            if content.turn_complete {
                events.push(AiEvent::TurnComplete);
            }
        }

        if let Some(error) = message.error {
            let message = match error.code {
                Some(code) => format!("{} (code {})", error.message, code),
                None => error.message,
            };
            events.push(AiEvent::Error {
                message,
                fatal: false,
            });
        }

        events
    }

    /// Raw PCM delivered as a binary WebSocket message
    pub fn raw_audio(&mut self, bytes: &[u8]) -> Option<AiEvent> {
        self.audio_chunk(bytes, self.output_format)
    }

    fn audio_chunk(&mut self, bytes: &[u8], format: AudioFormat) -> Option<AiEvent> {
        match bytes_to_pcm16(bytes, &format) {
            Ok(samples) if samples.is_empty() => None,
            Ok(samples) => {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                Some(AiEvent::AudioChunk(AudioFrame::new(
                    samples,
                    format,
                    sequence,
                    FrameDirection::Outbound,
                )))
            }
            Err(e) => Some(AiEvent::Error {
                message: e.to_string(),
                fatal: false,
            }),
        }
    }
}

fn transcript(role: Role, transcription: Transcription) -> Option<AiEvent> {
    if transcription.text.is_empty() {
        return None;
    }
    Some(if transcription.finished {
        AiEvent::TranscriptFinal {
            role,
            text: transcription.text,
        }
    } else {
        AiEvent::TranscriptPartial {
            role,
            text: transcription.text,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translate(json: &str) -> Vec<AiEvent> {
        let mut translator = EventTranslator::new(AudioFormat::pcm_24khz_mono());
        translator.translate(ServerMessage::parse(json).unwrap())
    }

    #[test]
    fn test_audio_then_turn_complete() {
        let events = translate(
            r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AQD//w=="}}]},"turnComplete":true}}"#,
        );
        assert_eq!(events.len(), 2);
        match &events[0] {
            AiEvent::AudioChunk(frame) => {
                assert_eq!(frame.samples(), &[1, -1]);
                assert_eq!(frame.format().sample_rate, 24000);
                assert_eq!(frame.direction(), FrameDirection::Outbound);
            }
            other => panic!("expected audio, got {:?}", other),
        }
        assert_eq!(events[1], AiEvent::TurnComplete);
    }

    #[test]
    fn test_mime_rate_overrides_configured_output_rate() {
        let events = translate(
            r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=16000","data":"AAA="}}]}}}"#,
        );
        match &events[0] {
            AiEvent::AudioChunk(frame) => assert_eq!(frame.format().sample_rate, 16000),
            other => panic!("expected audio, got {:?}", other),
        }
    }

    #[test]
    fn test_chunks_are_numbered() {
        let mut translator = EventTranslator::new(AudioFormat::pcm_24khz_mono());
        let first = translator.raw_audio(&[0, 0]).unwrap();
        let second = translator.raw_audio(&[0, 0]).unwrap();
        match (first, second) {
            (AiEvent::AudioChunk(a), AiEvent::AudioChunk(b)) => {
                assert_eq!(a.sequence(), 0);
                assert_eq!(b.sequence(), 1);
            }
            other => panic!("unexpected events {:?}", other),
        }
        assert!(translator.raw_audio(&[]).is_none());
    }

    #[test]
    fn test_transcripts_and_interruption() {
        let events = translate(
            r#"{"serverContent":{"inputTranscription":{"text":"hello"},"outputTranscription":{"text":"Hi there","finished":true},"interrupted":true}}"#,
        );
        assert_eq!(
            events,
            vec![
                AiEvent::TranscriptPartial {
                    role: Role::Caller,
                    text: "hello".to_string()
                },
                AiEvent::TranscriptFinal {
                    role: Role::Assistant,
                    text: "Hi there".to_string()
                },
                AiEvent::Interrupted,
            ]
        );
    }

    #[test]
    fn test_server_error_and_odd_audio_are_non_fatal() {
        let events = translate(r#"{"error":{"code":429,"message":"quota"}}"#);
        assert_eq!(
            events,
            vec![AiEvent::Error {
                message: "quota (code 429)".to_string(),
                fatal: false
            }]
        );

        let mut translator = EventTranslator::new(AudioFormat::pcm_24khz_mono());
        assert!(matches!(
            translator.raw_audio(&[1, 2, 3]),
            Some(AiEvent::Error { fatal: false, .. })
        ));
    }
}
