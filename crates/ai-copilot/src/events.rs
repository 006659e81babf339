//! Events delivered by an AI stream

use callbridge_audio_core::AudioFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_stream::Stream;

/// Who is speaking in a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Caller,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Caller => f.write_str("caller"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

/// One item of the AI event sequence
#[derive(Debug, Clone, PartialEq)]
pub enum AiEvent {
    /// Assistant speech in the endpoint's output format
    AudioChunk(AudioFrame),
    TranscriptPartial { role: Role, text: String },
    TranscriptFinal { role: Role, text: String },
    /// The assistant finished its response
    TurnComplete,
    /// The endpoint acknowledged a barge-in and stopped generating
    Interrupted,
    /// The transport was lost and re-established. Any response in progress
    /// on the old connection is gone.
    Reconnected,
    /// Endpoint or transport error. A fatal error is the last event of the stream.
    Error { message: String, fatal: bool },
}

impl AiEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AiEvent::AudioChunk(_) => "audio_chunk",
            AiEvent::TranscriptPartial { .. } => "transcript_partial",
            AiEvent::TranscriptFinal { .. } => "transcript_final",
            AiEvent::TurnComplete => "turn_complete",
            AiEvent::Interrupted => "interrupted",
            AiEvent::Reconnected => "reconnected",
            AiEvent::Error { .. } => "error",
        }
    }
}

/// Unbounded, lazily consumed event sequence of one AI stream.
///
/// Ends (yields `None`) once the connection is closed and every buffered
/// event has been read.
#[derive(Debug)]
pub struct AiEvents {
    receiver: mpsc::UnboundedReceiver<AiEvent>,
}

impl AiEvents {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<AiEvent>) -> Self {
        Self { receiver }
    }

    /// Wait for the next event
    pub async fn recv(&mut self) -> Option<AiEvent> {
        self.receiver.recv().await
    }

    /// Take an event that is already buffered, without waiting
    pub fn try_recv(&mut self) -> Result<AiEvent, TryRecvError> {
        self.receiver.try_recv()
    }
}

impl Stream for AiEvents {
    type Item = AiEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
