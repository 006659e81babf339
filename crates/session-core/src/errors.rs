//! Error types for the bridge

use callbridge_ai_copilot::AiError;
use callbridge_audio_core::AudioError;
use callbridge_infra_common::InfraError;
use thiserror::Error;

use crate::session::LifecycleState;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors raised by the session registry, the media endpoint and the coordinator
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A session for this call id already exists
    #[error("Session already exists for call {call_id}")]
    DuplicateSession { call_id: String },

    /// No session for this call id
    #[error("No session for call {call_id}")]
    NotFound { call_id: String },

    /// The AI endpoint could not be reached during setup
    #[error("Call {call_id} failed to connect to the AI endpoint: {reason}")]
    ConnectError { call_id: String, reason: String },

    /// A write was attempted after the endpoint closed
    #[error("{endpoint} connection is closed")]
    ClosedConnection { endpoint: &'static str },

    /// Media message that cannot be decoded
    #[error("Malformed media message: {reason}")]
    MalformedMedia { reason: String },

    /// Lifecycle transition the state machine does not allow
    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Media websocket failure
    #[error("WebSocket error: {message}")]
    WebSocket { message: String },

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("AI error: {0}")]
    Ai(#[from] AiError),

    #[error("Infrastructure error: {0}")]
    Infra(#[from] InfraError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn duplicate(call_id: impl Into<String>) -> Self {
        Self::DuplicateSession {
            call_id: call_id.into(),
        }
    }

    pub fn not_found(call_id: impl Into<String>) -> Self {
        Self::NotFound {
            call_id: call_id.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMedia {
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    /// Frame-level errors are recovered by dropping the frame; the call continues.
    pub fn is_frame_level(&self) -> bool {
        match self {
            Self::MalformedMedia { .. } => true,
            Self::Audio(e) => e.is_frame_level(),
            _ => false,
        }
    }
}
