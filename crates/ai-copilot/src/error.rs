//! Error types for the AI streaming client

use callbridge_audio_core::AudioError;
use thiserror::Error;

/// Result type for AI client operations
pub type Result<T> = std::result::Result<T, AiError>;

/// Errors that can occur while talking to the AI endpoint
#[derive(Debug, Error)]
pub enum AiError {
    /// Handshake, authentication or setup exchange failed
    #[error("Failed to connect to AI endpoint: {reason}")]
    ConnectError { reason: String, retryable: bool },

    /// The handle was closed; nothing more can be sent on it
    #[error("AI connection is closed")]
    ClosedConnection,

    /// Transport failure on an established connection
    #[error("AI transport error: {message}")]
    Transport { message: String },

    /// The server sent something that does not follow the protocol
    #[error("AI protocol error: {message}")]
    Protocol { message: String },

    /// Client configuration rejected
    #[error("Invalid AI configuration: {message}")]
    Configuration { message: String },

    /// Audio conversion before upload failed
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AiError {
    /// Create a connect error that is worth retrying
    pub fn connect_transient(reason: impl Into<String>) -> Self {
        Self::ConnectError {
            reason: reason.into(),
            retryable: true,
        }
    }

    /// Create a connect error that retrying cannot fix (auth rejection, bad URL)
    pub fn connect_rejected(reason: impl Into<String>) -> Self {
        Self::ConnectError {
            reason: reason.into(),
            retryable: false,
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether another attempt might succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ConnectError { retryable, .. } => *retryable,
            Self::Transport { .. } => true,
            _ => false,
        }
    }

    /// Short category name for structured logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::ConnectError { .. } => "connect",
            Self::ClosedConnection => "closed",
            Self::Transport { .. } => "transport",
            Self::Protocol { .. } => "protocol",
            Self::Configuration { .. } => "configuration",
            Self::Audio(_) => "audio",
            Self::Serialization(_) => "serialization",
        }
    }
}
