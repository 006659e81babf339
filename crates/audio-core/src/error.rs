//! Error types for audio framing, conversion and detection

use thiserror::Error;

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;

/// Errors raised by the codec, the format helpers and the detector configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    /// Byte length is not a whole number of sample frames
    #[error("Malformed frame: {length} bytes is not a multiple of the {frame_size}-byte sample frame")]
    MalformedFrame { length: usize, frame_size: usize },

    /// Format the codec cannot represent
    #[error("Unsupported audio format {format}: {reason}")]
    UnsupportedFormat { format: String, reason: String },

    /// Conversion between two formats failed
    #[error("Format conversion failed from {source_format} to {target_format}: {reason}")]
    FormatConversionFailed {
        source_format: String,
        target_format: String,
        reason: String,
    },

    /// Detector or codec configuration rejected
    #[error("Invalid audio configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl AudioError {
    /// Create a malformed frame error
    pub fn malformed(length: usize, frame_size: usize) -> Self {
        Self::MalformedFrame { length, frame_size }
    }

    /// Create an unsupported format error
    pub fn unsupported(format: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Frame-level errors are recovered by dropping the frame; the call continues.
    pub fn is_frame_level(&self) -> bool {
        matches!(self, Self::MalformedFrame { .. })
    }
}
