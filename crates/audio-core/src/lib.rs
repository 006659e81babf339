//! # Callbridge Audio Core
//!
//! Audio primitives shared by both legs of the call bridge:
//!
//! - **types**: [`AudioFormat`] and the immutable [`AudioFrame`] value that moves
//!   through the pipeline
//! - **codec**: [`FrameCodec`], the conversion between telephony wire bytes and PCM frames
//! - **format**: stateless channel mapping and linear-interpolation resampling
//! - **vad**: [`VoiceActivityDetector`], an energy detector with debounced
//!   speech-start / speech-end events
//!
//! Everything in this crate is synchronous and free of I/O. The codec and the
//! format helpers hold no state and can be called from any number of sessions
//! at once; a detector instance belongs to exactly one call.
//!
//! ```rust
//! use callbridge_audio_core::{AudioFormat, FrameCodec, FrameDirection};
//!
//! let codec = FrameCodec::new(AudioFormat::pcm_8khz_mono()).unwrap();
//! let wire = vec![0u8; 320];
//! let frame = codec.decode(&wire, 0, FrameDirection::Inbound).unwrap();
//! assert_eq!(frame.samples().len(), 160);
//! ```

pub mod codec;
pub mod error;
pub mod format;
pub mod types;
pub mod vad;

pub use codec::FrameCodec;
pub use error::{AudioError, AudioResult};
pub use types::{AudioFormat, AudioFrame, FrameDirection};
pub use vad::{Classification, VadConfig, VadEvent, VoiceActivityDetector};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
