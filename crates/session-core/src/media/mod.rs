//! Media channel endpoint
//!
//! Exchanges framed PCM audio and control messages with the telephony side
//! over a binary WebSocket. Reads and writes run on their own tasks so the
//! coordinator only ever enqueues.

mod channel;
mod memory;
mod message;

pub use channel::{MediaChannel, MediaInbound, MediaSender};
pub use memory::{pair, MediaPeer};
pub use message::{
    MediaMessage, MARKER_AUDIO, MARKER_HANGUP, MARKER_MARK, MARKER_STOP_PLAYBACK,
};
