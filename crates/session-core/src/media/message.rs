//! Media channel framing
//!
//! Every binary WebSocket message starts with a one-byte type marker:
//!
//! | marker | meaning                                  | payload         |
//! |--------|------------------------------------------|-----------------|
//! | `0x01` | audio                                    | PCM16LE samples |
//! | `0x02` | stop playback                            | none            |
//! | `0x03` | hangup                                   | none            |
//! | `0x04` | mark (playback position acknowledgement) | opaque          |

use crate::errors::{BridgeError, Result};
use bytes::{BufMut, Bytes, BytesMut};

pub const MARKER_AUDIO: u8 = 0x01;
pub const MARKER_STOP_PLAYBACK: u8 = 0x02;
pub const MARKER_HANGUP: u8 = 0x03;
pub const MARKER_MARK: u8 = 0x04;

/// One media channel message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaMessage {
    /// PCM audio in the negotiated wire format
    Audio(Bytes),
    /// Discard queued playback
    StopPlayback,
    /// The call was hung up
    Hangup,
    /// Playback reached a marked position; informational
    Mark(Bytes),
}

impl MediaMessage {
    pub fn audio(payload: impl Into<Bytes>) -> Self {
        MediaMessage::Audio(payload.into())
    }

    pub fn marker(&self) -> u8 {
        match self {
            MediaMessage::Audio(_) => MARKER_AUDIO,
            MediaMessage::StopPlayback => MARKER_STOP_PLAYBACK,
            MediaMessage::Hangup => MARKER_HANGUP,
            MediaMessage::Mark(_) => MARKER_MARK,
        }
    }

    pub fn encode(&self) -> Bytes {
        let payload: &[u8] = match self {
            MediaMessage::Audio(data) | MediaMessage::Mark(data) => data,
            MediaMessage::StopPlayback | MediaMessage::Hangup => &[],
        };
        let mut buf = BytesMut::with_capacity(1 + payload.len());
        buf.put_u8(self.marker());
        buf.put_slice(payload);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let (&marker, payload) = data
            .split_first()
            .ok_or_else(|| BridgeError::malformed("empty media message"))?;
        match marker {
            MARKER_AUDIO => Ok(MediaMessage::Audio(Bytes::copy_from_slice(payload))),
            MARKER_STOP_PLAYBACK => Ok(MediaMessage::StopPlayback),
            MARKER_HANGUP => Ok(MediaMessage::Hangup),
            MARKER_MARK => Ok(MediaMessage::Mark(Bytes::copy_from_slice(payload))),
            other => Err(BridgeError::malformed(format!(
                "unknown frame type marker 0x{:02x}",
                other
            ))),
        }
    }
}
