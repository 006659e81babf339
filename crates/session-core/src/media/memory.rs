//! In-process media channel, for tests and embedding without a socket

use super::channel::{MediaChannel, MediaInbound, MediaSender};
use super::message::MediaMessage;
use crate::config::MediaConfig;
use crate::errors::{BridgeError, Result};
use bytes::Bytes;
use futures::channel::mpsc as fmpsc;
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;

/// Create a media channel whose far end is a [`MediaPeer`]
pub fn pair(call_id: &str, config: &MediaConfig) -> (MediaChannel, MediaPeer) {
    let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer_frames);
    let (outbound_tx, outbound_rx) = fmpsc::unbounded();
    let sink = outbound_tx.sink_map_err(|e| BridgeError::websocket(e.to_string()));
    let sender = MediaSender::spawn(call_id, sink, config.outbound_buffer_frames);
    let channel = MediaChannel {
        inbound: MediaInbound::new(inbound_rx),
        sender,
    };
    let peer = MediaPeer {
        to_bridge: inbound_tx,
        from_bridge: outbound_rx,
    };
    (channel, peer)
}

/// Far end of an in-process media channel; plays the telephony side.
///
/// Dropping the peer closes the channel as a lost connection would.
#[derive(Debug)]
pub struct MediaPeer {
    to_bridge: mpsc::Sender<Result<MediaMessage>>,
    from_bridge: fmpsc::UnboundedReceiver<MediaMessage>,
}

impl MediaPeer {
    /// Send caller audio. Returns false once the bridge side is gone.
    pub async fn send_audio(&self, payload: impl Into<Bytes>) -> bool {
        self.send(MediaMessage::audio(payload)).await
    }

    pub async fn send(&self, message: MediaMessage) -> bool {
        self.to_bridge.send(Ok(message)).await.is_ok()
    }

    /// Send raw bytes as they would arrive off the wire
    pub async fn send_raw(&self, data: &[u8]) -> bool {
        self.to_bridge.send(MediaMessage::decode(data)).await.is_ok()
    }

    pub async fn hangup(&self) -> bool {
        self.send(MediaMessage::Hangup).await
    }

    /// Next message written by the bridge; `None` once the bridge closed the channel
    pub async fn recv(&mut self) -> Option<MediaMessage> {
        self.from_bridge.next().await
    }

    /// Everything the bridge has written so far
    pub fn drain(&mut self) -> Vec<MediaMessage> {
        let mut messages = Vec::new();
        while let Some(Some(message)) = self.from_bridge.next().now_or_never() {
            messages.push(message);
        }
        messages
    }
}
