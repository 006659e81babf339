//! Media channel endpoint: reader and writer tasks around one connection

use super::message::MediaMessage;
use crate::config::MediaConfig;
use crate::errors::{BridgeError, Result};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace, warn};

/// Both halves of an established media connection
#[derive(Debug)]
pub struct MediaChannel {
    pub inbound: MediaInbound,
    pub sender: MediaSender,
}

impl MediaChannel {
    /// Serve an accepted WebSocket connection
    pub fn from_websocket<S>(call_id: &str, ws: WebSocketStream<S>, config: &MediaConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let sink = sink
            .sink_map_err(|e| BridgeError::websocket(e.to_string()))
            .with(|msg: MediaMessage| {
                futures::future::ready(Ok::<_, BridgeError>(Message::binary(msg.encode())))
            });

        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer_frames);
        let reader = tokio::spawn(run_reader(call_id.to_string(), stream, inbound_tx));
        let mut sender = MediaSender::spawn(call_id, sink, config.outbound_buffer_frames);
        sender.reader = Some(reader);

        Self {
            inbound: MediaInbound::new(inbound_rx),
            sender,
        }
    }

    pub fn into_parts(self) -> (MediaInbound, MediaSender) {
        (self.inbound, self.sender)
    }
}

/// Inbound messages in arrival order. Malformed messages arrive as errors so
/// they can be counted; the sequence ends when the connection closes.
#[derive(Debug)]
pub struct MediaInbound {
    receiver: mpsc::Receiver<Result<MediaMessage>>,
}

impl MediaInbound {
    pub(crate) fn new(receiver: mpsc::Receiver<Result<MediaMessage>>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> Option<Result<MediaMessage>> {
        self.receiver.recv().await
    }

    /// A message that has already arrived, if any
    pub fn try_recv(&mut self) -> Option<Result<MediaMessage>> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug)]
enum Control {
    Send(MediaMessage),
    Close,
}

/// Non-blocking write side of the media channel.
///
/// Audio goes through a bounded buffer drained by a writer task; when the
/// buffer is full the new frame is dropped and counted. Control messages
/// bypass the audio buffer.
#[derive(Debug)]
pub struct MediaSender {
    call_id: String,
    audio_tx: mpsc::Sender<(u64, Bytes)>,
    control_tx: mpsc::UnboundedSender<Control>,
    epoch: Arc<AtomicU64>,
    dropped: AtomicU64,
    closed: AtomicBool,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl MediaSender {
    pub(crate) fn spawn<S>(call_id: &str, sink: S, buffer_frames: usize) -> Self
    where
        S: Sink<MediaMessage, Error = BridgeError> + Unpin + Send + 'static,
    {
        let (audio_tx, audio_rx) = mpsc::channel(buffer_frames.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let epoch = Arc::new(AtomicU64::new(0));
        let writer = tokio::spawn(run_writer(
            call_id.to_string(),
            sink,
            audio_rx,
            control_rx,
            epoch.clone(),
        ));
        Self {
            call_id: call_id.to_string(),
            audio_tx,
            control_tx,
            epoch,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            writer: Some(writer),
            reader: None,
        }
    }

    /// Queue one audio payload for playback
    pub fn send_audio(&self, payload: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(BridgeError::ClosedConnection { endpoint: "media" });
        }
        let epoch = self.epoch.load(Ordering::Acquire);
        match self.audio_tx.try_send((epoch, payload)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                trace!(call_id = %self.call_id, dropped, "media writer behind, dropping outbound frame");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(BridgeError::ClosedConnection { endpoint: "media" })
            }
        }
    }

    /// Discard everything queued for playback and tell the far end to stop
    pub fn stop_playback(&self) -> Result<()> {
        if self.is_closed() {
            return Err(BridgeError::ClosedConnection { endpoint: "media" });
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.control_tx
            .send(Control::Send(MediaMessage::StopPlayback))
            .map_err(|_| BridgeError::ClosedConnection { endpoint: "media" })
    }

    /// Outbound frames dropped so far
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting writes and ask the writer to close the connection.
    /// Returns false if already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.control_tx.send(Control::Close);
        debug!(call_id = %self.call_id, "media channel closing");
        true
    }

    /// Close and wait up to `grace` for the writer to finish; tasks still
    /// running afterwards are aborted. Returns whether shutdown was clean.
    pub async fn shutdown(mut self, grace: Duration) -> bool {
        self.close();
        let mut clean = true;
        if let Some(mut writer) = self.writer.take() {
            if tokio::time::timeout(grace, &mut writer).await.is_err() {
                warn!(call_id = %self.call_id, "media writer did not finish in time, aborting");
                writer.abort();
                clean = false;
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        clean
    }
}

impl Drop for MediaSender {
    fn drop(&mut self) {
        self.close();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn run_writer<S>(
    call_id: String,
    mut sink: S,
    mut audio_rx: mpsc::Receiver<(u64, Bytes)>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    epoch: Arc<AtomicU64>,
) where
    S: Sink<MediaMessage, Error = BridgeError> + Unpin,
{
    loop {
        let outcome = tokio::select! {
            biased;

            control = control_rx.recv() => match control {
                Some(Control::Send(msg)) => sink.send(msg).await,
                Some(Control::Close) | None => break,
            },
            audio = audio_rx.recv() => match audio {
                Some((queued_epoch, payload)) => {
                    // Queued before the last stop-playback
                    if queued_epoch != epoch.load(Ordering::Acquire) {
                        continue;
                    }
                    sink.send(MediaMessage::Audio(payload)).await
                }
                None => break,
            },
        };
        if let Err(e) = outcome {
            warn!(call_id = %call_id, error = %e, "media write failed");
            return;
        }
    }
    if let Err(e) = sink.close().await {
        debug!(call_id = %call_id, error = %e, "media close failed");
    }
    debug!(call_id = %call_id, "media writer finished");
}

async fn run_reader<St>(call_id: String, mut stream: St, tx: mpsc::Sender<Result<MediaMessage>>)
where
    St: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    while let Some(item) = stream.next().await {
        let parsed = match item {
            Ok(Message::Binary(data)) => MediaMessage::decode(&data),
            Ok(Message::Text(_)) => Err(BridgeError::malformed("text frame on media channel")),
            Ok(Message::Close(frame)) => {
                debug!(call_id = %call_id, ?frame, "media peer closed");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(call_id = %call_id, error = %e, "media read failed");
                break;
            }
        };
        if tx.send(parsed).await.is_err() {
            break;
        }
    }
    debug!(call_id = %call_id, "media reader finished");
}
