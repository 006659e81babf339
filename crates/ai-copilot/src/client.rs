//! AI streaming client
//!
//! [`AiConnector::open`] performs the connect + setup handshake and returns an
//! [`AiStream`]: a [`AiStreamHandle`] for sending, and the [`AiEvents`]
//! sequence for receiving. A dedicated connection task owns the socket; the
//! handle only enqueues, so callers never wait on network I/O.

use crate::config::{AiConfig, AiSessionConfig};
use crate::error::{AiError, Result};
use crate::events::{AiEvent, AiEvents};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::queue::{Outbound, PushOutcome, SendQueue};
use crate::retry::retry_with_backoff;
use crate::translator::EventTranslator;
use async_trait::async_trait;
use callbridge_audio_core::{format, AudioFormat, AudioFrame};
use futures::{SinkExt, StreamExt};
use http::header::{HeaderValue, AUTHORIZATION};
use http::StatusCode;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Time allowed for the close handshake when a stream shuts down
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Opens AI streams. Implemented by the WebSocket client and by the
/// in-memory connector used in tests.
#[async_trait]
pub trait AiConnector: Send + Sync {
    /// Connect and complete the setup exchange. Fails with
    /// [`AiError::ConnectError`] on handshake failure or auth rejection.
    async fn open(&self, config: &AiSessionConfig) -> Result<AiStream>;

    /// Streams opened by this connector that have not been closed yet
    fn open_connections(&self) -> usize;
}

/// An open AI stream
#[derive(Debug)]
pub struct AiStream {
    pub handle: AiStreamHandle,
    pub events: AiEvents,
}

impl AiStream {
    /// Create a stream and the connection-side link that serves it
    pub(crate) fn new(
        session_id: &str,
        input_format: AudioFormat,
        send_buffer_frames: usize,
        open_connections: Arc<AtomicUsize>,
    ) -> (Self, StreamLink) {
        let queue = Arc::new(SendQueue::new(send_buffer_frames));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        open_connections.fetch_add(1, Ordering::SeqCst);
        let slot = Arc::new(ConnectionSlot {
            released: AtomicBool::new(false),
            open_connections,
        });

        let handle = AiStreamHandle {
            session_id: session_id.to_string(),
            input_format,
            queue: queue.clone(),
            slot: slot.clone(),
        };
        let link = StreamLink {
            queue,
            events: events_tx,
            slot,
        };
        (
            Self {
                handle,
                events: AiEvents::new(events_rx),
            },
            link,
        )
    }

    pub fn into_parts(self) -> (AiStreamHandle, AiEvents) {
        (self.handle, self.events)
    }
}

/// Counts a stream as open exactly once, whichever side ends it first
#[derive(Debug)]
pub(crate) struct ConnectionSlot {
    released: AtomicBool,
    open_connections: Arc<AtomicUsize>,
}

impl ConnectionSlot {
    fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.open_connections.fetch_sub(1, Ordering::SeqCst);
        true
    }
}

/// Connection-side end of a stream: drains the send queue and feeds events.
/// Dropping it ends the event sequence and closes the handle.
#[derive(Debug)]
pub(crate) struct StreamLink {
    pub(crate) queue: Arc<SendQueue>,
    pub(crate) events: mpsc::UnboundedSender<AiEvent>,
    slot: Arc<ConnectionSlot>,
}

impl StreamLink {
    pub(crate) fn emit(&self, event: AiEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

impl Drop for StreamLink {
    fn drop(&mut self) {
        self.queue.close();
        self.slot.release();
    }
}

/// Sending side of an AI stream.
///
/// Every method is a non-blocking enqueue. Dropping the handle closes it.
#[derive(Debug)]
pub struct AiStreamHandle {
    session_id: String,
    input_format: AudioFormat,
    queue: Arc<SendQueue>,
    slot: Arc<ConnectionSlot>,
}

impl AiStreamHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Format caller audio is uploaded in
    pub fn input_format(&self) -> &AudioFormat {
        &self.input_format
    }

    /// Queue one frame of caller audio, converting it to the input format if
    /// needed. When the buffer is full the oldest unsent frame is dropped.
    pub fn send_audio(&self, frame: AudioFrame) -> Result<()> {
        let frame = if frame.format().is_compatible_with(&self.input_format) {
            frame
        } else {
            format::convert_frame(&frame, &self.input_format)?
        };
        match self.queue.push(Outbound::Audio(frame)) {
            PushOutcome::Closed => Err(AiError::ClosedConnection),
            PushOutcome::DroppedOldest => {
                trace!(session_id = %self.session_id, dropped = self.queue.dropped(), "AI send buffer full, dropped oldest frame");
                Ok(())
            }
            PushOutcome::Queued => Ok(()),
        }
    }

    /// Tell the endpoint the caller started speaking
    pub fn activity_start(&self) -> Result<()> {
        self.push_control(Outbound::ActivityStart)
    }

    /// Tell the endpoint the caller stopped speaking
    pub fn activity_end(&self) -> Result<()> {
        self.push_control(Outbound::ActivityEnd)
    }

    /// Barge-in: ask the endpoint to stop the response in progress
    pub fn cancel_response(&self) -> Result<()> {
        self.push_control(Outbound::CancelResponse)
    }

    fn push_control(&self, item: Outbound) -> Result<()> {
        match self.queue.push(item) {
            PushOutcome::Closed => Err(AiError::ClosedConnection),
            _ => Ok(()),
        }
    }

    /// Audio frames dropped because the send buffer was full
    pub fn dropped_frames(&self) -> u64 {
        self.queue.dropped()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Close the stream. Idempotent; only the first call has any effect.
    pub fn close(&self) {
        let was_open = self.queue.close();
        if self.slot.release() || was_open {
            debug!(session_id = %self.session_id, "AI stream closed");
        }
    }
}

impl Drop for AiStreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// WebSocket implementation of [`AiConnector`]
#[derive(Debug, Default)]
pub struct WebSocketConnector {
    open_connections: Arc<AtomicUsize>,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AiConnector for WebSocketConnector {
    async fn open(&self, config: &AiSessionConfig) -> Result<AiStream> {
        config.ai.validate()?;
        let ws = dial(config).await?;
        info!(session_id = %config.session_id, endpoint = %config.ai.endpoint, "AI session established");

        let (stream, link) = AiStream::new(
            &config.session_id,
            config.ai.input_format,
            config.ai.send_buffer_frames,
            self.open_connections.clone(),
        );
        tokio::spawn(run_connection(ws, config.clone(), link));
        Ok(stream)
    }

    fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }
}

/// Connect and wait for the setup acknowledgement, bounded by the setup timeout
async fn dial(config: &AiSessionConfig) -> Result<WsStream> {
    let deadline = config.ai.setup_timeout();
    match timeout(deadline, handshake(config)).await {
        Ok(result) => result,
        Err(_) => Err(AiError::connect_transient(format!(
            "no setup acknowledgement within {} ms",
            deadline.as_millis()
        ))),
    }
}

async fn handshake(config: &AiSessionConfig) -> Result<WsStream> {
    let request = build_request(&config.ai)?;
    let (mut ws, response) = connect_async(request).await.map_err(map_connect_error)?;
    debug!(session_id = %config.session_id, status = %response.status(), "AI websocket handshake complete");

    let setup = ClientMessage::setup(
        &config.session_id,
        &config.ai.model,
        &config.ai.input_format,
        config.ai.voice.as_deref(),
        config.ai.instructions.as_deref(),
    )
    .to_json()?;
    ws.send(Message::text(setup))
        .await
        .map_err(|e| AiError::connect_transient(format!("failed to send setup: {}", e)))?;

    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let reply = ServerMessage::parse(&text)
                    .map_err(|e| AiError::connect_rejected(e.to_string()))?;
                if reply.is_setup_complete() {
                    return Ok(ws);
                }
                if let Some(err) = reply.error {
                    return Err(AiError::connect_rejected(format!(
                        "setup rejected: {}",
                        err.message
                    )));
                }
                trace!(session_id = %config.session_id, "ignoring message before setup completed");
            }
            Ok(Message::Close(frame)) => {
                return Err(AiError::connect_transient(format!(
                    "connection closed during setup: {:?}",
                    frame
                )));
            }
            Ok(_) => {}
            Err(e) => return Err(map_connect_error(e)),
        }
    }
    Err(AiError::connect_transient("connection ended before setup completed"))
}

fn build_request(ai: &AiConfig) -> Result<http::Request<()>> {
    let mut request = ai
        .endpoint
        .as_str()
        .into_client_request()
        .map_err(|e| AiError::connect_rejected(format!("invalid endpoint '{}': {}", ai.endpoint, e)))?;
    if let Some(key) = &ai.api_key {
        let value = HeaderValue::from_str(&format!("Bearer {}", key))
            .map_err(|_| AiError::config("api key contains characters not allowed in a header"))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(request)
}

fn map_connect_error(error: WsError) -> AiError {
    match error {
        WsError::Http(response) => handshake_status_error(response.status()),
        WsError::Url(e) => AiError::connect_rejected(format!("invalid endpoint: {}", e)),
        other => AiError::connect_transient(other.to_string()),
    }
}

/// Auth rejections and client errors are final; server errors may clear up.
fn handshake_status_error(status: StatusCode) -> AiError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        AiError::connect_rejected(format!("authentication rejected ({})", status))
    } else if status.is_server_error() {
        AiError::connect_transient(format!("handshake failed with HTTP {}", status))
    } else {
        AiError::connect_rejected(format!("handshake failed with HTTP {}", status))
    }
}

fn encode_outbound(item: &Outbound) -> Result<String> {
    let message = match item {
        Outbound::Audio(frame) => ClientMessage::audio(frame),
        Outbound::ActivityStart => ClientMessage::activity_start(),
        Outbound::ActivityEnd => ClientMessage::activity_end(),
        Outbound::CancelResponse => ClientMessage::response_cancel(),
    };
    message.to_json()
}

/// Owns the socket for the life of the stream
async fn run_connection(mut ws: WsStream, config: AiSessionConfig, link: StreamLink) {
    let session_id = config.session_id.clone();
    let mut translator = EventTranslator::new(config.ai.output_format);

    loop {
        let failure = tokio::select! {
            item = link.queue.pop() => match item {
                Some(item) => {
                    let text = match encode_outbound(&item) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(session_id = %session_id, error = %e, "failed to encode outbound message");
                            continue;
                        }
                    };
                    match ws.send(Message::text(text)).await {
                        Ok(()) => continue,
                        Err(e) => e,
                    }
                }
                None => {
                    debug!(session_id = %session_id, "closing AI websocket");
                    let _ = timeout(CLOSE_GRACE, ws.close(None)).await;
                    break;
                }
            },
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match ServerMessage::parse(&text) {
                        Ok(message) => {
                            for event in translator.translate(message) {
                                link.emit(event);
                            }
                        }
                        Err(e) => {
                            warn!(session_id = %session_id, error = %e, "discarding undecodable server message");
                            link.emit(AiEvent::Error { message: e.to_string(), fatal: false });
                        }
                    }
                    continue;
                }
                Some(Ok(Message::Binary(bytes))) => {
                    if let Some(event) = translator.raw_audio(&bytes) {
                        link.emit(event);
                    }
                    continue;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(session_id = %session_id, ?frame, "AI endpoint closed the connection");
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => e,
                None => {
                    info!(session_id = %session_id, "AI connection ended");
                    break;
                }
            },
        };

        warn!(session_id = %session_id, error = %failure, "AI transport error, reconnecting");
        let reconnected = retry_with_backoff("ai_reconnect", &config.ai.retry, |_| {
            let closed = link.queue.is_closed();
            let config = &config;
            async move {
                if closed {
                    return Err(AiError::ClosedConnection);
                }
                dial(config).await
            }
        })
        .await;
        if link.queue.is_closed() {
            debug!(session_id = %session_id, "stream closed during reconnect");
            if let Ok(mut new_ws) = reconnected {
                let _ = timeout(CLOSE_GRACE, new_ws.close(None)).await;
            }
            break;
        }
        match reconnected {
            Ok(new_ws) => {
                ws = new_ws;
                translator = EventTranslator::new(config.ai.output_format);
                info!(session_id = %session_id, "AI connection re-established");
                link.emit(AiEvent::Reconnected);
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "AI reconnect failed");
                link.emit(AiEvent::Error {
                    message: format!("AI connection lost: {}", e),
                    fatal: true,
                });
                break;
            }
        }
    }
    // Dropping the link ends the event sequence and releases the connection slot
    drop(link);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_sets_bearer_token() {
        let ai = AiConfig {
            endpoint: "ws://127.0.0.1:9/v1/realtime".to_string(),
            api_key: Some("k-123".to_string()),
            ..Default::default()
        };
        let request = build_request(&ai).unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer k-123");
        assert_eq!(request.uri().path(), "/v1/realtime");
    }

    #[test]
    fn test_auth_rejection_is_not_retryable() {
        let err = handshake_status_error(StatusCode::UNAUTHORIZED);
        assert!(matches!(err, AiError::ConnectError { retryable: false, .. }));
        assert!(!handshake_status_error(StatusCode::FORBIDDEN).is_recoverable());
        assert!(!handshake_status_error(StatusCode::NOT_FOUND).is_recoverable());
        assert!(handshake_status_error(StatusCode::SERVICE_UNAVAILABLE).is_recoverable());
    }

    #[test]
    fn test_encode_outbound() {
        assert_eq!(
            encode_outbound(&Outbound::CancelResponse).unwrap(),
            r#"{"responseCancel":{}}"#
        );
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = AiSessionConfig::new(
            "call-refused",
            AiConfig {
                endpoint: format!("ws://{}/v1/realtime", addr),
                setup_timeout_ms: 2_000,
                ..Default::default()
            },
        );
        let result = WebSocketConnector::new().open(&config).await;
        assert!(matches!(result, Err(AiError::ConnectError { .. })));
    }
}
