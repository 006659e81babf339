//! In-process AI endpoint
//!
//! [`InMemoryConnector`] opens streams without a network. Each open hands an
//! [`AiPeer`] to whoever holds the connector's peer receiver; the peer sees
//! everything the bridge sends and injects the events an endpoint would.
//! Used by the bridge's tests and by local dry runs.

use crate::client::{AiConnector, AiStream, StreamLink};
use crate::config::AiSessionConfig;
use crate::error::{AiError, Result};
use crate::events::AiEvent;
use crate::queue::Outbound;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Connector that pairs every stream with an [`AiPeer`]
#[derive(Debug)]
pub struct InMemoryConnector {
    peers: mpsc::UnboundedSender<AiPeer>,
    failures: Mutex<VecDeque<AiError>>,
    attempts: AtomicU32,
    open_connections: Arc<AtomicUsize>,
}

impl InMemoryConnector {
    /// Create a connector and the receiver its peers are delivered on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AiPeer>) {
        let (peers, receiver) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                failures: Mutex::new(VecDeque::new()),
                attempts: AtomicU32::new(0),
                open_connections: Arc::new(AtomicUsize::new(0)),
            },
            receiver,
        )
    }

    /// Make the next `open` fail with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, error: AiError) {
        self.failures.lock().push_back(error);
    }

    /// Number of `open` calls so far, failed ones included
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiConnector for InMemoryConnector {
    async fn open(&self, config: &AiSessionConfig) -> Result<AiStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        let (stream, link) = AiStream::new(
            &config.session_id,
            config.ai.input_format,
            config.ai.send_buffer_frames,
            self.open_connections.clone(),
        );
        let peer = AiPeer {
            session_id: config.session_id.clone(),
            link,
        };
        if self.peers.send(peer).is_err() {
            return Err(AiError::connect_rejected("in-memory endpoint is gone"));
        }
        debug!(session_id = %config.session_id, "in-memory AI stream opened");
        Ok(stream)
    }

    fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }
}

/// Endpoint side of an in-memory stream. Dropping it ends the stream as if
/// the endpoint had closed the connection.
#[derive(Debug)]
pub struct AiPeer {
    session_id: String,
    link: StreamLink,
}

impl AiPeer {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Deliver an event to the bridge. Returns `false` if nobody is listening.
    pub fn send(&self, event: AiEvent) -> bool {
        self.link.emit(event)
    }

    /// Wait for the next item the bridge sent; `None` once the handle is closed
    pub async fn recv(&self) -> Option<Outbound> {
        self.link.queue.pop().await
    }

    /// Take everything sent so far without waiting
    pub fn drain(&self) -> Vec<Outbound> {
        std::iter::from_fn(|| self.link.queue.try_pop()).collect()
    }

    /// Whether the bridge closed its handle
    pub fn is_closed(&self) -> bool {
        self.link.queue.is_closed()
    }
}
