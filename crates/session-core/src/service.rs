//! Bridge service: call-control intake and the media WebSocket server

use crate::config::BridgeConfig;
use crate::coordinator::BridgeCoordinator;
use crate::errors::{BridgeError, Result};
use crate::media::MediaChannel;
use crate::registry::SessionRegistry;
use crate::session::{CallerInfo, CloseReason};
use callbridge_ai_copilot::AiConnector;
use callbridge_infra_common::{log_welcome, LogContext};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn, Instrument, Level};

/// Path prefix media connections must use: `/media/{call_id}`
pub const MEDIA_PATH_PREFIX: &str = "/media/";

/// Notifications from the call-control collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallControlEvent {
    CallStarted {
        call_id: String,
        caller_info: CallerInfo,
    },
    CallEnded {
        call_id: String,
    },
}

/// A call announced by call control, waiting for its media to connect
#[derive(Debug)]
struct PendingCall {
    caller_info: CallerInfo,
    announced_at: Instant,
}

/// Accepts media connections and runs one coordinator per call
pub struct BridgeService {
    config: Arc<BridgeConfig>,
    registry: Arc<SessionRegistry>,
    connector: Arc<dyn AiConnector>,
    /// Calls announced by call control whose media has not connected yet
    pending: DashMap<String, PendingCall>,
}

impl BridgeService {
    pub fn new(config: BridgeConfig, connector: Arc<dyn AiConnector>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new()),
            connector,
            pending: DashMap::new(),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn handle_call_control(&self, event: CallControlEvent) -> Result<()> {
        match event {
            CallControlEvent::CallStarted {
                call_id,
                caller_info,
            } => self.on_call_started(&call_id, caller_info),
            CallControlEvent::CallEnded { call_id } => self.on_call_ended(&call_id),
        }
    }

    /// Remember caller details until the call's media connects.
    ///
    /// Announcements older than the inactivity timeout are forgotten; a
    /// second announcement for a call that is still pending is rejected.
    pub fn on_call_started(&self, call_id: &str, caller_info: CallerInfo) -> Result<()> {
        if self.registry.contains(call_id) {
            warn!(call_id = %call_id, "call started twice, rejecting");
            return Err(BridgeError::duplicate(call_id));
        }
        let max_age = self.config.timeouts.inactivity();
        let now = Instant::now();
        match self.pending.entry(call_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if now.duration_since(entry.get().announced_at) < max_age {
                    warn!(call_id = %call_id, "call announced twice, rejecting");
                    return Err(BridgeError::duplicate(call_id));
                }
                debug!(call_id = %call_id, "replacing stale announcement");
                entry.insert(PendingCall {
                    caller_info,
                    announced_at: now,
                });
            }
            Entry::Vacant(entry) => {
                debug!(call_id = %call_id, "call announced");
                entry.insert(PendingCall {
                    caller_info,
                    announced_at: now,
                });
            }
        }
        Ok(())
    }

    /// Calls announced but not yet connected
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Forget announcements whose media never connected within the
    /// inactivity timeout. Returns how many were dropped.
    pub fn evict_stale_pending(&self) -> usize {
        let max_age = self.config.timeouts.inactivity();
        let now = Instant::now();
        let before = self.pending.len();
        self.pending.retain(|call_id, pending| {
            let fresh = now.duration_since(pending.announced_at) < max_age;
            if !fresh {
                info!(call_id = %call_id, "media never connected, forgetting announced call");
            }
            fresh
        });
        before.saturating_sub(self.pending.len())
    }

    /// End the session for `call_id`, or forget it if media never connected
    pub fn on_call_ended(&self, call_id: &str) -> Result<()> {
        if self.pending.remove(call_id).is_some() {
            debug!(call_id = %call_id, "call ended before media connected");
            return Ok(());
        }
        let handle = self.registry.get(call_id)?;
        handle.call_ended();
        Ok(())
    }

    /// Create the session for an established media channel and start its coordinator.
    ///
    /// Fails with [`BridgeError::DuplicateSession`] if the call already has
    /// one; the new channel is closed in that case.
    pub fn attach_media(&self, call_id: &str, channel: MediaChannel) -> Result<JoinHandle<CloseReason>> {
        let caller_info = self
            .pending
            .remove(call_id)
            .map(|(_, pending)| pending.caller_info)
            .unwrap_or_default();
        let registered = match self.registry.create(call_id, caller_info) {
            Ok(registered) => registered,
            Err(e) => {
                warn!(call_id = %call_id, error = %e, "rejecting media connection");
                return Err(e);
            }
        };
        let coordinator = BridgeCoordinator::new(
            registered,
            channel,
            Arc::clone(&self.connector),
            Arc::clone(&self.config),
        )?;
        Ok(tokio::spawn(coordinator.run()))
    }

    /// Accept media WebSocket connections on `/media/{call_id}` until the listener fails
    pub async fn serve_media(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let service = Arc::clone(&self);
            let span = LogContext::new("media-server")
                .with_field("peer", peer.to_string())
                .span(Level::DEBUG);
            tokio::spawn(
                async move {
                    if let Err(e) = service.accept_media(stream).await {
                        warn!(error = %e, "media connection rejected");
                    }
                }
                .instrument(span),
            );
        }
    }

    async fn accept_media(&self, stream: TcpStream) -> Result<()> {
        let mut call_id = None;
        let registry = &self.registry;
        let check = |request: &Request, response: Response| {
            match parse_media_path(request.uri().path()) {
                Some(id) if registry.contains(id) => {
                    Err(reject(StatusCode::CONFLICT, "session already exists"))
                }
                Some(id) => {
                    call_id = Some(id.to_string());
                    Ok(response)
                }
                None => Err(reject(StatusCode::NOT_FOUND, "expected /media/{call_id}")),
            }
        };
        let ws = accept_hdr_async(stream, check)
            .await
            .map_err(|e| BridgeError::websocket(e.to_string()))?;
        let call_id = call_id.ok_or_else(|| BridgeError::websocket("handshake without call id"))?;

        info!(call_id = %call_id, "media connected");
        let channel = MediaChannel::from_websocket(&call_id, ws, &self.config.media);
        self.attach_media(&call_id, channel)?;
        Ok(())
    }

    /// Bind the configured listen address and serve media connections
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.media.listen_addr).await?;
        log_welcome(&self.config.logging.app_name, crate::VERSION);
        info!(addr = %self.config.media.listen_addr, "media endpoint listening");
        self.serve_media(listener).await
    }

    /// Consume call-control notifications until the sender goes away,
    /// sweeping stale announcements along the way
    pub async fn run_call_control(self: Arc<Self>, mut events: mpsc::Receiver<CallControlEvent>) {
        let period = self.config.timeouts.inactivity();
        let mut sweep = interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if let Err(e) = self.handle_call_control(event) {
                        match e {
                            BridgeError::NotFound { .. } => debug!(error = %e, "call control for unknown call"),
                            BridgeError::DuplicateSession { .. } => warn!(error = %e, "duplicate call announcement"),
                            other => error!(error = %other, "call control event failed"),
                        }
                    }
                }
                _ = sweep.tick() => {
                    let evicted = self.evict_stale_pending();
                    if evicted > 0 {
                        debug!(evicted, "swept stale call announcements");
                    }
                }
            }
        }
        debug!("call control channel closed");
    }
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Extract the call id from a `/media/{call_id}` request path
pub fn parse_media_path(path: &str) -> Option<&str> {
    let id = path.strip_prefix(MEDIA_PATH_PREFIX)?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id)
}
