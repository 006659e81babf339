//! # Callbridge Session Core
//!
//! Per-call coordination for the audio bridge.
//!
//! - **session**: lifecycle state machine, turns and metrics of one call
//! - **media**: the media channel endpoint (framed PCM over binary WebSocket)
//! - **coordinator**: the per-call task that relays audio, detects speech and
//!   handles barge-in
//! - **registry**: concurrent map of live sessions
//! - **service**: call-control intake and the media WebSocket server
//!
//! ```rust,no_run
//! use callbridge_ai_copilot::WebSocketConnector;
//! use callbridge_infra_common::setup_logging;
//! use callbridge_session_core::{BridgeConfig, BridgeService};
//! use std::sync::Arc;
//!
//! # async fn example() -> callbridge_session_core::Result<()> {
//! let config = BridgeConfig::from_file("callbridge.toml")?;
//! setup_logging(&config.logging)?;
//! let service = Arc::new(BridgeService::new(config, Arc::new(WebSocketConnector::new()))?);
//! service.serve().await
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod media;
pub mod registry;
pub mod service;
pub mod session;

pub use config::{BridgeConfig, MediaConfig, TimeoutConfig};
pub use coordinator::BridgeCoordinator;
pub use errors::{BridgeError, Result};
pub use media::{MediaChannel, MediaMessage, MediaPeer};
pub use registry::{SessionCommand, SessionHandle, SessionRegistry};
pub use service::{BridgeService, CallControlEvent};
pub use session::{CallSession, CallerInfo, CloseReason, LifecycleState, SessionSnapshot, Turn};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
