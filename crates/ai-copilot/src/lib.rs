//! # Callbridge AI Copilot
//!
//! Streaming client for realtime conversational-AI endpoints. One
//! [`AiStream`] per call carries caller audio up and assistant audio,
//! transcripts and turn signals back down.
//!
//! - **client**: [`AiConnector`], [`WebSocketConnector`] and the per-stream
//!   [`AiStreamHandle`]
//! - **protocol**: the JSON envelope (setup, realtime input, cancel, server content)
//! - **queue**: bounded drop-oldest send buffer
//! - **retry**: bounded exponential backoff for connect and reconnect
//! - **memory**: an in-process endpoint for tests
//!
//! ```rust,no_run
//! use callbridge_ai_copilot::{connect_with_retry, AiConfig, AiSessionConfig, WebSocketConnector};
//!
//! # async fn example() -> callbridge_ai_copilot::Result<()> {
//! let connector = WebSocketConnector::new();
//! let config = AiSessionConfig::new("call-42", AiConfig::default());
//! let stream = connect_with_retry(&connector, &config).await?;
//! let (handle, mut events) = stream.into_parts();
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.kind());
//! }
//! handle.close();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod memory;
pub mod protocol;
pub mod queue;
pub mod retry;
pub mod translator;

pub use client::{AiConnector, AiStream, AiStreamHandle, WebSocketConnector};
pub use config::{AiConfig, AiSessionConfig};
pub use error::{AiError, Result};
pub use events::{AiEvent, AiEvents, Role};
pub use memory::{AiPeer, InMemoryConnector};
pub use queue::Outbound;
pub use retry::{connect_with_retry, RetryPolicy};
