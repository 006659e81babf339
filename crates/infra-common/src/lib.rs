//! # Callbridge Infra Common
//!
//! Infrastructure shared by the bridge crates: `tracing` subscriber setup
//! driven by configuration, and [`LogContext`] for per-call spans.

pub mod errors;
pub mod logging;

pub use errors::{InfraError, Result};
pub use logging::{log_welcome, parse_log_level, setup_logging, LogContext, LoggingConfig};
