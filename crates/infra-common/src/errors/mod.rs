//! Error types for shared infrastructure

use thiserror::Error;

/// Result type for infrastructure operations
pub type Result<T> = std::result::Result<T, InfraError>;

#[derive(Debug, Error)]
pub enum InfraError {
    /// Configuration value could not be used
    #[error("Configuration error: {0}")]
    Config(String),

    /// A global subscriber was already installed, or installing it failed
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),
}
