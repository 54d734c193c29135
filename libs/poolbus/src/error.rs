//! Pool bus error types
//!
//! Only configuration and command construction paths produce errors.
//! Frame decoding never fails; it counts and logs instead. Link failures
//! belong to the transport owner.

use thiserror::Error;

/// Result type for poolbus operations
pub type Result<T> = std::result::Result<T, PoolBusError>;

/// Pool bus errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolBusError {
    /// Logical command rejected before it reached the wire
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PoolBusError {
    pub fn invalid_command(msg: impl Into<String>) -> Self {
        PoolBusError::InvalidCommand(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        PoolBusError::Config(msg.into())
    }
}
