//! Service error types

use poolbus::PoolBusError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolSrvError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bus error: {0}")]
    Bus(#[from] PoolBusError),

    #[error(transparent)]
    Common(#[from] common::Error),
}

pub type Result<T> = std::result::Result<T, PoolSrvError>;

impl PoolSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}
