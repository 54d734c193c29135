//! Shared service plumbing
//!
//! Provides the pieces every bus service needs before it touches the wire:
//! - bracketed console/file logging
//! - layered configuration loading (defaults, file, environment)
//! - shutdown signal handling
//! - hex dumps for frame tracing

pub mod config_loader;
pub mod error;
pub mod hex;
pub mod logging;
pub mod shutdown;

pub use error::{Error, Result};

// Re-export common dependencies
pub use tokio;
pub use tokio_util::sync::CancellationToken;
