//! Pool bus service
//!
//! Owns the serial link and drives a [`poolbus::ProtocolEngine`]:
//! reader and writer tasks on the link, the virtual pump and chlorinator
//! timers, and a logger for change notifications. Commands enter through
//! [`PoolHandle`].

pub mod config;
pub mod error;
pub mod runtime;
pub mod transport;

pub use config::{SerialConfig, ServiceConfig, VirtualControllers};
pub use error::{PoolSrvError, Result};
pub use runtime::{PoolHandle, PoolService};
pub use transport::{BusConnector, BusStream, SerialConnector};
