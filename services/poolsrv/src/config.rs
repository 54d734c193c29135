//! Service configuration
//!
//! Loaded through figment: built-in defaults, then the YAML file, then
//! `POOLSRV_<SECTION>__<KEY>` environment variables.

use std::path::Path;
use std::time::Duration;

use common::logging::LogConfig;
use poolbus::EngineConfig;
use serde::{Deserialize, Serialize};

use crate::error::{PoolSrvError, Result};

pub const ENV_PREFIX: &str = "POOLSRV_";
pub const DEFAULT_CONFIG_PATH: &str = "config/poolsrv.yaml";

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    /// "none", "even" or "odd"
    #[serde(default = "default_parity")]
    pub parity: String,

    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// `host:port` of an RS-485 to TCP adapter; overrides `port`
    #[serde(default)]
    pub net_connect: Option<String>,

    /// Pause before reopening a failed link
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: default_parity(),
            stop_bits: default_stop_bits(),
            timeout_ms: default_timeout_ms(),
            net_connect: None,
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Human-readable link description for logs
    pub fn describe(&self) -> String {
        match &self.net_connect {
            Some(addr) => format!("tcp://{}", addr),
            None => format!("{} @ {}", self.port, self.baud_rate),
        }
    }
}

/// Equipment this service drives itself when no panel does
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualControllers {
    /// 1-based pump indexes kept alive by the service
    #[serde(default)]
    pub pumps: Vec<u8>,

    /// Keep a chlorinator generating
    #[serde(default)]
    pub chlorinator: bool,
}

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LogConfig,

    #[serde(default)]
    pub virtual_controllers: VirtualControllers,
}

impl ServiceConfig {
    /// Load from `path` (missing file means defaults) and the environment
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: ServiceConfig = common::config_loader::load_config(Some(path), ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;

        if self.serial.net_connect.is_none() && self.serial.port.trim().is_empty() {
            return Err(PoolSrvError::config("serial.port is empty and no net_connect given"));
        }
        if !(5..=8).contains(&self.serial.data_bits) {
            return Err(PoolSrvError::config(format!(
                "serial.data_bits must be 5..=8, got {}",
                self.serial.data_bits
            )));
        }
        if !matches!(self.serial.stop_bits, 1 | 2) {
            return Err(PoolSrvError::config(format!(
                "serial.stop_bits must be 1 or 2, got {}",
                self.serial.stop_bits
            )));
        }
        if !matches!(self.serial.parity.to_lowercase().as_str(), "none" | "even" | "odd") {
            return Err(PoolSrvError::config(format!(
                "serial.parity must be none, even or odd, got '{}'",
                self.serial.parity
            )));
        }
        for &index in &self.virtual_controllers.pumps {
            if index == 0 || index > self.engine.pump_address_count {
                return Err(PoolSrvError::config(format!(
                    "virtual pump {} outside 1..={}",
                    index, self.engine.pump_address_count
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        config.validate().unwrap();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.describe(), "/dev/ttyUSB0 @ 9600");
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = "serial:\n  net_connect: 10.0.0.5:9801\nvirtual_controllers:\n  pumps: [1, 2]\n";
        let config: ServiceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.serial.describe(), "tcp://10.0.0.5:9801");
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.virtual_controllers.pumps, vec![1, 2]);
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_validation() {
        let mut config = ServiceConfig::default();
        config.serial.parity = "mark".to_string();
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.virtual_controllers.pumps = vec![17];
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.engine.pump_address_count = 0;
        assert!(matches!(config.validate(), Err(PoolSrvError::Bus(_))));
    }
}
