//! Engine configuration
//!
//! Plain serde structs. Every field has a default so a partial YAML
//! section (or none at all) yields a working engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::*;
use crate::error::{PoolBusError, Result};

/// Protocol engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Source address stamped on outbound standard frames
    #[serde(default = "default_app_address")]
    pub app_address: u8,

    /// Panel address targeted by controller commands
    #[serde(default = "default_controller_address")]
    pub controller_address: u8,

    /// First pump address
    #[serde(default = "default_pump_address_base")]
    pub pump_address_base: u8,

    /// Size of the pump address block (at most 16)
    #[serde(default = "default_pump_address_count")]
    pub pump_address_count: u8,

    /// Standard frames at or above this length are treated as desync
    #[serde(default = "default_max_standard_frame_len")]
    pub max_standard_frame_len: usize,

    /// Seconds of chlorinator silence before status is forced to lost-comm
    #[serde(default = "default_chlorinator_comm_loss_secs")]
    pub chlorinator_comm_loss_secs: u64,

    /// Queue a matching get behind every panel set command
    #[serde(default)]
    pub follow_up_get: bool,

    /// First circuit id mapped to features while the panel model is unknown
    #[serde(default = "default_feature_base_circuit")]
    pub feature_base_circuit: u8,

    #[serde(default)]
    pub write: WritePolicyConfig,

    #[serde(default)]
    pub timers: TimerConfig,
}

fn default_app_address() -> u8 {
    DEFAULT_APP_ADDRESS
}

fn default_controller_address() -> u8 {
    DEFAULT_CONTROLLER_ADDRESS
}

fn default_pump_address_base() -> u8 {
    DEFAULT_PUMP_ADDRESS_BASE
}

fn default_pump_address_count() -> u8 {
    DEFAULT_PUMP_ADDRESS_COUNT
}

fn default_max_standard_frame_len() -> usize {
    DEFAULT_MAX_STANDARD_FRAME_LEN
}

fn default_chlorinator_comm_loss_secs() -> u64 {
    DEFAULT_CHLOR_COMM_LOSS_SECS
}

fn default_feature_base_circuit() -> u8 {
    DEFAULT_FEATURE_BASE_CIRCUIT
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_address: DEFAULT_APP_ADDRESS,
            controller_address: DEFAULT_CONTROLLER_ADDRESS,
            pump_address_base: DEFAULT_PUMP_ADDRESS_BASE,
            pump_address_count: DEFAULT_PUMP_ADDRESS_COUNT,
            max_standard_frame_len: DEFAULT_MAX_STANDARD_FRAME_LEN,
            chlorinator_comm_loss_secs: DEFAULT_CHLOR_COMM_LOSS_SECS,
            follow_up_get: false,
            feature_base_circuit: DEFAULT_FEATURE_BASE_CIRCUIT,
            write: WritePolicyConfig::default(),
            timers: TimerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn chlorinator_comm_loss(&self) -> Duration {
        Duration::from_secs(self.chlorinator_comm_loss_secs)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.pump_address_count == 0 || self.pump_address_count > 16 {
            return Err(PoolBusError::config(format!(
                "pump_address_count must be 1..=16, got {}",
                self.pump_address_count
            )));
        }
        if u16::from(self.pump_address_base) + u16::from(self.pump_address_count) > 256 {
            return Err(PoolBusError::config("pump address block overflows u8"));
        }
        let min_len = STANDARD_HEADER_LEN + STANDARD_CHECKSUM_LEN;
        if self.max_standard_frame_len <= min_len {
            return Err(PoolBusError::config(format!(
                "max_standard_frame_len must exceed {}",
                min_len
            )));
        }
        if self.write.abort_after_attempts == 0 {
            return Err(PoolBusError::config("write.abort_after_attempts must be > 0"));
        }
        if self.timers.pump_tick_secs == 0
            || self.timers.chlorinator_active_secs == 0
            || self.timers.chlorinator_idle_secs == 0
        {
            return Err(PoolBusError::config("timer intervals must be > 0"));
        }
        Ok(())
    }
}

/// Outbound write and retry policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritePolicyConfig {
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_defer_interval_ms")]
    pub defer_interval_ms: u64,
    #[serde(default = "default_min_inbound_between_writes")]
    pub min_inbound_between_writes: u64,
    #[serde(default = "default_max_skips")]
    pub max_skips: u32,
    #[serde(default = "default_warn_after_attempts")]
    pub warn_after_attempts: u32,
    #[serde(default = "default_abort_after_attempts")]
    pub abort_after_attempts: u32,
}

fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL_MS
}

fn default_defer_interval_ms() -> u64 {
    DEFAULT_DEFER_INTERVAL_MS
}

fn default_min_inbound_between_writes() -> u64 {
    DEFAULT_MIN_INBOUND_BETWEEN_WRITES
}

fn default_max_skips() -> u32 {
    DEFAULT_MAX_SKIPS
}

fn default_warn_after_attempts() -> u32 {
    DEFAULT_WARN_AFTER_ATTEMPTS
}

fn default_abort_after_attempts() -> u32 {
    DEFAULT_ABORT_AFTER_ATTEMPTS
}

impl Default for WritePolicyConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            defer_interval_ms: DEFAULT_DEFER_INTERVAL_MS,
            min_inbound_between_writes: DEFAULT_MIN_INBOUND_BETWEEN_WRITES,
            max_skips: DEFAULT_MAX_SKIPS,
            warn_after_attempts: DEFAULT_WARN_AFTER_ATTEMPTS,
            abort_after_attempts: DEFAULT_ABORT_AFTER_ATTEMPTS,
        }
    }
}

impl WritePolicyConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn defer_interval(&self) -> Duration {
        Duration::from_millis(self.defer_interval_ms)
    }
}

/// Virtual controller timer periods
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    #[serde(default = "default_pump_tick_secs")]
    pub pump_tick_secs: u64,
    #[serde(default = "default_chlorinator_active_secs")]
    pub chlorinator_active_secs: u64,
    #[serde(default = "default_chlorinator_idle_secs")]
    pub chlorinator_idle_secs: u64,
}

fn default_pump_tick_secs() -> u64 {
    DEFAULT_PUMP_TICK_SECS
}

fn default_chlorinator_active_secs() -> u64 {
    DEFAULT_CHLOR_ACTIVE_SECS
}

fn default_chlorinator_idle_secs() -> u64 {
    DEFAULT_CHLOR_IDLE_SECS
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            pump_tick_secs: DEFAULT_PUMP_TICK_SECS,
            chlorinator_active_secs: DEFAULT_CHLOR_ACTIVE_SECS,
            chlorinator_idle_secs: DEFAULT_CHLOR_IDLE_SECS,
        }
    }
}

impl TimerConfig {
    pub fn pump_tick(&self) -> Duration {
        Duration::from_secs(self.pump_tick_secs)
    }

    pub fn chlorinator_active(&self) -> Duration {
        Duration::from_secs(self.chlorinator_active_secs)
    }

    pub fn chlorinator_idle(&self) -> Duration {
        Duration::from_secs(self.chlorinator_idle_secs)
    }
}
