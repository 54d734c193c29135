//! Logical commands to outbound frames
//!
//! Every producer of bus traffic (API calls and the virtual controller
//! timers) goes through [`CommandBuilder`], so addressing, preamble
//! selection and range checks live in one place.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::constants::{DEFAULT_CONTROLLER_PREAMBLE, PUMP_PREAMBLE};
use crate::error::{PoolBusError, Result};
use crate::frame::{Frame, ProtocolFamily};
use crate::state::HeatMode;

// ============================================================================
// Limits
// ============================================================================

pub const PUMP_RPM_RANGE: std::ops::RangeInclusive<u16> = 450..=3450;
pub const PUMP_GPM_RANGE: std::ops::RangeInclusive<u8> = 15..=130;
pub const PUMP_PROGRAM_RANGE: std::ops::RangeInclusive<u8> = 1..=4;
pub const CHLOR_MAX_OUTPUT: u8 = 101;

/// Pump register ids
const REG_PROGRAM: u8 = 33;
const REG_SAVE_PROGRAM_BASE: u8 = 38;

/// Commands understood by variable-speed pumps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpCommand {
    Remote,
    Local,
    PowerOn,
    PowerOff,
    RunRpm(u16),
    RunGpm(u8),
    RunProgram(u8),
    /// Select program 0, which stops a program run
    StopProgram,
    SaveProgram { program: u8, value: u16 },
    Status,
}

impl PumpCommand {
    fn validate(self) -> Result<()> {
        match self {
            PumpCommand::RunRpm(rpm) if !PUMP_RPM_RANGE.contains(&rpm) => Err(PoolBusError::invalid_command(
                format!("rpm {} outside {:?}", rpm, PUMP_RPM_RANGE),
            )),
            PumpCommand::RunGpm(gpm) if !PUMP_GPM_RANGE.contains(&gpm) => Err(PoolBusError::invalid_command(
                format!("gpm {} outside {:?}", gpm, PUMP_GPM_RANGE),
            )),
            PumpCommand::RunProgram(program) | PumpCommand::SaveProgram { program, .. }
                if !PUMP_PROGRAM_RANGE.contains(&program) =>
            {
                Err(PoolBusError::invalid_command(format!("program {} outside 1..=4", program)))
            },
            _ => Ok(()),
        }
    }

    /// `(action, payload)` on the wire
    fn encode(self) -> (u8, Vec<u8>) {
        match self {
            PumpCommand::Remote => (4, vec![255]),
            PumpCommand::Local => (4, vec![0]),
            PumpCommand::PowerOn => (6, vec![10]),
            PumpCommand::PowerOff => (6, vec![4]),
            PumpCommand::RunRpm(rpm) => {
                let [hi, lo] = rpm.to_be_bytes();
                (1, vec![2, 196, hi, lo])
            },
            PumpCommand::RunGpm(gpm) => (1, vec![2, 228, 0, gpm]),
            PumpCommand::RunProgram(program) => (1, vec![3, REG_PROGRAM, 0, program * 8]),
            PumpCommand::StopProgram => (1, vec![3, REG_PROGRAM, 0, 0]),
            PumpCommand::SaveProgram { program, value } => {
                let [hi, lo] = value.to_be_bytes();
                (1, vec![3, REG_SAVE_PROGRAM_BASE + program, hi, lo])
            },
            PumpCommand::Status => (7, vec![]),
        }
    }
}

/// Panel configuration reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerQuery {
    Status,
    DateTime,
    Heat,
    CustomName(u8),
    CircuitName(u8),
    Schedule(u8),
    Chlorinator,
    Version,
}

impl ControllerQuery {
    fn encode(self) -> (u8, Vec<u8>) {
        match self {
            ControllerQuery::Status => (194, vec![0]),
            ControllerQuery::DateTime => (197, vec![0]),
            ControllerQuery::Heat => (200, vec![0]),
            ControllerQuery::CustomName(index) => (202, vec![index]),
            ControllerQuery::CircuitName(id) => (203, vec![id]),
            ControllerQuery::Schedule(id) => (209, vec![id]),
            ControllerQuery::Chlorinator => (217, vec![0]),
            ControllerQuery::Version => (253, vec![0]),
        }
    }
}

/// Commands sent to the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerCommand {
    SetCircuit {
        circuit: u8,
        on: bool,
    },
    SetHeat {
        pool_set_point: u8,
        spa_set_point: u8,
        pool_mode: HeatMode,
        spa_mode: HeatMode,
    },
    SetSchedule {
        id: u8,
        circuit: u8,
        start_hour: u8,
        start_minute: u8,
        end_hour: u8,
        end_minute: u8,
        days: u8,
    },
    SetDateTime {
        hour: u8,
        minute: u8,
        day_of_week: u8,
        day: u8,
        month: u8,
        year: u8,
        adjust_dst: bool,
    },
    CancelDelay,
    SetChlorinator {
        pool_output: u8,
        spa_output: u8,
        super_chlor_hours: u8,
    },
    Get(ControllerQuery),
}

impl ControllerCommand {
    fn validate(self) -> Result<()> {
        match self {
            ControllerCommand::SetCircuit { circuit: 0, .. } => {
                Err(PoolBusError::invalid_command("circuit id must be >= 1"))
            },
            ControllerCommand::SetSchedule { id: 0, .. } => {
                Err(PoolBusError::invalid_command("schedule id must be >= 1"))
            },
            ControllerCommand::SetDateTime { hour, minute, .. } if hour > 23 || minute > 59 => {
                Err(PoolBusError::invalid_command(format!("invalid time {}:{}", hour, minute)))
            },
            ControllerCommand::SetChlorinator {
                pool_output,
                spa_output,
                ..
            } if pool_output > 100 || spa_output > 100 => {
                Err(PoolBusError::invalid_command("chlorinator setpoints are 0..=100"))
            },
            _ => Ok(()),
        }
    }

    fn encode(self) -> (u8, Vec<u8>) {
        match self {
            ControllerCommand::SetCircuit { circuit, on } => (134, vec![circuit, u8::from(on)]),
            ControllerCommand::SetHeat {
                pool_set_point,
                spa_set_point,
                pool_mode,
                spa_mode,
            } => (
                136,
                vec![pool_set_point, spa_set_point, pool_mode.bits() | (spa_mode.bits() << 2), 0],
            ),
            ControllerCommand::SetSchedule {
                id,
                circuit,
                start_hour,
                start_minute,
                end_hour,
                end_minute,
                days,
            } => (145, vec![id, circuit, start_hour, start_minute, end_hour, end_minute, days]),
            ControllerCommand::SetDateTime {
                hour,
                minute,
                day_of_week,
                day,
                month,
                year,
                adjust_dst,
            } => (133, vec![hour, minute, day_of_week, day, month, year, 0, u8::from(adjust_dst)]),
            ControllerCommand::CancelDelay => (131, vec![0]),
            ControllerCommand::SetChlorinator {
                pool_output,
                spa_output,
                super_chlor_hours,
            } => {
                let mut payload = vec![(spa_output << 1) | 1, pool_output, super_chlor_hours];
                payload.extend_from_slice(&[0; 7]);
                (153, payload)
            },
            ControllerCommand::Get(query) => query.encode(),
        }
    }
}

/// Commands sent directly to a chlorinator cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChlorinatorCommand {
    SetOutput(u8),
    GetVersion,
    TakeControl,
}

impl ChlorinatorCommand {
    fn encode(self) -> Result<(u8, Vec<u8>)> {
        match self {
            ChlorinatorCommand::SetOutput(pct) if pct > CHLOR_MAX_OUTPUT => Err(PoolBusError::invalid_command(
                format!("chlorinator output {} above {}", pct, CHLOR_MAX_OUTPUT),
            )),
            ChlorinatorCommand::SetOutput(pct) => Ok((17, vec![pct])),
            ChlorinatorCommand::GetVersion => Ok((20, vec![0])),
            ChlorinatorCommand::TakeControl => Ok((0, vec![0])),
        }
    }
}

/// Builds addressed frames from logical commands
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    app_address: u8,
    controller_address: u8,
    pump_address_base: u8,
    pump_address_count: u8,
    controller_preamble: u8,
}

impl CommandBuilder {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            app_address: config.app_address,
            controller_address: config.controller_address,
            pump_address_base: config.pump_address_base,
            pump_address_count: config.pump_address_count,
            controller_preamble: DEFAULT_CONTROLLER_PREAMBLE,
        }
    }

    /// Preamble observed on the bus; used for every later panel command
    pub fn set_controller_preamble(&mut self, preamble: u8) {
        self.controller_preamble = preamble;
    }

    pub fn controller_preamble(&self) -> u8 {
        self.controller_preamble
    }

    /// Bus address of pump `index` (1-based)
    pub fn pump_address(&self, index: u8) -> Result<u8> {
        if index == 0 || index > self.pump_address_count {
            return Err(PoolBusError::invalid_command(format!(
                "pump index {} outside 1..={}",
                index, self.pump_address_count
            )));
        }
        Ok(self.pump_address_base + index - 1)
    }

    pub fn pump(&self, index: u8, command: PumpCommand) -> Result<Frame> {
        let address = self.pump_address(index)?;
        command.validate()?;
        let (action, payload) = command.encode();
        Ok(Frame::standard(
            ProtocolFamily::Pump,
            PUMP_PREAMBLE,
            address,
            self.app_address,
            action,
            payload,
        ))
    }

    pub fn controller(&self, command: ControllerCommand) -> Result<Frame> {
        command.validate()?;
        let (action, payload) = command.encode();
        Ok(self.controller_frame(action, payload))
    }

    pub fn chlorinator(&self, command: ChlorinatorCommand) -> Result<Frame> {
        let (action, payload) = command.encode()?;
        Ok(Frame::chlorinator(action, payload))
    }

    /// Panel frame for a raw action, used for follow-up gets
    pub fn controller_frame(&self, action: u8, payload: Vec<u8>) -> Frame {
        Frame::standard(
            ProtocolFamily::Controller,
            self.controller_preamble,
            self.controller_address,
            self.app_address,
            action,
            payload,
        )
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::checksum::ChecksumCodec;

    fn builder() -> CommandBuilder {
        CommandBuilder::new(&EngineConfig::default())
    }

    // ========== pump ==========

    #[test]
    fn test_pump_remote_wire_bytes() {
        let frame = builder().pump(1, PumpCommand::Remote).unwrap();
        assert_eq!(
            frame.to_wire(),
            vec![0xFF, 0x00, 0xFF, 0xA5, 0x00, 96, 33, 4, 1, 255, 0x02, 0x2A]
        );
    }

    #[test]
    fn test_pump_run_rpm() {
        let frame = builder().pump(2, PumpCommand::RunRpm(2000)).unwrap();
        assert_eq!(frame.destination, 97);
        assert_eq!(frame.action, 1);
        assert_eq!(frame.payload, vec![2, 196, 0x07, 0xD0]);
        let wire = frame.to_wire();
        assert_eq!((wire[11], wire[12]), (0x07, 0xD0));
        assert!(ChecksumCodec::validate_standard(&wire[3..]));
    }

    #[test]
    fn test_pump_payloads() {
        let b = builder();
        assert_eq!(b.pump(1, PumpCommand::RunGpm(40)).unwrap().payload, vec![2, 228, 0, 40]);
        assert_eq!(b.pump(1, PumpCommand::RunProgram(3)).unwrap().payload, vec![3, 33, 0, 24]);
        assert_eq!(b.pump(1, PumpCommand::StopProgram).unwrap().payload, vec![3, 33, 0, 0]);
        assert_eq!(
            b.pump(1, PumpCommand::SaveProgram { program: 2, value: 1500 }).unwrap().payload,
            vec![3, 40, 0x05, 0xDC]
        );
        assert_eq!(b.pump(1, PumpCommand::PowerOff).unwrap().payload, vec![4]);
        assert!(b.pump(1, PumpCommand::Status).unwrap().payload.is_empty());
    }

    #[test]
    fn test_pump_validation() {
        let b = builder();
        for bad in [
            b.pump(0, PumpCommand::Status),
            b.pump(17, PumpCommand::Status),
            b.pump(1, PumpCommand::RunRpm(449)),
            b.pump(1, PumpCommand::RunRpm(3451)),
            b.pump(1, PumpCommand::RunGpm(14)),
            b.pump(1, PumpCommand::RunGpm(131)),
            b.pump(1, PumpCommand::RunProgram(0)),
            b.pump(1, PumpCommand::RunProgram(5)),
            b.pump(1, PumpCommand::SaveProgram { program: 5, value: 1000 }),
        ] {
            assert!(matches!(bad, Err(PoolBusError::InvalidCommand(_))));
        }
        assert!(b.pump(16, PumpCommand::RunRpm(3450)).is_ok());
        assert!(b.pump(1, PumpCommand::RunGpm(15)).is_ok());
    }

    // ========== controller ==========

    #[test]
    fn test_controller_uses_recorded_preamble() {
        let mut b = builder();
        let frame = b.controller(ControllerCommand::SetCircuit { circuit: 6, on: true }).unwrap();
        assert_eq!(frame.preamble, DEFAULT_CONTROLLER_PREAMBLE);
        assert_eq!((frame.destination, frame.source), (16, 33));

        b.set_controller_preamble(0x24);
        let frame = b.controller(ControllerCommand::SetCircuit { circuit: 6, on: false }).unwrap();
        assert_eq!(frame.preamble, 0x24);
        assert_eq!(frame.payload, vec![6, 0]);
    }

    #[test]
    fn test_controller_payloads() {
        let b = builder();
        let heat = b
            .controller(ControllerCommand::SetHeat {
                pool_set_point: 84,
                spa_set_point: 102,
                pool_mode: HeatMode::Heater,
                spa_mode: HeatMode::Solar,
            })
            .unwrap();
        assert_eq!((heat.action, heat.payload), (136, vec![84, 102, 0b1101, 0]));

        let chlor = b
            .controller(ControllerCommand::SetChlorinator {
                pool_output: 50,
                spa_output: 10,
                super_chlor_hours: 0,
            })
            .unwrap();
        assert_eq!(chlor.action, 153);
        assert_eq!(chlor.payload.len(), 10);
        assert_eq!(&chlor.payload[..3], &[21, 50, 0]);

        let get = b.controller(ControllerCommand::Get(ControllerQuery::CircuitName(4))).unwrap();
        assert_eq!((get.action, get.payload), (203, vec![4]));
        assert_eq!(b.controller(ControllerCommand::CancelDelay).unwrap().action, 131);
    }

    #[test]
    fn test_controller_validation() {
        let b = builder();
        assert!(b.controller(ControllerCommand::SetCircuit { circuit: 0, on: true }).is_err());
        assert!(b
            .controller(ControllerCommand::SetDateTime {
                hour: 24,
                minute: 0,
                day_of_week: 1,
                day: 1,
                month: 1,
                year: 26,
                adjust_dst: false,
            })
            .is_err());
    }

    // ========== chlorinator ==========

    #[test]
    fn test_chlorinator_commands() {
        let b = builder();
        let frame = b.chlorinator(ChlorinatorCommand::SetOutput(10)).unwrap();
        assert_eq!(frame.to_wire(), vec![0x10, 0x02, 0x50, 0x11, 0x0A, 0x7D, 0x10, 0x03]);
        assert!(b.chlorinator(ChlorinatorCommand::SetOutput(101)).is_ok());
        assert!(matches!(
            b.chlorinator(ChlorinatorCommand::SetOutput(102)),
            Err(PoolBusError::InvalidCommand(_))
        ));
        assert_eq!(b.chlorinator(ChlorinatorCommand::GetVersion).unwrap().action, 20);
        assert_eq!(b.chlorinator(ChlorinatorCommand::TakeControl).unwrap().payload, vec![0]);
    }
}
