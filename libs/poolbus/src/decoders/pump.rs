//! Pump action decoders
//!
//! Pump frames are seen in both directions: commands from a controller (or
//! from us) to the pump, and the pump's echo or status reply. Each decoder
//! resolves the pump from whichever end of the frame is in the pump block.

use tracing::{debug, warn};

use super::{ActionDecoderRegistry, DecodeContext};
use crate::frame::{Frame, ProtocolFamily};
use crate::notify::{update, EntityKind};

/// Register ids carried in a `[3, register, hi, lo]` write
mod register {
    pub const PROGRAM: u8 = 33;
    pub const SAVE_PROGRAM_FIRST: u8 = 39;
    pub const SAVE_PROGRAM_LAST: u8 = 42;
    pub const TIMER: u8 = 43;
}

pub(super) fn register(registry: &mut ActionDecoderRegistry) {
    let family = ProtocolFamily::Pump;
    registry.register(family, 1, decode_write);
    registry.register(family, 4, decode_remote);
    registry.register(family, 5, decode_mode);
    registry.register(family, 6, decode_run);
    registry.register(family, 7, decode_status);
    registry.register(family, 255, decode_rejected);
}

/// Pump id for a frame, preferring the destination
fn pump_id(frame: &Frame, ctx: &DecodeContext<'_>, from_pump: bool) -> Option<(u8, u8)> {
    let address = if from_pump { frame.source } else { frame.destination };
    ctx.pump_id(address).map(|id| (id, address))
}

fn is_from_pump(frame: &Frame, ctx: &DecodeContext<'_>) -> bool {
    ctx.pump_id(frame.source).is_some()
}

fn decode_status(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    if !is_from_pump(frame, ctx) {
        return;
    }
    let Some((id, address)) = pump_id(frame, ctx, true) else {
        return;
    };
    let Some(pump) = ctx.state.pump_mut(id) else {
        debug!("Msg#{} status from pump {} beyond profile", frame.counter, id);
        return;
    };

    let mut changed = false;
    changed |= update(&mut pump.address, address);
    changed |= update(&mut pump.command, frame.byte(0));
    changed |= update(&mut pump.mode, frame.byte(1));
    changed |= update(&mut pump.drive_state, frame.byte(2));
    changed |= update(&mut pump.watts, frame.word(3));
    changed |= update(&mut pump.rpm, frame.word(5));
    changed |= update(&mut pump.flow, frame.byte(7));
    changed |= update(&mut pump.ppc, frame.byte(8));
    changed |= update(&mut pump.status, frame.word(11));
    let minutes = u16::from(frame.byte(13)) * 60 + u16::from(frame.byte(14));
    changed |= update(&mut pump.time_minutes, minutes);
    ctx.changes.record_if(changed, EntityKind::Pump, id);
}

fn decode_write(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    let from_pump = is_from_pump(frame, ctx);
    let Some((id, address)) = pump_id(frame, ctx, from_pump) else {
        return;
    };

    if from_pump && frame.payload.len() == 2 {
        let value = frame.word(0);
        if let Some(pump) = ctx.state.pump_mut(id) {
            let changed = update(&mut pump.set_value, value);
            ctx.changes.record_if(changed, EntityKind::Pump, id);
        }
        debug!("Msg#{} pump {} acknowledged {}", frame.counter, id, value);
        return;
    }

    let value = frame.word(2);
    match (frame.byte(0), frame.byte(1)) {
        (3, register::PROGRAM) => {
            let Some(pump) = ctx.state.pump_mut(id) else {
                return;
            };
            let changed = update(&mut pump.address, address) | update(&mut pump.current_program, (value / 8) as u8);
            ctx.changes.record_if(changed, EntityKind::Pump, id);
        },
        (3, reg @ register::SAVE_PROGRAM_FIRST..=register::SAVE_PROGRAM_LAST) => {
            let Some(pump) = ctx.state.pump_mut(id) else {
                return;
            };
            let slot = usize::from(reg - register::SAVE_PROGRAM_FIRST);
            let changed = update(&mut pump.programs[slot], value);
            ctx.changes.record_if(changed, EntityKind::Pump, id);
        },
        (3, register::TIMER) => {
            debug!("Msg#{} pump {} timer set to {} minutes", frame.counter, id, value);
        },
        (2, unit) => {
            let unit = if unit & 32 == 0 { "RPM" } else { "GPM" };
            debug!("Msg#{} pump {} set speed {} {}", frame.counter, id, value, unit);
        },
        (a, b) => warn!("Msg#{} pump {} unknown write [{}, {}]", frame.counter, id, a, b),
    }
}

fn decode_remote(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    let from_pump = is_from_pump(frame, ctx);
    let Some((id, _)) = pump_id(frame, ctx, from_pump) else {
        return;
    };
    if let Some(pump) = ctx.state.pump_mut(id) {
        let changed = update(&mut pump.remote_control, frame.byte(0) == 255);
        ctx.changes.record_if(changed, EntityKind::Pump, id);
    }
}

fn decode_mode(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    let from_pump = is_from_pump(frame, ctx);
    let Some((id, _)) = pump_id(frame, ctx, from_pump) else {
        return;
    };
    if let Some(pump) = ctx.state.pump_mut(id) {
        let changed = update(&mut pump.mode, frame.byte(0));
        ctx.changes.record_if(changed, EntityKind::Pump, id);
    }
}

fn decode_run(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    let from_pump = is_from_pump(frame, ctx);
    let Some((id, _)) = pump_id(frame, ctx, from_pump) else {
        return;
    };
    let power = match frame.byte(0) {
        10 => true,
        4 => false,
        other => {
            debug!("Msg#{} pump {} unknown run value {}", frame.counter, id, other);
            return;
        },
    };
    if let Some(pump) = ctx.state.pump_mut(id) {
        let changed = update(&mut pump.power, power);
        ctx.changes.record_if(changed, EntityKind::Pump, id);
    }
}

fn decode_rejected(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    let id = ctx.pump_id(frame.source).unwrap_or(0);
    warn!("Msg#{} pump {} rejected the command: {:02X?}", frame.counter, id, frame.payload);
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::super::test_support::Harness;
    use super::*;
    use crate::state::EquipmentState;
    use tracing_test::traced_test;

    fn to_pump(action: u8, payload: Vec<u8>) -> Frame {
        Frame::standard(ProtocolFamily::Pump, 0, 96, 33, action, payload)
    }

    fn from_pump(address: u8, action: u8, payload: Vec<u8>) -> Frame {
        Frame::standard(ProtocolFamily::Pump, 0, 33, address, action, payload)
    }

    #[test]
    fn test_status() {
        let mut h = Harness::new(EquipmentState::default());
        let payload = vec![10, 0, 2, 0x01, 0x2C, 0x07, 0xD0, 40, 5, 0, 0, 0, 0, 13, 25];
        h.apply(&from_pump(97, 7, payload));

        let pump = h.state.pump(2).unwrap();
        assert_eq!(pump.address, 97);
        assert_eq!(pump.command, 10);
        assert_eq!(pump.drive_state, 2);
        assert_eq!(pump.watts, 300);
        assert_eq!(pump.rpm, 2000);
        assert_eq!(pump.flow, 40);
        assert_eq!(pump.ppc, 5);
        assert_eq!(pump.time_minutes, 13 * 60 + 25);
        assert!(h.changes.contains(EntityKind::Pump, 2));
    }

    #[test]
    fn test_status_request_and_out_of_range_ignored() {
        let mut h = Harness::new(EquipmentState::default());
        h.apply(&to_pump(7, vec![]));
        assert_eq!(h.state.pumps().count(), 0);

        // pump 3 exceeds the default profile
        h.apply(&from_pump(98, 7, vec![10; 15]));
        assert!(h.state.pump(3).is_none());
        assert!(h.changes.is_empty());
    }

    #[test]
    fn test_write_requests() {
        let mut h = Harness::new(EquipmentState::default());
        h.apply(&to_pump(1, vec![3, 33, 0, 16]));
        assert_eq!(h.state.pump(1).unwrap().current_program, 2);

        h.apply(&to_pump(1, vec![3, 40, 0x05, 0xDC]));
        assert_eq!(h.state.pump(1).unwrap().programs, [0, 1500, 0, 0]);

        h.apply(&from_pump(96, 1, vec![0x05, 0xDC]));
        assert_eq!(h.state.pump(1).unwrap().set_value, 1500);
    }

    #[test]
    fn test_remote_mode_run() {
        let mut h = Harness::new(EquipmentState::default());
        h.apply(&to_pump(4, vec![255]));
        h.apply(&to_pump(6, vec![10]));
        h.apply(&to_pump(5, vec![3]));
        let pump = h.state.pump(1).unwrap();
        assert!(pump.remote_control);
        assert!(pump.power);
        assert_eq!(pump.mode, 3);

        h.apply(&from_pump(96, 4, vec![0]));
        h.apply(&from_pump(96, 6, vec![4]));
        let pump = h.state.pump(1).unwrap();
        assert!(!pump.remote_control);
        assert!(!pump.power);
    }

    #[test]
    #[traced_test]
    fn test_rejected_logs_warning() {
        let mut h = Harness::new(EquipmentState::default());
        h.apply(&from_pump(96, 255, vec![0]));
        assert!(logs_contain("rejected the command"));
    }
}
