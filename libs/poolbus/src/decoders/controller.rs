//! Panel (controller) action decoders

use tracing::{debug, info};

use super::{ascii_name, ActionDecoderRegistry, DecodeContext};
use crate::bit_ops::{bitmap_states, extract_field};
use crate::constants::{EGG_TIMER_START_HOUR, SALT_SCALE};
use crate::frame::{Frame, ProtocolFamily};
use crate::notify::{update, EntityKind};
use crate::state::{EquipmentProfile, HeatMode, HeatStatus, ScheduleKind};

// ============================================================================
// Payload offsets
// ============================================================================

/// Equipment status (action 2)
mod status {
    pub const HOUR: usize = 0;
    pub const MINUTE: usize = 1;
    pub const BITMAP: usize = 2;
    /// Circuits 1-40, then touch-panel features through id 56
    pub const BITMAP_LEN: usize = 7;
    pub const MODE: usize = 9;
    pub const VALVES: usize = 10;
    pub const DELAY: usize = 12;
    pub const WATER_SENSOR1: usize = 14;
    pub const WATER_SENSOR2: usize = 15;
    pub const HEAT_ACTIVE: usize = 16;
    pub const AIR_TEMP: usize = 18;
    pub const SOLAR_TEMP: usize = 19;
    pub const HEAT_MODE: usize = 22;
    pub const MISC: usize = 26;
    pub const MODEL1: usize = 27;
    pub const MODEL2: usize = 28;

    /// Shortest payload carrying every field above except the model bytes
    pub const MIN_LEN: usize = MISC + 1;
}

/// Body 1 heater / solar, body 2 heater / solar
const HEAT_ACTIVE_BITS: [(u8, u8); 2] = [(0x04, 0x10), (0x08, 0x20)];

pub(super) fn register(registry: &mut ActionDecoderRegistry) {
    let family = ProtocolFamily::Controller;
    registry.register(family, 1, decode_ack);
    registry.register(family, 2, decode_status);
    registry.register(family, 5, decode_date_time);
    registry.register(family, 8, decode_heat);
    registry.register(family, 10, decode_custom_name);
    registry.register(family, 11, decode_circuit_name);
    registry.register(family, 17, decode_schedule);
    registry.register(family, 25, decode_chlorinator);
    registry.register(family, 136, decode_set_heat);
    registry.register(family, 252, decode_version);
}

fn decode_ack(frame: &Frame, _ctx: &mut DecodeContext<'_>) {
    debug!("Msg#{} ack for act={}", frame.counter, frame.byte(0));
}

// ============================================================================
// Action 2: equipment status
// ============================================================================

fn decode_status(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    if frame.payload.len() < status::MIN_LEN {
        debug!("Msg#{} short status payload ({}B)", frame.counter, frame.payload.len());
        return;
    }

    if frame.payload.len() > status::MODEL2 {
        identify_model(frame.byte(status::MODEL1), frame.byte(status::MODEL2), ctx);
    }

    let mode = frame.byte(status::MODE);
    let controller = &mut ctx.state.controller;
    let mut changed = false;
    changed |= update(&mut controller.hour, frame.byte(status::HOUR));
    changed |= update(&mut controller.minute, frame.byte(status::MINUTE));
    changed |= update(&mut controller.mode, mode & 0x81);
    changed |= update(&mut controller.celsius, mode & 0x04 != 0);
    changed |= update(&mut controller.freeze, mode & 0x08 != 0);
    changed |= update(&mut controller.valves, frame.byte(status::VALVES));
    changed |= update(&mut controller.delay, frame.byte(status::DELAY) & 63);
    changed |= update(&mut controller.water_sensor1, frame.byte(status::WATER_SENSOR1));
    changed |= update(&mut controller.water_sensor2, frame.byte(status::WATER_SENSOR2));
    changed |= update(&mut controller.air_temp, frame.byte(status::AIR_TEMP));
    changed |= update(&mut controller.solar_temp, frame.byte(status::SOLAR_TEMP));
    changed |= update(&mut controller.adjust_dst, frame.byte(status::MISC) & 1 != 0);
    ctx.changes.record_if(changed, EntityKind::Controller, 0);

    let bitmap = &frame.payload[status::BITMAP..status::BITMAP + status::BITMAP_LEN];
    apply_circuit_bitmap(bitmap, ctx);

    let heat_modes = frame.byte(status::HEAT_MODE);
    let heat_active = frame.byte(status::HEAT_ACTIVE);
    let equip1 = frame.byte(status::BITMAP);
    let temps = [frame.byte(status::WATER_SENSOR1), frame.byte(status::WATER_SENSOR2)];

    for (index, (heater_bit, solar_bit)) in HEAT_ACTIVE_BITS.iter().enumerate() {
        let id = index as u8 + 1;
        let Some(body) = ctx.state.body_mut(id) else {
            continue;
        };
        let on_bit = if id == 1 { 0x20 } else { 0x01 };
        let mode = HeatMode::from_bits(heat_modes >> (index * 2));
        let temp = temps[index];
        let heat_status = if heat_active & heater_bit != 0 {
            HeatStatus::Heater
        } else if heat_active & solar_bit != 0 {
            if temp > body.set_point {
                HeatStatus::Cooling
            } else {
                HeatStatus::Solar
            }
        } else {
            HeatStatus::Off
        };

        let mut changed = false;
        changed |= update(&mut body.is_on, equip1 & on_bit != 0);
        changed |= update(&mut body.temp, temp);
        changed |= update(&mut body.heat_mode, mode);
        changed |= update(&mut body.heat_status, heat_status);
        ctx.changes.record_if(changed, EntityKind::Body, id);
    }
}

fn identify_model(model1: u8, model2: u8, ctx: &mut DecodeContext<'_>) {
    match EquipmentProfile::identify(model1, model2) {
        Some(profile) => {
            let current = &ctx.state.profile;
            if current.controller_type == profile.controller_type && current.model == profile.model {
                return;
            }
            info!("Panel identified: {} ({:?})", profile.model, profile.controller_type);
            ctx.state.set_profile(profile);
            ctx.changes.record(EntityKind::Profile, 0);
        },
        None => debug!("Unknown panel model bytes {}/{}", model1, model2),
    }
}

/// Apply an LSB-first on/off bitmap starting at circuit 1
fn apply_circuit_bitmap(bitmap: &[u8], ctx: &mut DecodeContext<'_>) {
    let max_id = ctx.state.profile.max_bitmap_id();
    for (id, on) in bitmap_states(bitmap, 1, max_id) {
        if ctx.state.profile.feature_id(id).is_some() {
            if let Some(feature) = ctx.state.feature_for_circuit_mut(id) {
                let fid = feature.id;
                let changed = update(&mut feature.is_on, on);
                ctx.changes.record_if(changed, EntityKind::Feature, fid);
            }
        } else if let Some(circuit) = ctx.state.circuit_mut(id) {
            let changed = update(&mut circuit.is_on, on);
            ctx.changes.record_if(changed, EntityKind::Circuit, id);
        }
    }
}

// ============================================================================
// Clock, heat and names
// ============================================================================

fn decode_date_time(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    let controller = &mut ctx.state.controller;
    let mut changed = false;
    changed |= update(&mut controller.hour, frame.byte(0));
    changed |= update(&mut controller.minute, frame.byte(1));
    changed |= update(&mut controller.day_of_week, frame.byte(2));
    changed |= update(&mut controller.day, frame.byte(3));
    changed |= update(&mut controller.month, frame.byte(4));
    changed |= update(&mut controller.year, frame.byte(5));
    changed |= update(&mut controller.adjust_dst, frame.byte(7) & 1 != 0);
    ctx.changes.record_if(changed, EntityKind::Controller, 0);
}

fn decode_heat(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    let changed = update(&mut ctx.state.controller.air_temp, frame.byte(2))
        | update(&mut ctx.state.controller.solar_temp, frame.byte(8));
    ctx.changes.record_if(changed, EntityKind::Controller, 0);

    let modes = frame.byte(5);
    let bodies = [
        (1, frame.byte(0), frame.byte(3), extract_field(modes, 0x03)),
        (2, frame.byte(1), frame.byte(4), extract_field(modes, 0x0C)),
    ];
    for (id, temp, set_point, mode) in bodies {
        if let Some(body) = ctx.state.body_mut(id) {
            let changed = update(&mut body.temp, temp)
                | update(&mut body.set_point, set_point)
                | update(&mut body.heat_mode, HeatMode::from_bits(mode));
            ctx.changes.record_if(changed, EntityKind::Body, id);
        }
    }
}

/// Another remote asked the panel to change heat settings
fn decode_set_heat(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    let modes = frame.byte(2);
    info!(
        "Msg#{} {} set heat: pool {} ({:?}), spa {} ({:?})",
        frame.counter,
        frame.source,
        frame.byte(0),
        HeatMode::from_bits(modes),
        frame.byte(1),
        HeatMode::from_bits(modes >> 2)
    );
    let bodies = [(1, frame.byte(0), modes & 0x03), (2, frame.byte(1), (modes >> 2) & 0x03)];
    for (id, set_point, mode) in bodies {
        if let Some(body) = ctx.state.body_mut(id) {
            let changed =
                update(&mut body.set_point, set_point) | update(&mut body.heat_mode, HeatMode::from_bits(mode));
            ctx.changes.record_if(changed, EntityKind::Body, id);
        }
    }
}

fn decode_custom_name(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    let index = frame.byte(0);
    let end = frame.payload.len().min(12);
    let name = ascii_name(frame.payload.get(1..end).unwrap_or_default());
    if ctx.state.custom_name(index) == Some(name.as_str()) {
        return;
    }
    if ctx.state.set_custom_name(index, name) {
        ctx.changes.record(EntityKind::CustomName, index);
    }
}

fn decode_circuit_name(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    let id = frame.byte(0);
    let function_byte = frame.byte(1);
    let name_id = frame.byte(2);
    let name = ctx.state.resolve_name(name_id);

    if ctx.state.profile.feature_id(id).is_some() {
        if let (Some(name), Some(feature)) = (name, ctx.state.feature_for_circuit_mut(id)) {
            let fid = feature.id;
            let changed = update(&mut feature.name, name);
            ctx.changes.record_if(changed, EntityKind::Feature, fid);
        }
        return;
    }

    let Some(circuit) = ctx.state.circuit_mut(id) else {
        return;
    };
    let mut changed = false;
    changed |= update(&mut circuit.function, function_byte & 63);
    changed |= update(&mut circuit.freeze, function_byte & 64 != 0);
    changed |= update(&mut circuit.name_id, name_id);
    if let Some(name) = name {
        changed |= update(&mut circuit.name, name);
    }
    ctx.changes.record_if(changed, EntityKind::Circuit, id);
}

fn decode_schedule(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    let id = frame.byte(0);
    let Some(schedule) = ctx.state.schedule_mut(id) else {
        return;
    };
    let start_hour = frame.byte(2);
    let kind = if start_hour == EGG_TIMER_START_HOUR {
        ScheduleKind::EggTimer
    } else {
        ScheduleKind::Schedule
    };
    let mut changed = false;
    changed |= update(&mut schedule.circuit, frame.byte(1));
    changed |= update(&mut schedule.kind, kind);
    changed |= update(&mut schedule.start_hour, start_hour);
    changed |= update(&mut schedule.start_minute, frame.byte(3));
    changed |= update(&mut schedule.end_hour, frame.byte(4));
    changed |= update(&mut schedule.end_minute, frame.byte(5));
    changed |= update(&mut schedule.days, frame.byte(6));
    ctx.changes.record_if(changed, EntityKind::Schedule, id);
}

// ============================================================================
// Chlorinator via panel, firmware version
// ============================================================================

fn decode_chlorinator(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    let Some(chlor) = ctx.state.chlorinator_mut(1) else {
        return;
    };
    let b0 = frame.byte(0);
    let end = frame.payload.len().min(22);
    let name = ascii_name(frame.payload.get(6..end).unwrap_or_default());

    let mut changed = false;
    changed |= update(&mut chlor.installed, b0 & 1 != 0);
    changed |= update(&mut chlor.spa_set_point, b0 >> 1);
    changed |= update(&mut chlor.pool_set_point, frame.byte(1));
    changed |= update(&mut chlor.salt_level, u16::from(frame.byte(3)) * SALT_SCALE);
    changed |= update(&mut chlor.status, frame.byte(4) & 0x7F);
    changed |= update(&mut chlor.super_chlor_hours, frame.byte(5));
    if !name.is_empty() {
        changed |= update(&mut chlor.name, name);
    }
    ctx.changes.record_if(changed, EntityKind::Chlorinator, 1);
}

fn decode_version(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    let firmware = format!("{}.{:03}", frame.byte(1), frame.byte(2));
    let bootloader = format!("{}.{:03}", frame.byte(5), frame.byte(6));
    let controller = &mut ctx.state.controller;
    let changed = update(&mut controller.firmware, Some(firmware)) | update(&mut controller.bootloader, Some(bootloader));
    if changed {
        info!("Panel firmware {}", controller.firmware.as_deref().unwrap_or_default());
    }
    ctx.changes.record_if(changed, EntityKind::Controller, 0);
}
