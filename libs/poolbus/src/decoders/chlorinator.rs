//! Chlorinator action decoders
//!
//! Frames addressed to the cell (80..=83) are requests: they only trigger a
//! comm-loss check. Frames addressed to the controller (0) come from the
//! cell and refresh its last-heard time.

use tracing::{debug, info, warn};

use super::{ascii_name, ActionDecoderRegistry, DecodeContext};
use crate::constants::{
    CHLOR_ADDRESS_BASE, CHLOR_ADDRESS_COUNT, CHLOR_DEST_CONTROLLER, CHLOR_STATUS_LOST_COMM, SALT_SCALE,
};
use crate::frame::{Frame, ProtocolFamily};
use crate::notify::{update, EntityKind};

pub(super) fn register(registry: &mut ActionDecoderRegistry) {
    let family = ProtocolFamily::Chlorinator;
    for action in [0, 1, 20] {
        registry.register(family, action, track_comm);
    }
    registry.register(family, 3, decode_version);
    registry.register(family, 17, decode_set_output);
    registry.register(family, 18, decode_salt_status);
    registry.register(family, 21, decode_set_output_tenths);
    registry.register(family, 22, decode_ichlor_status);
    registry.set_chlorinator_fallback(track_comm);
}

/// Chlorinator id for a frame; replies from the cell carry no address
fn chlorinator_id(frame: &Frame) -> u8 {
    let dest = frame.destination;
    if (CHLOR_ADDRESS_BASE..CHLOR_ADDRESS_BASE + CHLOR_ADDRESS_COUNT).contains(&dest) {
        dest - CHLOR_ADDRESS_BASE + 1
    } else {
        1
    }
}

fn from_cell(frame: &Frame) -> bool {
    frame.destination == CHLOR_DEST_CONTROLLER
}

/// Comm bookkeeping shared by every chlorinator frame
fn track_comm(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    let id = chlorinator_id(frame);
    let now = ctx.now;
    let threshold = ctx.chlorinator_comm_loss;
    let Some(chlor) = ctx.state.chlorinator_mut(id) else {
        return;
    };

    if from_cell(frame) {
        let was_lost = chlor.status == CHLOR_STATUS_LOST_COMM;
        chlor.mark_comm(now);
        if was_lost {
            info!("Chlorinator {} communication restored", id);
            ctx.changes.record(EntityKind::Chlorinator, id);
        }
    } else if chlor.check_comm_loss(now, threshold) {
        warn!("Chlorinator {} not responding", id);
        ctx.changes.record(EntityKind::Chlorinator, id);
    }
}

fn decode_version(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    track_comm(frame, ctx);
    if !from_cell(frame) {
        return;
    }
    let id = chlorinator_id(frame);
    let end = frame.payload.len().min(17);
    let name = ascii_name(frame.payload.get(1..end).unwrap_or_default());
    if let Some(chlor) = ctx.state.chlorinator_mut(id) {
        let mut changed = update(&mut chlor.version, frame.byte(0));
        if !name.is_empty() {
            changed |= update(&mut chlor.name, name);
        }
        ctx.changes.record_if(changed, EntityKind::Chlorinator, id);
    }
}

fn apply_target(frame: &Frame, ctx: &mut DecodeContext<'_>, target: u8) {
    let id = chlorinator_id(frame);
    if let Some(chlor) = ctx.state.chlorinator_mut(id) {
        let changed = update(&mut chlor.target_output, target) | update(&mut chlor.super_chlor, target >= 100);
        ctx.changes.record_if(changed, EntityKind::Chlorinator, id);
    }
}

fn decode_set_output(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    track_comm(frame, ctx);
    apply_target(frame, ctx, frame.byte(0));
}

fn decode_set_output_tenths(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    track_comm(frame, ctx);
    apply_target(frame, ctx, frame.byte(0) / 10);
}

fn decode_salt_status(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    track_comm(frame, ctx);
    let id = chlorinator_id(frame);
    let Some(chlor) = ctx.state.chlorinator_mut(id) else {
        return;
    };
    let salt = u16::from(frame.byte(0)) * SALT_SCALE;
    let changed = update(&mut chlor.salt_level, salt) | update(&mut chlor.status, frame.byte(1) & 0x7F);
    if changed {
        debug!("Msg#{} chlorinator {} salt {} status {}", frame.counter, id, salt, chlor.status);
    }
    ctx.changes.record_if(changed, EntityKind::Chlorinator, id);
}

fn decode_ichlor_status(frame: &Frame, ctx: &mut DecodeContext<'_>) {
    track_comm(frame, ctx);
    let id = chlorinator_id(frame);
    if let Some(chlor) = ctx.state.chlorinator_mut(id) {
        let changed = update(&mut chlor.current_output, frame.byte(1));
        ctx.changes.record_if(changed, EntityKind::Chlorinator, id);
    }
}
