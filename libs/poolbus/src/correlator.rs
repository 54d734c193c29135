//! Request/response correlation
//!
//! Devices on this bus have no transaction ids. Whether an inbound frame
//! answers the outstanding request is decided by per-family reply
//! conventions. Matching is best-effort: a frame that looks like a reply
//! releases the request even if it was triggered by someone else.

use crate::constants::{
    ACTION_ACK, ACTION_PUMP_STATUS, ACTION_VERSION_REQUEST, ACTION_VERSION_RESPONSE,
    AMBIGUOUS_CONTROLLER_ACTIONS, CHLOR_ACK_PAIRS, CHLOR_TRAILER, CONTROLLER_ACTION_MASK,
};
use crate::frame::{Frame, ProtocolFamily};

/// Reply rule for one device family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCorrelator {
    Pump,
    Chlorinator,
    Controller,
}

impl AckCorrelator {
    pub fn for_family(family: ProtocolFamily) -> Self {
        match family {
            ProtocolFamily::Pump => AckCorrelator::Pump,
            ProtocolFamily::Chlorinator => AckCorrelator::Chlorinator,
            ProtocolFamily::Controller => AckCorrelator::Controller,
        }
    }

    /// Does `inbound` satisfy `pending`?
    pub fn is_ack(pending: &Frame, inbound: &Frame) -> bool {
        if pending.family != inbound.family {
            return false;
        }
        Self::for_family(pending.family).matches(pending, inbound)
    }

    pub fn matches(self, pending: &Frame, inbound: &Frame) -> bool {
        match self {
            AckCorrelator::Pump => pump_ack(pending, inbound),
            AckCorrelator::Chlorinator => chlorinator_ack(pending, inbound),
            AckCorrelator::Controller => controller_ack(pending, inbound),
        }
    }
}

fn pump_ack(pending: &Frame, inbound: &Frame) -> bool {
    // echo with addresses swapped
    if inbound.action == pending.action
        && inbound.destination == pending.source
        && inbound.source == pending.destination
        && inbound.payload == pending.payload
    {
        return true;
    }
    // register write answered with the register value
    if pending.action == ACTION_ACK
        && inbound.action == ACTION_ACK
        && pending.payload.len() >= 4
        && inbound.payload.len() >= 2
        && pending.payload[2] == inbound.payload[0]
        && pending.payload[3] == inbound.payload[1]
    {
        return true;
    }
    pending.action == ACTION_PUMP_STATUS && inbound.action == ACTION_PUMP_STATUS
}

fn chlorinator_ack(pending: &Frame, inbound: &Frame) -> bool {
    inbound.trailer() == Some(CHLOR_TRAILER)
        && CHLOR_ACK_PAIRS.contains(&(pending.action, inbound.action))
}

fn controller_ack(pending: &Frame, inbound: &Frame) -> bool {
    if inbound.action == ACTION_ACK && inbound.payload.first() == Some(&pending.action) {
        return true;
    }
    if inbound.action == pending.action & CONTROLLER_ACTION_MASK {
        if AMBIGUOUS_CONTROLLER_ACTIONS.contains(&inbound.action) {
            return inbound.payload.first().is_some() && inbound.payload.first() == pending.payload.first();
        }
        return true;
    }
    matches!(
        (pending.action, inbound.action),
        (ACTION_VERSION_REQUEST, ACTION_VERSION_RESPONSE) | (ACTION_VERSION_RESPONSE, ACTION_VERSION_REQUEST)
    )
}
