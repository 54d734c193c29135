//! Frame classification
//!
//! Turns a [`RawFrame`] into a typed [`Frame`] and decides which device
//! family sent it. Standard frames touching the pump address block are
//! pump traffic; all other standard frames belong to the panel, whose
//! preamble byte is remembered for building outbound panel frames.

use tracing::debug;

use crate::constants::{DEFAULT_PUMP_ADDRESS_BASE, DEFAULT_PUMP_ADDRESS_COUNT};
use crate::frame::{Frame, FrameGrammar, ProtocolFamily, RawFrame};

#[derive(Debug, Clone)]
pub struct FrameClassifier {
    pump_base: u8,
    pump_count: u8,
    controller_preamble: Option<u8>,
}

impl FrameClassifier {
    pub fn new(pump_base: u8, pump_count: u8) -> Self {
        Self {
            pump_base,
            pump_count: pump_count.min(16),
            controller_preamble: None,
        }
    }

    /// True when `address` falls in the pump address block
    pub fn is_pump_address(&self, address: u8) -> bool {
        address >= self.pump_base && u16::from(address) < u16::from(self.pump_base) + u16::from(self.pump_count)
    }

    /// Preamble byte of the most recent panel frame
    pub fn controller_preamble(&self) -> Option<u8> {
        self.controller_preamble
    }

    /// Classify an extracted frame; `None` if the bytes do not parse
    pub fn classify(&mut self, raw: &RawFrame) -> Option<Frame> {
        match raw.grammar {
            FrameGrammar::Chlorinator => Frame::parse_chlorinator(&raw.bytes),
            FrameGrammar::Standard => {
                let mut frame = Frame::parse_standard(&raw.bytes)?;
                if self.is_pump_address(frame.destination) || self.is_pump_address(frame.source) {
                    frame.family = ProtocolFamily::Pump;
                } else {
                    frame.family = ProtocolFamily::Controller;
                    if self.controller_preamble != Some(frame.preamble) {
                        debug!("Panel preamble: {}", frame.preamble);
                        self.controller_preamble = Some(frame.preamble);
                    }
                }
                Some(frame)
            },
        }
    }
}

impl Default for FrameClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_PUMP_ADDRESS_BASE, DEFAULT_PUMP_ADDRESS_COUNT)
    }
}
