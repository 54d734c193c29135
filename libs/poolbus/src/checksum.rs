//! Checksum schemes for the two frame grammars
//!
//! Standard frames carry a 16-bit big-endian sum of every byte from the
//! sync byte through the payload. Chlorinator frames carry a single byte:
//! the sum of every byte before it, modulo 256. The 0x10 0x03 trailer is
//! outside the checksum domain.

use crate::constants::{CHLOR_MIN_FRAME_LEN, CHLOR_TRAILER, STANDARD_CHECKSUM_LEN, STANDARD_HEADER_LEN};
use crate::frame::ProtocolFamily;

/// Stateless checksum codec
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumCodec;

impl ChecksumCodec {
    /// 16-bit sum of `bytes`, wrapping at 65536
    pub fn standard_checksum(bytes: &[u8]) -> u16 {
        bytes
            .iter()
            .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
    }

    /// 8-bit sum of `bytes`, modulo 256
    pub fn chlorinator_checksum(bytes: &[u8]) -> u8 {
        bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
    }

    /// Validate a complete frame of the given family.
    ///
    /// Standard frames start at the sync byte (the leading 0xFF marker is
    /// not included). Chlorinator frames start at 0x10 0x02 and end with
    /// the 0x10 0x03 trailer.
    pub fn validate(family: ProtocolFamily, frame: &[u8]) -> bool {
        match family {
            ProtocolFamily::Chlorinator => Self::validate_chlorinator(frame),
            ProtocolFamily::Controller | ProtocolFamily::Pump => Self::validate_standard(frame),
        }
    }

    pub fn validate_standard(frame: &[u8]) -> bool {
        if frame.len() < STANDARD_HEADER_LEN + STANDARD_CHECKSUM_LEN {
            return false;
        }
        let split = frame.len() - STANDARD_CHECKSUM_LEN;
        let expected = u16::from_be_bytes([frame[split], frame[split + 1]]);
        Self::standard_checksum(&frame[..split]) == expected
    }

    pub fn validate_chlorinator(frame: &[u8]) -> bool {
        if frame.len() < CHLOR_MIN_FRAME_LEN || !frame.ends_with(&CHLOR_TRAILER) {
            return false;
        }
        let chk_pos = frame.len() - CHLOR_TRAILER.len() - 1;
        Self::chlorinator_checksum(&frame[..chk_pos]) == frame[chk_pos]
    }
}
