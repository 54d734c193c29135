//! Frame types and wire encoding
//!
//! A [`Frame`] is the decoded, immutable view of one bus message. Inbound
//! frames are produced by the reassembler and classifier; outbound frames
//! are built by the command builders and encoded with
//! [`Frame::to_wire`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::checksum::ChecksumCodec;
use crate::constants::{
    CHLOR_DEST_CELL, CHLOR_HEADER, CHLOR_TRAILER, OUTBOUND_PREFIX, STANDARD_CHECKSUM_LEN,
    STANDARD_HEADER_LEN, STANDARD_SYNC,
};

/// Device family a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolFamily {
    Controller,
    Pump,
    Chlorinator,
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolFamily::Controller => write!(f, "controller"),
            ProtocolFamily::Pump => write!(f, "pump"),
            ProtocolFamily::Chlorinator => write!(f, "chlorinator"),
        }
    }
}

/// Frame grammar matched by the reassembler, before classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameGrammar {
    Standard,
    Chlorinator,
}

/// A checksum-validated frame extracted from the byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub grammar: FrameGrammar,
    /// Bytes from the sync byte (0xA5) or 0x10 0x02 through the checksum/trailer
    pub bytes: Vec<u8>,
}

/// Decoded bus message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub family: ProtocolFamily,
    /// Second header byte of a standard frame; 0 for chlorinator frames
    pub preamble: u8,
    pub destination: u8,
    /// Source address; chlorinator frames carry none and report 0
    pub source: u8,
    pub action: u8,
    pub payload: Vec<u8>,
    pub checksum_valid: bool,
    /// Wire bytes starting at the sync byte or chlorinator header
    #[serde(skip)]
    pub raw: Vec<u8>,
    /// Inbound message counter assigned by the engine (0 for outbound)
    pub counter: u64,
}

impl Frame {
    /// Build a standard (controller or pump) frame
    pub fn standard(
        family: ProtocolFamily,
        preamble: u8,
        destination: u8,
        source: u8,
        action: u8,
        payload: Vec<u8>,
    ) -> Self {
        let mut raw = Vec::with_capacity(STANDARD_HEADER_LEN + payload.len() + STANDARD_CHECKSUM_LEN);
        raw.extend_from_slice(&[
            STANDARD_SYNC,
            preamble,
            destination,
            source,
            action,
            payload.len() as u8,
        ]);
        raw.extend_from_slice(&payload);
        let chk = ChecksumCodec::standard_checksum(&raw);
        raw.extend_from_slice(&chk.to_be_bytes());

        Self {
            family,
            preamble,
            destination,
            source,
            action,
            payload,
            checksum_valid: true,
            raw,
            counter: 0,
        }
    }

    /// Build a chlorinator frame addressed to the cell
    pub fn chlorinator(action: u8, payload: Vec<u8>) -> Self {
        let mut raw = Vec::with_capacity(payload.len() + 7);
        raw.extend_from_slice(&CHLOR_HEADER);
        raw.push(CHLOR_DEST_CELL);
        raw.push(action);
        raw.extend_from_slice(&payload);
        raw.push(ChecksumCodec::chlorinator_checksum(&raw));
        raw.extend_from_slice(&CHLOR_TRAILER);

        Self {
            family: ProtocolFamily::Chlorinator,
            preamble: 0,
            destination: CHLOR_DEST_CELL,
            source: 0,
            action,
            payload,
            checksum_valid: true,
            raw,
            counter: 0,
        }
    }

    /// Parse the header fields of an extracted standard frame.
    ///
    /// Family is provisional; the classifier decides Pump vs Controller.
    pub fn parse_standard(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < STANDARD_HEADER_LEN + STANDARD_CHECKSUM_LEN || bytes[0] != STANDARD_SYNC {
            return None;
        }
        let len = bytes[5] as usize;
        let end = STANDARD_HEADER_LEN + len;
        if bytes.len() != end + STANDARD_CHECKSUM_LEN {
            return None;
        }
        Some(Self {
            family: ProtocolFamily::Controller,
            preamble: bytes[1],
            destination: bytes[2],
            source: bytes[3],
            action: bytes[4],
            payload: bytes[STANDARD_HEADER_LEN..end].to_vec(),
            checksum_valid: ChecksumCodec::validate_standard(bytes),
            raw: bytes.to_vec(),
            counter: 0,
        })
    }

    /// Parse an extracted chlorinator frame
    pub fn parse_chlorinator(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 7 || !bytes.starts_with(&CHLOR_HEADER) || !bytes.ends_with(&CHLOR_TRAILER) {
            return None;
        }
        let chk_pos = bytes.len() - CHLOR_TRAILER.len() - 1;
        Some(Self {
            family: ProtocolFamily::Chlorinator,
            preamble: 0,
            destination: bytes[2],
            source: 0,
            action: bytes[3],
            payload: bytes[4..chk_pos].to_vec(),
            checksum_valid: ChecksumCodec::validate_chlorinator(bytes),
            raw: bytes.to_vec(),
            counter: 0,
        })
    }

    /// Payload byte at `index`, or 0 when the payload is shorter
    pub fn byte(&self, index: usize) -> u8 {
        self.payload.get(index).copied().unwrap_or(0)
    }

    /// Big-endian 16-bit payload value at `index`
    pub fn word(&self, index: usize) -> u16 {
        u16::from_be_bytes([self.byte(index), self.byte(index + 1)])
    }

    /// Trailing two bytes of a chlorinator frame
    pub fn trailer(&self) -> Option<[u8; 2]> {
        match self.family {
            ProtocolFamily::Chlorinator if self.raw.len() >= 2 => {
                let n = self.raw.len();
                Some([self.raw[n - 2], self.raw[n - 1]])
            },
            _ => None,
        }
    }

    /// Bytes to put on the wire, including the outbound prefix for standard frames
    pub fn to_wire(&self) -> Vec<u8> {
        match self.family {
            ProtocolFamily::Chlorinator => self.raw.clone(),
            ProtocolFamily::Controller | ProtocolFamily::Pump => {
                let mut out = Vec::with_capacity(OUTBOUND_PREFIX.len() + self.raw.len());
                out.extend_from_slice(&OUTBOUND_PREFIX);
                out.extend_from_slice(&self.raw);
                out
            },
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} {}->{} act={} {:02X?}",
            self.family, self.counter, self.source, self.destination, self.action, self.payload
        )
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_standard_wire_encoding() {
        let frame = Frame::standard(ProtocolFamily::Pump, 0, 96, 33, 4, vec![255]);
        assert_eq!(
            frame.to_wire(),
            vec![0xFF, 0x00, 0xFF, 0xA5, 0x00, 0x60, 0x21, 0x04, 0x01, 0xFF, 0x02, 0x2A]
        );
    }

    #[test]
    fn test_chlorinator_wire_encoding() {
        let frame = Frame::chlorinator(17, vec![10]);
        assert_eq!(
            frame.to_wire(),
            vec![0x10, 0x02, 0x50, 0x11, 0x0A, 0x7D, 0x10, 0x03]
        );
        assert_eq!(frame.trailer(), Some([0x10, 0x03]));
    }

    #[test]
    fn test_parse_standard() {
        let built = Frame::standard(ProtocolFamily::Controller, 1, 15, 16, 2, vec![9, 30, 0x21]);
        let parsed = Frame::parse_standard(&built.raw).unwrap();
        assert_eq!(parsed.preamble, 1);
        assert_eq!(parsed.destination, 15);
        assert_eq!(parsed.source, 16);
        assert_eq!(parsed.action, 2);
        assert_eq!(parsed.payload, vec![9, 30, 0x21]);
        assert!(parsed.checksum_valid);
    }

    #[test]
    fn test_parse_standard_length_mismatch() {
        let mut bytes = Frame::standard(ProtocolFamily::Pump, 0, 96, 33, 7, vec![]).raw;
        bytes.push(0);
        assert!(Frame::parse_standard(&bytes).is_none());
    }

    #[test]
    fn test_parse_chlorinator() {
        let parsed = Frame::parse_chlorinator(&[0x10, 0x02, 0x00, 0x12, 0x4B, 0x00, 0x6F, 0x10, 0x03])
            .unwrap();
        assert_eq!(parsed.family, ProtocolFamily::Chlorinator);
        assert_eq!(parsed.destination, 0);
        assert_eq!(parsed.action, 18);
        assert_eq!(parsed.payload, vec![0x4B, 0x00]);
        assert!(parsed.checksum_valid);
    }

    #[test]
    fn test_byte_and_word_accessors() {
        let frame = Frame::standard(ProtocolFamily::Pump, 0, 33, 96, 7, vec![1, 2, 0x07, 0xD0]);
        assert_eq!(frame.byte(0), 1);
        assert_eq!(frame.word(2), 2000);
        assert_eq!(frame.byte(99), 0);
    }
}
