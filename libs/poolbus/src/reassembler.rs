//! Frame reassembly and resynchronization
//!
//! Bytes arrive from the serial port in arbitrary chunks. The reassembler
//! keeps one working buffer and extracts complete frames from its head.
//!
//! # Architecture
//!
//! ```text
//! push(chunk) ──► buffer ──► next_frame()
//!                              │
//!                              ├─ FF A5 ..   standard: wait for 6 + len + 2 bytes
//!                              ├─ 10 02 00|50 chlorinator: scan for 10 03 trailer
//!                              └─ anything else: drop one byte, rescan
//! ```
//!
//! Checksum mismatches are counted and discarded. Nothing here returns an
//! error; a partial frame simply leaves the buffer untouched until more
//! bytes are pushed.

use bytes::{Buf, BytesMut};
use serde::Serialize;
use tracing::{debug, trace};

use crate::checksum::ChecksumCodec;
use crate::constants::{
    CHLOR_DEST_CELL, CHLOR_DEST_CONTROLLER, CHLOR_HEADER, CHLOR_MAX_FRAME_LEN,
    CHLOR_MIN_FRAME_LEN, CHLOR_TRAILER, DEFAULT_MAX_STANDARD_FRAME_LEN, STANDARD_CHECKSUM_LEN,
    STANDARD_HEADER_LEN, STANDARD_LEN_OFFSET, STANDARD_MARKER, STANDARD_SYNC,
};
use crate::frame::{FrameGrammar, RawFrame};

/// Reassembly counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReassemblerStats {
    pub frames: u64,
    pub checksum_errors: u64,
    pub bytes_discarded: u64,
}

/// Result of inspecting the buffer head
enum Scan {
    /// A structurally complete frame of `len` bytes starts at `offset`
    Complete {
        grammar: FrameGrammar,
        offset: usize,
        len: usize,
    },
    /// Drop this many leading bytes and rescan
    Skip(usize),
    /// A frame is in progress; wait for more input
    NeedMore,
}

/// Incremental frame extractor
#[derive(Debug)]
pub struct FrameReassembler {
    buffer: BytesMut,
    max_standard_len: usize,
    stats: ReassemblerStats,
}

impl FrameReassembler {
    pub fn new(max_standard_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
            max_standard_len,
            stats: ReassemblerStats::default(),
        }
    }

    /// Append a chunk read from the transport
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes waiting in the working buffer
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> ReassemblerStats {
        self.stats
    }

    /// Drop any buffered bytes (used on reconnect)
    pub fn reset(&mut self) {
        if !self.buffer.is_empty() {
            debug!("Reassembler reset: {}B dropped", self.buffer.len());
        }
        self.buffer.clear();
    }

    /// Extract the next checksum-valid frame, or `None` when more bytes are needed
    pub fn next_frame(&mut self) -> Option<RawFrame> {
        loop {
            match self.scan() {
                Scan::NeedMore => return None,
                Scan::Skip(n) => self.discard(n),
                Scan::Complete {
                    grammar,
                    offset,
                    len,
                } => {
                    // the 0xFF marker is framing, not noise
                    self.buffer.advance(offset);
                    let bytes = self.buffer.split_to(len).to_vec();
                    let valid = match grammar {
                        FrameGrammar::Standard => ChecksumCodec::validate_standard(&bytes),
                        FrameGrammar::Chlorinator => ChecksumCodec::validate_chlorinator(&bytes),
                    };
                    if valid {
                        self.stats.frames += 1;
                        return Some(RawFrame { grammar, bytes });
                    }
                    self.stats.checksum_errors += 1;
                    debug!("Checksum mismatch ({:?}): {:02X?}", grammar, bytes);
                },
            }
        }
    }

    /// Extract every complete frame currently buffered
    pub fn drain(&mut self) -> Vec<RawFrame> {
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    fn discard(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let n = n.min(self.buffer.len());
        trace!("Discard {}B: {:02X?}", n, &self.buffer[..n]);
        self.buffer.advance(n);
        self.stats.bytes_discarded += n as u64;
    }

    fn scan(&self) -> Scan {
        let buf = &self.buffer[..];
        let Some(&first) = buf.first() else {
            return Scan::NeedMore;
        };

        if first == STANDARD_MARKER {
            return match buf.get(1) {
                None => Scan::NeedMore,
                Some(&STANDARD_SYNC) => self.scan_standard(buf),
                Some(_) => Scan::Skip(1),
            };
        }

        if first == CHLOR_HEADER[0] {
            return match (buf.get(1), buf.get(2)) {
                (None, _) => Scan::NeedMore,
                (Some(&b), _) if b != CHLOR_HEADER[1] => Scan::Skip(1),
                (Some(_), None) => Scan::NeedMore,
                (Some(_), Some(&dest)) if dest == CHLOR_DEST_CONTROLLER || dest == CHLOR_DEST_CELL => {
                    Self::scan_chlorinator(buf)
                },
                _ => Scan::Skip(1),
            };
        }

        Scan::Skip(1)
    }

    fn scan_standard(&self, buf: &[u8]) -> Scan {
        let Some(&declared) = buf.get(STANDARD_LEN_OFFSET) else {
            return Scan::NeedMore;
        };
        let frame_len = STANDARD_HEADER_LEN + declared as usize + STANDARD_CHECKSUM_LEN;
        if frame_len >= self.max_standard_len {
            debug!("Oversized frame: len={} declared={}", frame_len, declared);
            return Scan::Skip(1);
        }
        // frame starts after the 0xFF marker
        if buf.len() < 1 + frame_len {
            return Scan::NeedMore;
        }
        Scan::Complete {
            grammar: FrameGrammar::Standard,
            offset: 1,
            len: frame_len,
        }
    }

    fn scan_chlorinator(buf: &[u8]) -> Scan {
        // earliest possible trailer position: header(2) + dest + action + checksum
        let mut i = CHLOR_MIN_FRAME_LEN - CHLOR_TRAILER.len();
        while i + 1 < buf.len() {
            if buf[i] == CHLOR_TRAILER[0] && buf[i + 1] == CHLOR_TRAILER[1] {
                return Scan::Complete {
                    grammar: FrameGrammar::Chlorinator,
                    offset: 0,
                    len: i + CHLOR_TRAILER.len(),
                };
            }
            // another frame began before this one was terminated
            if (buf[i] == STANDARD_MARKER && buf[i + 1] == STANDARD_SYNC)
                || (buf[i] == CHLOR_HEADER[0] && buf[i + 1] == CHLOR_HEADER[1])
            {
                return Scan::Skip(i);
            }
            i += 1;
        }
        if buf.len() > CHLOR_MAX_FRAME_LEN {
            return Scan::Skip(1);
        }
        Scan::NeedMore
    }
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STANDARD_FRAME_LEN)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::frame::{Frame, ProtocolFamily};

    fn pump_status() -> Vec<u8> {
        Frame::standard(ProtocolFamily::Pump, 0, 96, 33, 7, vec![]).to_wire()
    }

    fn panel_status() -> Vec<u8> {
        Frame::standard(ProtocolFamily::Controller, 1, 15, 16, 2, vec![10, 30, 0x21, 0, 0]).to_wire()
    }

    fn chlor_set() -> Vec<u8> {
        Frame::chlorinator(17, vec![20]).to_wire()
    }

    // ========== basic extraction ==========

    #[test]
    fn test_single_standard_frame() {
        let mut r = FrameReassembler::default();
        r.push(&pump_status());
        let frame = r.next_frame().unwrap();
        assert_eq!(frame.grammar, FrameGrammar::Standard);
        assert_eq!(frame.bytes[0], 0xA5);
        assert!(r.next_frame().is_none());
        assert_eq!(r.buffered(), 0);
        // FF 00 FF prefix: the first FF and the 00 are noise
        assert_eq!(r.stats().bytes_discarded, 2);
    }

    #[test]
    fn test_single_chlorinator_frame() {
        let mut r = FrameReassembler::default();
        r.push(&chlor_set());
        let frame = r.next_frame().unwrap();
        assert_eq!(frame.grammar, FrameGrammar::Chlorinator);
        assert_eq!(frame.bytes, chlor_set());
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut r = FrameReassembler::default();
        let bytes = panel_status();
        r.push(&bytes[..7]);
        assert!(r.next_frame().is_none());
        r.push(&bytes[7..]);
        assert!(r.next_frame().is_some());
    }

    // ========== resynchronization ==========

    #[test]
    fn test_garbage_between_frames() {
        let mut stream = vec![0x00, 0x13, 0x42];
        stream.extend(pump_status());
        stream.extend([0x10, 0x99, 0xFF, 0x07]);
        stream.extend(chlor_set());
        stream.extend([0x55]);
        stream.extend(panel_status());

        let mut r = FrameReassembler::default();
        r.push(&stream);
        let frames = r.drain();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].grammar, FrameGrammar::Standard);
        assert_eq!(frames[1].grammar, FrameGrammar::Chlorinator);
        assert_eq!(frames[2].grammar, FrameGrammar::Standard);
    }

    #[test]
    fn test_any_chunking_yields_same_frames() {
        let mut stream = vec![0x01, 0x02];
        stream.extend(panel_status());
        stream.extend([0x33, 0x10]);
        stream.extend(chlor_set());
        stream.extend(pump_status());
        stream.extend([0xFF]);
        stream.extend(chlor_set());

        let mut reference = FrameReassembler::default();
        reference.push(&stream);
        let expected: Vec<Vec<u8>> = reference.drain().into_iter().map(|f| f.bytes).collect();
        assert_eq!(expected.len(), 4);

        for chunk in 1..=stream.len() {
            let mut r = FrameReassembler::default();
            let mut got = Vec::new();
            for piece in stream.chunks(chunk) {
                r.push(piece);
                got.extend(r.drain().into_iter().map(|f| f.bytes));
            }
            assert_eq!(got, expected, "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_checksum_mismatch_discarded_and_counted() {
        let mut bad = pump_status();
        let n = bad.len();
        bad[n - 1] ^= 0xFF;
        let mut r = FrameReassembler::default();
        r.push(&bad);
        r.push(&pump_status());
        let frames = r.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(r.stats().checksum_errors, 1);
        assert_eq!(r.stats().frames, 1);
    }

    #[test]
    fn test_oversized_length_resyncs() {
        let mut stream = vec![0xFF, 0xA5, 0x00, 0x60, 0x21, 0x07, 200];
        stream.extend(pump_status());
        let mut r = FrameReassembler::default();
        r.push(&stream);
        let frames = r.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].bytes[4], 7);
    }

    #[test]
    fn test_configurable_ceiling() {
        let mut r = FrameReassembler::new(10);
        r.push(&panel_status()); // 6 + 5 + 2 = 13 bytes
        assert!(r.next_frame().is_none());
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn test_unterminated_chlorinator_dropped_when_next_frame_starts() {
        let mut stream = vec![0x10, 0x02, 0x50, 0x11, 0x14];
        stream.extend(pump_status());
        let mut r = FrameReassembler::default();
        r.push(&stream);
        let frames = r.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].grammar, FrameGrammar::Standard);
    }

    #[test]
    fn test_chlorinator_with_unknown_dest_is_noise() {
        let mut r = FrameReassembler::default();
        r.push(&[0x10, 0x02, 0x33, 0x01, 0x46, 0x10, 0x03]);
        assert!(r.next_frame().is_none());
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn test_reset_clears_buffer() {
        let mut r = FrameReassembler::default();
        r.push(&pump_status()[..5]);
        assert!(r.next_frame().is_none());
        r.reset();
        assert_eq!(r.buffered(), 0);
    }
}
