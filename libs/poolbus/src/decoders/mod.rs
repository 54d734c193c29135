//! Action decoders
//!
//! Each decoder reads fixed payload offsets from one kind of frame and
//! writes the values into [`EquipmentState`]. Decoders never fail: short
//! payloads read as zero (see [`Frame::byte`]) and out-of-range ids are
//! skipped.
//!
//! # Architecture
//!
//! ```text
//! Frame ──► ActionDecoderRegistry[(family, action)] ──► decoder fn
//!                                                          │
//!                               DecodeContext { state, changes, now }
//! ```

pub mod chlorinator;
pub mod controller;
pub mod pump;

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::frame::{Frame, ProtocolFamily};
use crate::notify::ChangeSet;
use crate::state::EquipmentState;

/// Everything a decoder may touch while handling one frame
pub struct DecodeContext<'a> {
    pub state: &'a mut EquipmentState,
    pub changes: &'a mut ChangeSet,
    pub now: Instant,
    pub pump_address_base: u8,
    pub pump_address_count: u8,
    pub chlorinator_comm_loss: Duration,
}

impl DecodeContext<'_> {
    /// Pump id (1-based) for a bus address in the pump block
    pub fn pump_id(&self, address: u8) -> Option<u8> {
        address
            .checked_sub(self.pump_address_base)
            .filter(|offset| *offset < self.pump_address_count)
            .map(|offset| offset + 1)
    }
}

pub type DecoderFn = fn(&Frame, &mut DecodeContext<'_>);

/// Outcome of a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Decoded,
    /// No decoder registered; the frame is ignored
    Unhandled,
}

/// Decoder lookup keyed by `(family, action)`
pub struct ActionDecoderRegistry {
    decoders: HashMap<(ProtocolFamily, u8), DecoderFn>,
    /// Chlorinator frames get comm tracking regardless of action
    chlorinator_fallback: Option<DecoderFn>,
}

impl ActionDecoderRegistry {
    /// Empty registry
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
            chlorinator_fallback: None,
        }
    }

    /// Registry with every built-in decoder
    pub fn new() -> Self {
        let mut registry = Self::empty();
        controller::register(&mut registry);
        pump::register(&mut registry);
        chlorinator::register(&mut registry);
        registry
    }

    pub fn register(&mut self, family: ProtocolFamily, action: u8, decoder: DecoderFn) {
        self.decoders.insert((family, action), decoder);
    }

    pub fn set_chlorinator_fallback(&mut self, decoder: DecoderFn) {
        self.chlorinator_fallback = Some(decoder);
    }

    pub fn contains(&self, family: ProtocolFamily, action: u8) -> bool {
        self.decoders.contains_key(&(family, action))
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    pub fn dispatch(&self, frame: &Frame, ctx: &mut DecodeContext<'_>) -> Dispatch {
        match self.decoders.get(&(frame.family, frame.action)) {
            Some(decoder) => {
                decoder(frame, ctx);
                Dispatch::Decoded
            },
            None if frame.family == ProtocolFamily::Chlorinator => {
                if let Some(fallback) = self.chlorinator_fallback {
                    fallback(frame, ctx);
                }
                debug!("No decoder for chlorinator act={}", frame.action);
                Dispatch::Unhandled
            },
            None => {
                debug!("No decoder for {} act={}", frame.family, frame.action);
                Dispatch::Unhandled
            },
        }
    }
}

impl Default for ActionDecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a NUL- or 0xFB+-terminated ASCII name from `bytes`
pub(crate) fn ascii_name(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|b| **b != 0 && **b < 251)
        .map(|b| char::from(*b))
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Owns what a [`DecodeContext`] borrows
    pub struct Harness {
        pub state: EquipmentState,
        pub changes: ChangeSet,
        pub now: Instant,
        registry: ActionDecoderRegistry,
    }

    impl Harness {
        pub fn new(state: EquipmentState) -> Self {
            Self {
                state,
                changes: ChangeSet::new(),
                now: Instant::now(),
                registry: ActionDecoderRegistry::new(),
            }
        }

        pub fn apply(&mut self, frame: &Frame) -> Dispatch {
            let mut ctx = DecodeContext {
                state: &mut self.state,
                changes: &mut self.changes,
                now: self.now,
                pump_address_base: 96,
                pump_address_count: 16,
                chlorinator_comm_loss: Duration::from_secs(30),
            };
            self.registry.dispatch(frame, &mut ctx)
        }

        pub fn take_changes(&mut self) -> ChangeSet {
            std::mem::take(&mut self.changes)
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::test_support::Harness;
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_builtin_registry_contents() {
        let registry = ActionDecoderRegistry::new();
        assert!(registry.contains(ProtocolFamily::Controller, 2));
        assert!(registry.contains(ProtocolFamily::Pump, 7));
        assert!(registry.contains(ProtocolFamily::Chlorinator, 18));
        assert!(!registry.contains(ProtocolFamily::Controller, 99));
        assert!(ActionDecoderRegistry::empty().is_empty());
    }

    #[test]
    #[traced_test]
    fn test_unknown_action_is_noop() {
        let mut h = Harness::new(EquipmentState::default());
        let frame = Frame::standard(ProtocolFamily::Controller, 33, 15, 16, 99, vec![1, 2, 3]);
        assert_eq!(h.apply(&frame), Dispatch::Unhandled);
        assert!(h.changes.is_empty());
        assert!(logs_contain("No decoder for controller act=99"));
    }

    #[test]
    fn test_ascii_name() {
        assert_eq!(ascii_name(b"Grotto\0junk"), "Grotto");
        assert_eq!(ascii_name(&[b'A', b'B', 251, b'C']), "AB");
        assert_eq!(ascii_name(b"  Spa  "), "Spa");
    }

    #[test]
    fn test_pump_id() {
        let mut state = EquipmentState::default();
        let mut changes = ChangeSet::new();
        let ctx = DecodeContext {
            state: &mut state,
            changes: &mut changes,
            now: Instant::now(),
            pump_address_base: 96,
            pump_address_count: 16,
            chlorinator_comm_loss: Duration::from_secs(30),
        };
        assert_eq!(ctx.pump_id(96), Some(1));
        assert_eq!(ctx.pump_id(111), Some(16));
        assert_eq!(ctx.pump_id(33), None);
        assert_eq!(ctx.pump_id(112), None);
    }
}
