//! Change notifications
//!
//! Decoders record what they touched into a [`ChangeSet`]; the engine
//! publishes the set once per processed frame (or timer tick) through a
//! [`ChangeNotifier`].

use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;
use tracing::trace;

/// Entity collections a change can refer to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Controller,
    Profile,
    Circuit,
    Feature,
    Body,
    Pump,
    Chlorinator,
    Schedule,
    CustomName,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Controller => "controller",
            EntityKind::Profile => "profile",
            EntityKind::Circuit => "circuit",
            EntityKind::Feature => "feature",
            EntityKind::Body => "body",
            EntityKind::Pump => "pump",
            EntityKind::Chlorinator => "chlorinator",
            EntityKind::Schedule => "schedule",
            EntityKind::CustomName => "custom_name",
        };
        f.write_str(name)
    }
}

/// One changed entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChangeEvent {
    pub kind: EntityKind,
    /// Entity id; 0 for singletons (controller, profile)
    pub id: u8,
}

impl ChangeEvent {
    pub fn new(kind: EntityKind, id: u8) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Deduplicated, insertion-ordered batch of changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    events: Vec<ChangeEvent>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: EntityKind, id: u8) {
        let event = ChangeEvent::new(kind, id);
        if !self.events.contains(&event) {
            self.events.push(event);
        }
    }

    /// Record only when `changed` is true; returns `changed`
    pub fn record_if(&mut self, changed: bool, kind: EntityKind, id: u8) -> bool {
        if changed {
            self.record(kind, id);
        }
        changed
    }

    pub fn extend(&mut self, other: ChangeSet) {
        for event in other.events {
            self.record(event.kind, event.id);
        }
    }

    pub fn contains(&self, kind: EntityKind, id: u8) -> bool {
        self.events.contains(&ChangeEvent::new(kind, id))
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> &[ChangeEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<ChangeEvent> {
        self.events
    }
}

/// Assign `value` to `slot`, reporting whether it changed
pub fn update<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

/// Broadcast publisher for change batches
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    sender: broadcast::Sender<Vec<ChangeEvent>>,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<ChangeEvent>> {
        self.sender.subscribe()
    }

    /// Publish a batch; empty batches and missing subscribers are fine
    pub fn publish(&self, changes: ChangeSet) -> usize {
        if changes.is_empty() {
            return 0;
        }
        let events = changes.into_events();
        let count = events.len();
        match self.sender.send(events) {
            Ok(receivers) => trace!("Published {} change(s) to {} receiver(s)", count, receivers),
            Err(_) => trace!("Published {} change(s), no receivers", count),
        }
        count
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}
