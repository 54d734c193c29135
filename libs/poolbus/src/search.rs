//! Diagnostic frame capture
//!
//! Lets an operator watch for specific traffic (for example an unknown
//! action code) without touching decode behaviour.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::frame::Frame;

/// Which frames to capture; an empty list matches anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    #[serde(default)]
    pub actions: Vec<u8>,
    #[serde(default)]
    pub sources: Vec<u8>,
    #[serde(default)]
    pub destinations: Vec<u8>,
}

impl SearchFilter {
    pub fn matches(&self, frame: &Frame) -> bool {
        fn allows(list: &[u8], value: u8) -> bool {
            list.is_empty() || list.contains(&value)
        }
        allows(&self.actions, frame.action)
            && allows(&self.sources, frame.source)
            && allows(&self.destinations, frame.destination)
    }
}

/// Runtime-switchable capture hook
#[derive(Debug)]
pub struct SearchHook {
    filter: Option<SearchFilter>,
    sender: broadcast::Sender<Frame>,
}

impl SearchHook {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { filter: None, sender }
    }

    /// Enable capture, replacing any previous filter
    pub fn enable(&mut self, filter: SearchFilter) {
        self.filter = Some(filter);
    }

    pub fn disable(&mut self) {
        self.filter = None;
    }

    pub fn filter(&self) -> Option<&SearchFilter> {
        self.filter.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.sender.subscribe()
    }

    /// Clone `frame` onto the channel if it matches. Returns true when captured.
    pub fn inspect(&self, frame: &Frame) -> bool {
        match &self.filter {
            Some(filter) if filter.matches(frame) => {
                // no receivers is fine
                let _ = self.sender.send(frame.clone());
                true
            },
            _ => false,
        }
    }
}

impl Default for SearchHook {
    fn default() -> Self {
        Self::new(64)
    }
}
