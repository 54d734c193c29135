//! Outbound command queue and write policy
//!
//! The bus is half-duplex and devices answer the last command they heard,
//! so only the head of the queue is ever on the wire. It stays there until
//! an inbound frame correlates with it, the retry budget runs out, or the
//! transport reports a write error.
//!
//! # Architecture
//!
//! ```text
//! enqueue(Hold)      ──► push back
//! enqueue(Supersede) ──► replace same command key in place, else push back
//!
//! poll_write(now) ──► Write(bytes) | Wait(d) | Idle
//!        │
//!        ├─ first attempt: always written
//!        ├─ retry due: defer while the bus is quiet-for-us, at most max_skips times
//!        └─ attempts >= abort: eject head, move on
//!
//! on_inbound(frame) ──► AckCorrelator ──► eject head on match
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::config::WritePolicyConfig;
use crate::correlator::AckCorrelator;
use crate::frame::{Frame, ProtocolFamily};

/// How a new command interacts with queued ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueuePolicy {
    /// Wait behind everything already queued
    Hold,
    /// Replace a queued command with the same key; most recent wins
    Supersede,
}

/// Identity used to decide which queued command a new one supersedes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandKey {
    pub family: ProtocolFamily,
    pub destination: u8,
    pub action: u8,
    /// First payload byte; pump register writes also fold in the register id
    pub selector: u16,
}

impl CommandKey {
    pub fn of(frame: &Frame) -> Self {
        let p0 = u16::from(frame.byte(0));
        let selector = if frame.family == ProtocolFamily::Pump && frame.action == 1 {
            (p0 << 8) | u16::from(frame.byte(1))
        } else {
            p0
        };
        Self {
            family: frame.family,
            destination: frame.destination,
            action: frame.action,
            selector,
        }
    }
}

/// A command waiting for, or on, the wire
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub frame: Frame,
    pub bytes: Vec<u8>,
    pub enqueued_at: Instant,
    pub attempts: u32,
    pub last_write_at: Option<Instant>,
    /// Inbound message counter at the first write
    pub written_at_message: Option<u64>,
    skips: u32,
    next_due: Option<Instant>,
}

impl OutboundRequest {
    pub fn new(frame: Frame, now: Instant) -> Self {
        let bytes = frame.to_wire();
        Self {
            frame,
            bytes,
            enqueued_at: now,
            attempts: 0,
            last_write_at: None,
            written_at_message: None,
            skips: 0,
            next_due: None,
        }
    }

    pub fn key(&self) -> CommandKey {
        CommandKey::of(&self.frame)
    }

    pub fn family(&self) -> ProtocolFamily {
        self.frame.family
    }
}

/// What the writer task should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteDecision {
    /// Put these bytes on the wire now
    Write(Vec<u8>),
    /// Poll again after this long
    Wait(Duration),
    /// Nothing queued
    Idle,
}

/// Single-in-flight outbound queue
#[derive(Debug)]
pub struct OutboundQueue {
    requests: VecDeque<OutboundRequest>,
    policy: WritePolicyConfig,
    inbound_count: u64,
    aborted: u64,
    acked: u64,
}

impl OutboundQueue {
    pub fn new(policy: WritePolicyConfig) -> Self {
        Self {
            requests: VecDeque::new(),
            policy,
            inbound_count: 0,
            aborted: 0,
            acked: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// The in-flight (or next to be written) request
    pub fn pending(&self) -> Option<&OutboundRequest> {
        self.requests.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutboundRequest> {
        self.requests.iter()
    }

    /// Requests abandoned after exhausting their retries or on write error
    pub fn aborted_count(&self) -> u64 {
        self.aborted
    }

    pub fn acked_count(&self) -> u64 {
        self.acked
    }

    pub fn enqueue(&mut self, frame: Frame, policy: EnqueuePolicy, now: Instant) {
        let request = OutboundRequest::new(frame, now);
        if policy == EnqueuePolicy::Supersede {
            let key = request.key();
            if let Some(slot) = self.requests.iter_mut().find(|r| r.key() == key) {
                debug!("Supersede: {} act={}", key.family, key.action);
                *slot = request;
                return;
            }
        }
        debug!(
            "Enqueue: {} dest={} act={} depth={}",
            request.frame.family,
            request.frame.destination,
            request.frame.action,
            self.requests.len() + 1
        );
        self.requests.push_back(request);
    }

    /// Remove the head request
    pub fn eject(&mut self) -> Option<OutboundRequest> {
        self.requests.pop_front()
    }

    /// Drop everything (used on reconnect)
    pub fn clear(&mut self) {
        self.requests.clear();
    }

    /// Count an inbound frame and release the head if it is the reply
    pub fn on_inbound(&mut self, frame: &Frame) -> Option<OutboundRequest> {
        self.inbound_count += 1;
        let head = self.requests.front()?;
        if head.attempts == 0 || !AckCorrelator::is_ack(&head.frame, frame) {
            return None;
        }
        self.acked += 1;
        let done = self.requests.pop_front();
        if let Some(ref req) = done {
            debug!(
                "Ack: {} act={} after {} attempt(s)",
                req.frame.family, req.frame.action, req.attempts
            );
        }
        done
    }

    /// The transport failed to write the head; abandon it
    pub fn on_write_error(&mut self, reason: &str) -> Option<OutboundRequest> {
        let req = self.requests.pop_front()?;
        error!(
            "Write failed, ejecting {} act={}: {}",
            req.frame.family, req.frame.action, reason
        );
        self.aborted += 1;
        Some(req)
    }

    /// Decide whether to write, wait, or idle.
    ///
    /// `bus_busy` is true when unprocessed inbound bytes are buffered.
    pub fn poll_write(&mut self, now: Instant, bus_busy: bool) -> WriteDecision {
        loop {
            let inbound_count = self.inbound_count;
            let Some(head) = self.requests.front_mut() else {
                return WriteDecision::Idle;
            };

            let Some(due) = head.next_due else {
                head.attempts = 1;
                head.last_write_at = Some(now);
                head.written_at_message = Some(inbound_count);
                head.next_due = Some(now + self.policy.retry_interval());
                debug!("TX {} act={} attempt 1", head.frame.family, head.frame.action);
                return WriteDecision::Write(head.bytes.clone());
            };

            if now < due {
                return WriteDecision::Wait(due - now);
            }

            if head.attempts >= self.policy.abort_after_attempts {
                error!(
                    "No reply after {} attempts, ejecting {} act={} dest={}",
                    head.attempts, head.frame.family, head.frame.action, head.frame.destination
                );
                self.requests.pop_front();
                self.aborted += 1;
                continue;
            }

            let heard = inbound_count - head.written_at_message.unwrap_or(inbound_count);
            let quiet = heard <= self.policy.min_inbound_between_writes;
            if (quiet || bus_busy) && head.skips < self.policy.max_skips {
                head.skips += 1;
                let defer = self.policy.defer_interval();
                head.next_due = Some(now + defer);
                debug!("Defer {} act={} skip {}", head.frame.family, head.frame.action, head.skips);
                return WriteDecision::Wait(defer);
            }

            head.skips = 0;
            head.attempts += 1;
            head.last_write_at = Some(now);
            head.next_due = Some(now + self.policy.retry_interval());
            if head.attempts == self.policy.warn_after_attempts {
                warn!(
                    "Retry {} for {} act={} dest={}",
                    head.attempts, head.frame.family, head.frame.action, head.frame.destination
                );
            } else {
                debug!("TX {} act={} attempt {}", head.frame.family, head.frame.action, head.attempts);
            }
            return WriteDecision::Write(head.bytes.clone());
        }
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(WritePolicyConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn pump(action: u8, payload: Vec<u8>) -> Frame {
        Frame::standard(ProtocolFamily::Pump, 0, 96, 33, action, payload)
    }

    fn reply(action: u8, payload: Vec<u8>) -> Frame {
        Frame::standard(ProtocolFamily::Pump, 0, 33, 96, action, payload)
    }

    fn chatter() -> Frame {
        Frame::standard(ProtocolFamily::Controller, 1, 15, 16, 2, vec![0; 29])
    }

    fn write_bytes(decision: WriteDecision) -> Vec<u8> {
        match decision {
            WriteDecision::Write(bytes) => bytes,
            other => panic!("expected write, got {:?}", other),
        }
    }

    // ========== enqueue ==========

    #[test]
    fn test_hold_is_fifo() {
        let now = Instant::now();
        let mut q = OutboundQueue::default();
        q.enqueue(pump(4, vec![255]), EnqueuePolicy::Hold, now);
        q.enqueue(pump(7, vec![]), EnqueuePolicy::Hold, now);
        assert_eq!(q.len(), 2);
        assert_eq!(q.pending().unwrap().frame.action, 4);
    }

    #[test]
    fn test_supersede_replaces_same_key_in_place() {
        let now = Instant::now();
        let mut q = OutboundQueue::default();
        q.enqueue(pump(4, vec![255]), EnqueuePolicy::Hold, now);
        q.enqueue(pump(1, vec![2, 196, 0x05, 0xDC]), EnqueuePolicy::Hold, now);
        q.enqueue(pump(1, vec![2, 196, 0x07, 0xD0]), EnqueuePolicy::Supersede, now);
        assert_eq!(q.len(), 2);
        let second = q.iter().nth(1).unwrap();
        assert_eq!(second.frame.payload, vec![2, 196, 0x07, 0xD0]);
    }

    #[test]
    fn test_supersede_distinguishes_pump_registers() {
        let now = Instant::now();
        let mut q = OutboundQueue::default();
        q.enqueue(pump(1, vec![3, 33, 0, 8]), EnqueuePolicy::Supersede, now);
        q.enqueue(pump(1, vec![3, 39, 0x07, 0xD0]), EnqueuePolicy::Supersede, now);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_supersede_resets_in_flight_attempts() {
        let now = Instant::now();
        let mut q = OutboundQueue::default();
        q.enqueue(pump(7, vec![]), EnqueuePolicy::Supersede, now);
        write_bytes(q.poll_write(now, false));
        assert_eq!(q.pending().unwrap().attempts, 1);
        q.enqueue(pump(7, vec![]), EnqueuePolicy::Supersede, now);
        assert_eq!(q.len(), 1);
        assert_eq!(q.pending().unwrap().attempts, 0);
    }

    // ========== correlation ==========

    #[test]
    fn test_ack_ejects_only_after_write() {
        let now = Instant::now();
        let mut q = OutboundQueue::default();
        q.enqueue(pump(7, vec![]), EnqueuePolicy::Hold, now);
        // status seen before our write is not our reply
        assert!(q.on_inbound(&reply(7, vec![0; 15])).is_none());
        write_bytes(q.poll_write(now, false));
        let done = q.on_inbound(&reply(7, vec![0; 15])).unwrap();
        assert_eq!(done.frame.action, 7);
        assert!(q.is_empty());
        assert_eq!(q.acked_count(), 1);
    }

    #[test]
    fn test_single_in_flight() {
        let now = Instant::now();
        let mut q = OutboundQueue::default();
        q.enqueue(pump(4, vec![255]), EnqueuePolicy::Hold, now);
        q.enqueue(pump(7, vec![]), EnqueuePolicy::Hold, now);
        let first = write_bytes(q.poll_write(now, false));
        assert_eq!(first[7], 4);
        // the second request is not written while the first is unanswered
        assert!(matches!(q.poll_write(now, false), WriteDecision::Wait(_)));
        q.on_inbound(&reply(4, vec![255])).unwrap();
        let second = write_bytes(q.poll_write(now, false));
        assert_eq!(second[7], 7);
    }

    // ========== retry policy ==========

    #[test]
    fn test_retry_waits_then_defers_then_forces() {
        let start = Instant::now();
        let mut q = OutboundQueue::default();
        q.enqueue(pump(7, vec![]), EnqueuePolicy::Hold, start);
        write_bytes(q.poll_write(start, false));

        assert_eq!(
            q.poll_write(start + Duration::from_millis(100), false),
            WriteDecision::Wait(Duration::from_millis(75))
        );

        // quiet bus: two deferrals, then the third poll writes
        let t1 = start + Duration::from_millis(175);
        assert_eq!(q.poll_write(t1, false), WriteDecision::Wait(Duration::from_millis(150)));
        let t2 = t1 + Duration::from_millis(150);
        assert_eq!(q.poll_write(t2, false), WriteDecision::Wait(Duration::from_millis(150)));
        let t3 = t2 + Duration::from_millis(150);
        write_bytes(q.poll_write(t3, false));
        assert_eq!(q.pending().unwrap().attempts, 2);
    }

    #[test]
    fn test_busy_chatter_allows_immediate_retry() {
        let start = Instant::now();
        let mut q = OutboundQueue::default();
        q.enqueue(pump(7, vec![]), EnqueuePolicy::Hold, start);
        write_bytes(q.poll_write(start, false));
        for _ in 0..5 {
            assert!(q.on_inbound(&chatter()).is_none());
        }
        write_bytes(q.poll_write(start + Duration::from_millis(175), false));
    }

    #[test]
    fn test_inbound_counted_from_first_write() {
        let start = Instant::now();
        let mut q = OutboundQueue::default();
        q.enqueue(pump(7, vec![]), EnqueuePolicy::Hold, start);
        write_bytes(q.poll_write(start, false));
        for _ in 0..5 {
            q.on_inbound(&chatter());
        }
        let t1 = start + Duration::from_millis(175);
        write_bytes(q.poll_write(t1, false));

        // no new traffic, but five messages have passed since the first write
        let t2 = t1 + Duration::from_millis(175);
        write_bytes(q.poll_write(t2, false));
        assert_eq!(q.pending().unwrap().attempts, 3);
    }

    #[test]
    fn test_buffered_bytes_defer_retry() {
        let start = Instant::now();
        let mut q = OutboundQueue::default();
        q.enqueue(pump(7, vec![]), EnqueuePolicy::Hold, start);
        write_bytes(q.poll_write(start, false));
        for _ in 0..5 {
            q.on_inbound(&chatter());
        }
        let t1 = start + Duration::from_millis(175);
        assert_eq!(q.poll_write(t1, true), WriteDecision::Wait(Duration::from_millis(150)));
    }

    #[test]
    #[traced_test]
    fn test_abort_after_max_attempts() {
        let mut now = Instant::now();
        let mut q = OutboundQueue::default();
        q.enqueue(pump(7, vec![]), EnqueuePolicy::Hold, now);
        q.enqueue(pump(4, vec![255]), EnqueuePolicy::Hold, now);

        let mut writes = 0;
        while q.pending().map(|r| r.frame.action) == Some(7) {
            for _ in 0..5 {
                q.on_inbound(&chatter());
            }
            match q.poll_write(now, false) {
                WriteDecision::Write(bytes) => {
                    if bytes[7] == 7 {
                        writes += 1;
                    }
                },
                WriteDecision::Wait(d) => now += d,
                WriteDecision::Idle => break,
            }
        }
        assert_eq!(writes, 10);
        assert_eq!(q.aborted_count(), 1);
        assert_eq!(q.pending().unwrap().frame.action, 4);
        assert!(logs_contain("Retry 5"));
        assert!(logs_contain("No reply after 10 attempts"));
    }

    #[test]
    fn test_write_error_ejects() {
        let now = Instant::now();
        let mut q = OutboundQueue::default();
        q.enqueue(pump(7, vec![]), EnqueuePolicy::Hold, now);
        write_bytes(q.poll_write(now, false));
        assert!(q.on_write_error("port gone").is_some());
        assert!(q.is_empty());
        assert_eq!(q.poll_write(now, false), WriteDecision::Idle);
    }

    #[test]
    fn test_clear() {
        let now = Instant::now();
        let mut q = OutboundQueue::default();
        q.enqueue(pump(7, vec![]), EnqueuePolicy::Hold, now);
        q.clear();
        assert!(q.pending().is_none());
    }
}
