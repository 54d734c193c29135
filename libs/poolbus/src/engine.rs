//! Protocol engine
//!
//! Composition root for one bus: every inbound byte, every outbound
//! command and every virtual-controller tick goes through a single
//! [`ProtocolEngine`]. It is synchronous and owns all mutable state, so
//! the service serializes access with one lock and decoders never race
//! with timers.
//!
//! # Architecture
//!
//! ```text
//! process_bytes(chunk)
//!   └─► FrameReassembler ─► FrameClassifier ─► counter++
//!         ─► SearchHook (copy) ─► OutboundQueue::on_inbound (ack)
//!         ─► ActionDecoderRegistry ─► EquipmentState ─► ChangeNotifier
//!
//! send_*(cmd) / timers ─► CommandBuilder ─► OutboundQueue
//! poll_write(now) ─► WriteDecision for the writer task
//! ```

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::classifier::FrameClassifier;
use crate::commands::{ChlorinatorCommand, CommandBuilder, ControllerCommand, PumpCommand};
use crate::config::EngineConfig;
use crate::constants::{CONTROLLER_GET_OFFSET, CONTROLLER_SET_ACTIONS};
use crate::decoders::{ActionDecoderRegistry, DecodeContext, Dispatch};
use crate::error::{PoolBusError, Result};
use crate::frame::{Frame, ProtocolFamily};
use crate::notify::{update, ChangeEvent, ChangeNotifier, ChangeSet, EntityKind};
use crate::queue::{EnqueuePolicy, OutboundQueue, WriteDecision};
use crate::reassembler::FrameReassembler;
use crate::search::{SearchFilter, SearchHook};
use crate::state::{EquipmentProfile, EquipmentState};
use crate::timers::{ChlorinatorTimer, PumpTimer, RunKind};

/// Diagnostic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub messages: u64,
    pub checksum_errors: u64,
    pub bytes_discarded: u64,
    pub unhandled: u64,
    pub acked: u64,
    pub aborted: u64,
    pub queued: usize,
}

pub struct ProtocolEngine {
    config: EngineConfig,
    reassembler: FrameReassembler,
    classifier: FrameClassifier,
    queue: OutboundQueue,
    registry: ActionDecoderRegistry,
    state: EquipmentState,
    builder: CommandBuilder,
    notifier: ChangeNotifier,
    search: SearchHook,
    pump_timers: BTreeMap<u8, PumpTimer>,
    chlorinator_timer: Option<ChlorinatorTimer>,
    messages: u64,
    unhandled: u64,
}

impl ProtocolEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            reassembler: FrameReassembler::new(config.max_standard_frame_len),
            classifier: FrameClassifier::new(config.pump_address_base, config.pump_address_count),
            queue: OutboundQueue::new(config.write.clone()),
            registry: ActionDecoderRegistry::new(),
            state: EquipmentState::new(EquipmentProfile::unknown(config.feature_base_circuit)),
            builder: CommandBuilder::new(&config),
            notifier: ChangeNotifier::default(),
            search: SearchHook::default(),
            pump_timers: BTreeMap::new(),
            chlorinator_timer: None,
            messages: 0,
            unhandled: 0,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &EquipmentState {
        &self.state
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    pub fn builder(&self) -> &CommandBuilder {
        &self.builder
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<ChangeEvent>> {
        self.notifier.subscribe()
    }

    pub fn stats(&self) -> EngineStats {
        let reassembly = self.reassembler.stats();
        EngineStats {
            messages: self.messages,
            checksum_errors: reassembly.checksum_errors,
            bytes_discarded: reassembly.bytes_discarded,
            unhandled: self.unhandled,
            acked: self.queue.acked_count(),
            aborted: self.queue.aborted_count(),
            queued: self.queue.len(),
        }
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Feed a chunk from the transport; returns the number of frames processed
    pub fn process_bytes(&mut self, chunk: &[u8], now: Instant) -> usize {
        self.reassembler.push(chunk);
        let mut processed = 0;
        while let Some(raw) = self.reassembler.next_frame() {
            let Some(frame) = self.classifier.classify(&raw) else {
                continue;
            };
            self.process_frame(frame, now);
            processed += 1;
        }
        processed
    }

    fn process_frame(&mut self, mut frame: Frame, now: Instant) {
        self.messages += 1;
        frame.counter = self.messages;
        trace!("RX {}", frame);

        let mut changes = ChangeSet::new();
        if frame.family == ProtocolFamily::Controller {
            self.builder.set_controller_preamble(frame.preamble);
            let changed = update(&mut self.state.controller.preamble, Some(frame.preamble));
            changes.record_if(changed, EntityKind::Controller, 0);
        }

        self.search.inspect(&frame);
        self.queue.on_inbound(&frame);

        let mut ctx = DecodeContext {
            state: &mut self.state,
            changes: &mut changes,
            now,
            pump_address_base: self.config.pump_address_base,
            pump_address_count: self.config.pump_address_count,
            chlorinator_comm_loss: self.config.chlorinator_comm_loss(),
        };
        if self.registry.dispatch(&frame, &mut ctx) == Dispatch::Unhandled {
            self.unhandled += 1;
        }
        self.notifier.publish(changes);
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Queue a built frame, adding a follow-up get for panel set commands when configured
    pub fn enqueue(&mut self, frame: Frame, policy: EnqueuePolicy, now: Instant) {
        let follow_up = (self.config.follow_up_get
            && frame.family == ProtocolFamily::Controller
            && CONTROLLER_SET_ACTIONS.contains(&frame.action))
        .then(|| {
            self.builder
                .controller_frame(frame.action + CONTROLLER_GET_OFFSET, vec![0])
        });

        self.queue.enqueue(frame, policy, now);
        if let Some(get) = follow_up {
            self.queue.enqueue(get, EnqueuePolicy::Hold, now);
        }
    }

    pub fn send_pump(&mut self, index: u8, command: PumpCommand, now: Instant) -> Result<()> {
        let frame = self.builder.pump(index, command)?;
        self.enqueue(frame, EnqueuePolicy::Hold, now);
        Ok(())
    }

    pub fn send_controller(&mut self, command: ControllerCommand, now: Instant) -> Result<()> {
        let frame = self.builder.controller(command)?;
        self.enqueue(frame, EnqueuePolicy::Hold, now);
        Ok(())
    }

    pub fn send_chlorinator(&mut self, command: ChlorinatorCommand, now: Instant) -> Result<()> {
        let frame = self.builder.chlorinator(command)?;
        self.enqueue(frame, EnqueuePolicy::Hold, now);
        Ok(())
    }

    /// Next action for the writer task
    pub fn poll_write(&mut self, now: Instant) -> WriteDecision {
        let bus_busy = self.reassembler.buffered() > 0;
        self.queue.poll_write(now, bus_busy)
    }

    pub fn on_write_error(&mut self, reason: &str) {
        self.queue.on_write_error(reason);
    }

    /// Forget partial input and queued commands after a reconnect
    pub fn reset_link(&mut self) {
        info!("Link reset: {} queued command(s) dropped", self.queue.len());
        self.reassembler.reset();
        self.queue.clear();
    }

    // ========================================================================
    // Search hook
    // ========================================================================

    pub fn enable_search(&mut self, filter: SearchFilter) -> broadcast::Receiver<Frame> {
        info!("Search enabled: {:?}", filter);
        self.search.enable(filter);
        self.search.subscribe()
    }

    pub fn disable_search(&mut self) {
        self.search.disable();
    }

    // ========================================================================
    // Virtual pump controller
    // ========================================================================

    /// Put pump `index` under virtual control (idle status polling)
    pub fn enable_virtual_pump(&mut self, index: u8) -> Result<()> {
        self.builder.pump_address(index)?;
        self.pump_timers
            .entry(index)
            .or_insert_with(|| PumpTimer::new(index));
        Ok(())
    }

    pub fn pump_timer(&self, index: u8) -> Option<&PumpTimer> {
        self.pump_timers.get(&index)
    }

    /// Run pump `index` for `duration_minutes` (-1 = until stopped)
    pub fn start_pump_timer(&mut self, index: u8, run: RunKind, duration_minutes: f64, now: Instant) -> Result<()> {
        // validate addressing and ranges before touching the timer
        self.builder.pump(index, run.command())?;
        self.enable_virtual_pump(index)?;
        let commands = self
            .pump_timers
            .get_mut(&index)
            .ok_or_else(|| PoolBusError::invalid_command(format!("pump {} not virtual", index)))?
            .start(run, duration_minutes)?;
        self.issue_pump_commands(index, commands, now)
    }

    pub fn stop_pump_timer(&mut self, index: u8, now: Instant) -> Result<()> {
        let Some(timer) = self.pump_timers.get_mut(&index) else {
            return Err(PoolBusError::invalid_command(format!("pump {} not virtual", index)));
        };
        let commands = timer.stop();
        self.issue_pump_commands(index, commands, now)
    }

    /// One 30 second tick for every virtual pump; returns frames queued
    pub fn tick_pumps(&mut self, now: Instant) -> usize {
        let indexes: Vec<u8> = self.pump_timers.keys().copied().collect();
        let mut queued = 0;
        for index in indexes {
            let commands = match self.pump_timers.get_mut(&index) {
                Some(timer) => timer.tick(),
                None => continue,
            };
            queued += commands.len();
            if let Err(e) = self.issue_pump_commands(index, commands, now) {
                debug!("Pump {} tick failed: {}", index, e);
            }
        }
        queued
    }

    fn issue_pump_commands(&mut self, index: u8, commands: Vec<PumpCommand>, now: Instant) -> Result<()> {
        for command in commands {
            let frame = self.builder.pump(index, command)?;
            self.enqueue(frame, EnqueuePolicy::Supersede, now);
        }

        let remaining = self.pump_timers.get(&index).map(PumpTimer::remaining).unwrap_or(0.0);
        let mut changes = ChangeSet::new();
        if let Some(pump) = self.state.pump_mut(index) {
            let changed = update(&mut pump.run_time_minutes, remaining);
            changes.record_if(changed, EntityKind::Pump, index);
        }
        self.notifier.publish(changes);
        Ok(())
    }

    // ========================================================================
    // Virtual chlorinator controller
    // ========================================================================

    pub fn enable_virtual_chlorinator(&mut self) {
        if self.chlorinator_timer.is_none() {
            info!("Virtual chlorinator controller enabled");
            self.chlorinator_timer = Some(ChlorinatorTimer::new(&self.config.timers));
        }
    }

    pub fn chlorinator_timer(&self) -> Option<&ChlorinatorTimer> {
        self.chlorinator_timer.as_ref()
    }

    /// Change the desired chlorinator output (0..=101, 101 = super-chlorinate)
    pub fn set_chlorinator_output(&mut self, output: u8) -> Result<bool> {
        self.enable_virtual_chlorinator();
        match self.chlorinator_timer.as_mut() {
            Some(timer) => timer.set_desired_output(output),
            None => Ok(false),
        }
    }

    /// Run the chlorinator timer if due. Returns when it next wants to run.
    pub fn poll_chlorinator(&mut self, now: Instant) -> Option<Instant> {
        let timer = self.chlorinator_timer.as_mut()?;
        let commands = timer.poll(now);
        let next_due = timer.next_due();

        if !commands.is_empty() {
            let threshold = self.config.chlorinator_comm_loss();
            let mut changes = ChangeSet::new();
            if let Some(chlor) = self.state.chlorinator_mut(1) {
                let changed = chlor.check_comm_loss(now, threshold);
                changes.record_if(changed, EntityKind::Chlorinator, 1);
            }
            self.notifier.publish(changes);
        }

        for command in commands {
            match self.builder.chlorinator(command) {
                Ok(frame) => self.enqueue(frame, EnqueuePolicy::Supersede, now),
                Err(e) => debug!("Chlorinator command rejected: {}", e),
            }
        }
        next_due
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::constants::CHLOR_STATUS_LOST_COMM;
    use std::time::Duration;

    fn engine() -> ProtocolEngine {
        ProtocolEngine::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            pump_address_count: 0,
            ..Default::default()
        };
        assert!(ProtocolEngine::new(config).is_err());
    }

    #[test]
    fn test_counter_and_preamble_recorded() {
        let mut engine = engine();
        let now = Instant::now();
        let frame = Frame::standard(ProtocolFamily::Controller, 0x24, 15, 16, 5, vec![10, 30, 1, 2, 3, 26, 0, 0]);
        assert_eq!(engine.process_bytes(&frame.to_wire(), now), 1);
        assert_eq!(engine.stats().messages, 1);
        assert_eq!(engine.builder().controller_preamble(), 0x24);
        assert_eq!(engine.state().controller.preamble, Some(0x24));
        assert_eq!(engine.state().controller.hour, 10);
    }

    #[tokio::test]
    async fn test_changes_published_once_per_frame() {
        let mut engine = engine();
        let mut rx = engine.subscribe();
        let frame = Frame::standard(ProtocolFamily::Controller, 33, 15, 16, 5, vec![10, 30, 1, 2, 3, 26, 0, 0]);
        engine.process_bytes(&frame.to_wire(), Instant::now());
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch, vec![ChangeEvent::new(EntityKind::Controller, 0)]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_follow_up_get() {
        let mut engine = ProtocolEngine::new(EngineConfig {
            follow_up_get: true,
            ..Default::default()
        })
        .unwrap();
        let now = Instant::now();
        engine
            .send_controller(ControllerCommand::SetCircuit { circuit: 6, on: true }, now)
            .unwrap();
        let actions: Vec<u8> = engine.queue().iter().map(|r| r.frame.action).collect();
        assert_eq!(actions, vec![134, 198]);
        assert_eq!(engine.queue().iter().nth(1).unwrap().frame.payload, vec![0]);

        let mut plain = self::engine();
        plain
            .send_controller(ControllerCommand::SetCircuit { circuit: 6, on: true }, now)
            .unwrap();
        assert_eq!(plain.queue().len(), 1);
    }

    #[test]
    fn test_pump_timer_supersedes() {
        let mut engine = engine();
        let now = Instant::now();
        engine.start_pump_timer(1, RunKind::Rpm(2000), 2.0, now).unwrap();
        assert_eq!(engine.queue().len(), 4);
        engine.tick_pumps(now + Duration::from_secs(30));
        // same command keys replace in place
        assert_eq!(engine.queue().len(), 4);
        assert_eq!(engine.state().pump(1).unwrap().run_time_minutes, 1.5);
    }

    #[test]
    fn test_pump_timer_rejects_bad_input() {
        let mut engine = engine();
        let now = Instant::now();
        assert!(engine.start_pump_timer(1, RunKind::Rpm(5000), 2.0, now).is_err());
        assert!(engine.start_pump_timer(17, RunKind::Rpm(2000), 2.0, now).is_err());
        assert!(engine.stop_pump_timer(2, now).is_err());
        assert!(engine.queue().is_empty());
    }

    #[test]
    fn test_chlorinator_poll() {
        let mut engine = engine();
        let now = Instant::now();
        assert_eq!(engine.poll_chlorinator(now), None);

        engine.set_chlorinator_output(30).unwrap();
        let next = engine.poll_chlorinator(now).unwrap();
        assert_eq!(next, now + Duration::from_secs(4));
        let actions: Vec<u8> = engine.queue().iter().map(|r| r.frame.action).collect();
        assert_eq!(actions, vec![20, 17]);
        assert_eq!(engine.state().chlorinator(1).unwrap().status, CHLOR_STATUS_LOST_COMM);
    }

    #[test]
    fn test_reset_link() {
        let mut engine = engine();
        let now = Instant::now();
        engine.send_pump(1, PumpCommand::Status, now).unwrap();
        engine.process_bytes(&[0xFF, 0xA5, 0x00], now);
        engine.reset_link();
        assert!(engine.queue().is_empty());
        assert_eq!(engine.poll_write(now), WriteDecision::Idle);
    }
}
