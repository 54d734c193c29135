//! Service runtime
//!
//! # Architecture
//!
//! ```text
//!                      Arc<Mutex<ProtocolEngine>>
//!                 ┌──────────────┴───────────────┐
//!   link ─► reader task ─ process_bytes   writer task ─ poll_write ─► link
//!                 │                              ▲
//!                 └──── write_ready (Notify) ────┘
//!   pump timer ─ tick_pumps ─────────────────────┤
//!   chlorinator timer ─ poll_chlorinator ────────┤
//!   PoolHandle commands ─────────────────────────┘
//!   notification logger ◄─ ChangeNotifier
//! ```
//!
//! The engine lock is only taken for synchronous calls, never across an
//! `.await`.

use std::sync::Arc;
use std::time::Duration;

use common::hex::encode_spaced;
use parking_lot::Mutex;
use poolbus::{
    ChangeEvent, ChlorinatorCommand, ControllerCommand, EngineStats, EntityKind, Frame, ProtocolEngine,
    PumpCommand, RunKind, SearchFilter, WriteDecision,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::ServiceConfig;
use crate::error::{PoolSrvError, Result};
use crate::transport::{BusConnector, BusStream};

const READ_BUFFER_SIZE: usize = 1024;

/// Cloneable command and query surface over the running engine
#[derive(Clone)]
pub struct PoolHandle {
    engine: Arc<Mutex<ProtocolEngine>>,
    write_ready: Arc<Notify>,
    chlorinator_changed: Arc<Notify>,
}

impl PoolHandle {
    fn new(engine: ProtocolEngine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            write_ready: Arc::new(Notify::new()),
            chlorinator_changed: Arc::new(Notify::new()),
        }
    }

    fn queued<T>(&self, result: poolbus::Result<T>) -> Result<T> {
        let value = result?;
        self.write_ready.notify_one();
        Ok(value)
    }

    pub fn send_pump(&self, index: u8, command: PumpCommand) -> Result<()> {
        let result = self.engine.lock().send_pump(index, command, Instant::now());
        self.queued(result)
    }

    pub fn send_controller(&self, command: ControllerCommand) -> Result<()> {
        let result = self.engine.lock().send_controller(command, Instant::now());
        self.queued(result)
    }

    pub fn send_chlorinator(&self, command: ChlorinatorCommand) -> Result<()> {
        let result = self.engine.lock().send_chlorinator(command, Instant::now());
        self.queued(result)
    }

    /// Run pump `index` for `minutes` (-1 = until stopped)
    pub fn start_pump_timer(&self, index: u8, run: RunKind, minutes: f64) -> Result<()> {
        let result = self
            .engine
            .lock()
            .start_pump_timer(index, run, minutes, Instant::now());
        self.queued(result)
    }

    pub fn stop_pump_timer(&self, index: u8) -> Result<()> {
        let result = self.engine.lock().stop_pump_timer(index, Instant::now());
        self.queued(result)
    }

    /// Change the virtual chlorinator output; the timer reacts immediately
    pub fn set_chlorinator_output(&self, output: u8) -> Result<bool> {
        let changed = self.engine.lock().set_chlorinator_output(output)?;
        if changed {
            self.chlorinator_changed.notify_one();
        }
        Ok(changed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<ChangeEvent>> {
        self.engine.lock().subscribe()
    }

    pub fn enable_search(&self, filter: SearchFilter) -> broadcast::Receiver<Frame> {
        self.engine.lock().enable_search(filter)
    }

    pub fn disable_search(&self) {
        self.engine.lock().disable_search();
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.lock().stats()
    }

    /// Whole equipment model as JSON
    pub fn snapshot(&self) -> serde_json::Value {
        let engine = self.engine.lock();
        serde_json::to_value(engine.state()).unwrap_or(serde_json::Value::Null)
    }

    /// Current value of the entity named by a change event
    pub fn entity_json(&self, event: &ChangeEvent) -> Option<serde_json::Value> {
        let engine = self.engine.lock();
        let state = engine.state();
        let id = event.id;
        let value = match event.kind {
            EntityKind::Controller => serde_json::to_value(&state.controller),
            EntityKind::Profile => serde_json::to_value(&state.profile),
            EntityKind::Circuit => serde_json::to_value(state.circuit(id)?),
            EntityKind::Feature => serde_json::to_value(state.feature(id)?),
            EntityKind::Body => serde_json::to_value(state.body(id)?),
            EntityKind::Pump => serde_json::to_value(state.pump(id)?),
            EntityKind::Chlorinator => serde_json::to_value(state.chlorinator(id)?),
            EntityKind::Schedule => serde_json::to_value(state.schedule(id)?),
            EntityKind::CustomName => serde_json::to_value(state.custom_name(id)?),
        };
        value.ok()
    }
}

/// Bus service: owns the link and the background tasks
pub struct PoolService {
    config: ServiceConfig,
    handle: PoolHandle,
    token: CancellationToken,
}

impl PoolService {
    pub fn new(config: ServiceConfig, token: CancellationToken) -> Result<Self> {
        config.validate()?;
        let mut engine = ProtocolEngine::new(config.engine.clone())?;
        for &index in &config.virtual_controllers.pumps {
            engine.enable_virtual_pump(index)?;
            info!("Virtual pump controller: pump {}", index);
        }
        if config.virtual_controllers.chlorinator {
            engine.enable_virtual_chlorinator();
        }

        Ok(Self {
            config,
            handle: PoolHandle::new(engine),
            token,
        })
    }

    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// Run until the token is cancelled
    pub async fn run(self, connector: Arc<dyn BusConnector>) -> Result<()> {
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        tasks.push(tokio::spawn(notification_logger(self.handle(), self.token.clone())));
        if !self.config.virtual_controllers.pumps.is_empty() {
            let tick = self.config.engine.timers.pump_tick();
            tasks.push(tokio::spawn(pump_timer_task(self.handle(), tick, self.token.clone())));
        }
        if self.config.virtual_controllers.chlorinator {
            tasks.push(tokio::spawn(chlorinator_task(self.handle(), self.token.clone())));
        }

        self.link_loop(connector.as_ref()).await;

        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                error!("Background task failed: {}", e);
            }
        }
        info!("Bus stats at shutdown: {:?}", self.handle.stats());
        Ok(())
    }

    async fn link_loop(&self, connector: &dyn BusConnector) {
        let delay = self.config.serial.reconnect_delay();
        while !self.token.is_cancelled() {
            match connector.connect().await {
                Ok(stream) => {
                    info!("Bus link up: {}", connector.describe());
                    let result = self.drive(stream).await;
                    self.handle.engine.lock().reset_link();
                    match result {
                        Ok(()) => break,
                        Err(e) => warn!("Bus link lost: {}", e),
                    }
                },
                Err(e) => warn!("Bus link unavailable ({}): {}", connector.describe(), e),
            }

            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(delay) => debug!("Reconnecting to {}", connector.describe()),
            }
        }
    }

    /// Pump bytes both ways until the link fails (`Err`) or shutdown (`Ok`)
    async fn drive(&self, stream: Box<dyn BusStream>) -> Result<()> {
        let (reader, writer) = tokio::io::split(stream);
        tokio::select! {
            _ = self.token.cancelled() => Ok(()),
            result = read_loop(self.handle(), reader) => result,
            result = write_loop(self.handle(), writer) => result,
        }
    }
}

async fn read_loop<R: AsyncRead + Unpin>(handle: PoolHandle, mut reader: R) -> Result<()> {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(PoolSrvError::transport("link closed by peer"));
        }
        trace!("RX {}B: {}", n, encode_spaced(&buf[..n]));
        let frames = handle.engine.lock().process_bytes(&buf[..n], Instant::now());
        if frames > 0 {
            // an ack may have released the head of the queue
            handle.write_ready.notify_one();
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(handle: PoolHandle, mut writer: W) -> Result<()> {
    loop {
        let decision = handle.engine.lock().poll_write(Instant::now());
        match decision {
            WriteDecision::Write(bytes) => {
                trace!("TX {}", encode_spaced(&bytes));
                let written = async {
                    writer.write_all(&bytes).await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = written {
                    handle.engine.lock().on_write_error(&e.to_string());
                    return Err(e.into());
                }
            },
            WriteDecision::Wait(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {},
                    _ = handle.write_ready.notified() => {},
                }
            },
            WriteDecision::Idle => handle.write_ready.notified().await,
        }
    }
}

async fn pump_timer_task(handle: PoolHandle, tick: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let queued = handle.engine.lock().tick_pumps(Instant::now());
                if queued > 0 {
                    handle.write_ready.notify_one();
                }
            },
        }
    }
    debug!("Pump timer stopped");
}

async fn chlorinator_task(handle: PoolHandle, token: CancellationToken) {
    loop {
        let next_due = handle.engine.lock().poll_chlorinator(Instant::now());
        handle.write_ready.notify_one();

        tokio::select! {
            _ = token.cancelled() => break,
            _ = handle.chlorinator_changed.notified() => {},
            _ = async {
                match next_due {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            } => {},
        }
    }
    debug!("Chlorinator timer stopped");
}

async fn notification_logger(handle: PoolHandle, token: CancellationToken) {
    let mut rx = handle.subscribe();
    loop {
        let batch = tokio::select! {
            _ = token.cancelled() => break,
            batch = rx.recv() => batch,
        };
        match batch {
            Ok(events) => {
                for event in events {
                    match handle.entity_json(&event) {
                        Some(value) => info!("{} {} changed: {}", event.kind, event.id, value),
                        None => debug!("{} {} changed", event.kind, event.id),
                    }
                }
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Notification logger lagged, {} batch(es) skipped", n)
            },
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
