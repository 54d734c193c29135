//! Pool Bus - RS-485 protocol engine for pool and spa equipment
//!
//! Decodes the shared half-duplex bus used by pool panels, variable-speed
//! pumps and salt chlorinators, keeps a live model of the installation,
//! and queues outbound commands with retry and acknowledgement tracking.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   bytes    ┌──────────────────┐  RawFrame  ┌─────────────────┐
//! │  transport   │──────────► │ FrameReassembler │──────────► │ FrameClassifier │
//! └──────────────┘            └──────────────────┘            └────────┬────────┘
//!        ▲                                                             │ Frame
//!        │ WriteDecision                                               ▼
//! ┌──────┴───────┐  ack   ┌───────────────┐          ┌───────────────────────────┐
//! │ OutboundQueue│◄────── │ AckCorrelator │◄──────── │  ActionDecoderRegistry    │
//! └──────▲───────┘        └───────────────┘          └─────────────┬─────────────┘
//!        │ frames                                                  │ ChangeSet
//! ┌──────┴───────┐        ┌───────────────┐          ┌─────────────▼─────────────┐
//! │CommandBuilder│◄────── │ Pump/Chlor    │          │ EquipmentState            │
//! └──────────────┘        │ timers        │          │  └─► ChangeNotifier        │
//!                         └───────────────┘          └───────────────────────────┘
//! ```
//!
//! [`ProtocolEngine`] wires these together and is the only type a service
//! normally needs.

pub mod bit_ops;
pub mod checksum;
pub mod classifier;
pub mod commands;
pub mod config;
pub mod constants;
pub mod correlator;
pub mod decoders;
pub mod engine;
pub mod error;
pub mod frame;
pub mod notify;
pub mod queue;
pub mod reassembler;
pub mod search;
pub mod state;
pub mod timers;

pub use classifier::FrameClassifier;
pub use commands::{ChlorinatorCommand, CommandBuilder, ControllerCommand, ControllerQuery, PumpCommand};
pub use config::{EngineConfig, TimerConfig, WritePolicyConfig};
pub use engine::{EngineStats, ProtocolEngine};
pub use error::{PoolBusError, Result};
pub use frame::{Frame, FrameGrammar, ProtocolFamily, RawFrame};
pub use notify::{ChangeEvent, ChangeSet, EntityKind};
pub use queue::{EnqueuePolicy, OutboundQueue, WriteDecision};
pub use reassembler::FrameReassembler;
pub use search::SearchFilter;
pub use state::{EquipmentProfile, EquipmentState};
pub use timers::RunKind;
