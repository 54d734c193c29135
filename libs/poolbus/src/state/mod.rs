//! Equipment state model
//!
//! Long-lived view of the installation, rebuilt from bus traffic. Entities
//! are created on first reference and bounded by the active
//! [`EquipmentProfile`]: an id outside `1..=max_*` is never stored, so the
//! `*_mut` accessors return `None` for it and decoders skip the field.

pub mod names;
pub mod profile;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::constants::CHLOR_STATUS_LOST_COMM;

pub use profile::{ControllerType, EquipmentProfile};

/// Heat source selection for a body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatMode {
    #[default]
    Off,
    Heater,
    SolarPreferred,
    Solar,
}

impl HeatMode {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            1 => HeatMode::Heater,
            2 => HeatMode::SolarPreferred,
            3 => HeatMode::Solar,
            _ => HeatMode::Off,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            HeatMode::Off => 0,
            HeatMode::Heater => 1,
            HeatMode::SolarPreferred => 2,
            HeatMode::Solar => 3,
        }
    }
}

/// What is currently heating (or cooling) a body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum HeatStatus {
    #[default]
    Off,
    Heater,
    Solar,
    Cooling,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Circuit {
    pub id: u8,
    pub name: String,
    pub name_id: u8,
    pub is_on: bool,
    pub function: u8,
    pub freeze: bool,
    pub lighting_theme: Option<u8>,
    pub level: Option<u8>,
}

impl Circuit {
    fn new(id: u8) -> Self {
        Self {
            id,
            name: format!("Circuit {}", id),
            ..Default::default()
        }
    }

    pub fn function_name(&self) -> &'static str {
        names::circuit_function_name(self.function)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Feature {
    pub id: u8,
    /// Circuit id the panel uses for this feature in bitmaps and commands
    pub circuit_id: u8,
    pub name: String,
    pub is_on: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Body {
    pub id: u8,
    pub name: String,
    pub set_point: u8,
    pub heat_mode: HeatMode,
    pub heat_status: HeatStatus,
    pub temp: u8,
    pub is_on: bool,
    pub circuit_ref: u8,
}

impl Body {
    fn new(id: u8) -> Self {
        // body 1 is the pool on circuit 6, body 2 the spa on circuit 1
        let (name, circuit_ref) = match id {
            1 => ("Pool", 6),
            2 => ("Spa", 1),
            _ => ("Body", 0),
        };
        Self {
            id,
            name: name.to_string(),
            circuit_ref,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Pump {
    pub id: u8,
    pub address: u8,
    pub command: u8,
    pub mode: u8,
    pub drive_state: u8,
    pub watts: u16,
    pub rpm: u16,
    pub flow: u8,
    pub ppc: u8,
    pub status: u16,
    /// Pump clock in minutes after midnight
    pub time_minutes: u16,
    pub remote_control: bool,
    pub power: bool,
    /// Saved external program values 1..=4
    pub programs: [u16; 4],
    pub current_program: u8,
    /// Last value the pump acknowledged for a set command
    pub set_value: u16,
    /// Remaining run time of a virtual controller timer; -1 runs indefinitely
    pub run_time_minutes: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Chlorinator {
    pub id: u8,
    pub name: String,
    pub version: u8,
    pub installed: bool,
    pub salt_level: u16,
    pub current_output: u8,
    pub target_output: u8,
    pub status: u8,
    pub super_chlor: bool,
    pub super_chlor_hours: u8,
    pub pool_set_point: u8,
    pub spa_set_point: u8,
    #[serde(skip)]
    pub last_comm_at: Option<Instant>,
}

impl Chlorinator {
    fn new(id: u8) -> Self {
        Self {
            id,
            name: format!("Chlorinator {}", id),
            ..Default::default()
        }
    }

    /// The cell answered; clear a lost-comm status
    pub fn mark_comm(&mut self, now: Instant) {
        self.last_comm_at = Some(now);
        if self.status == CHLOR_STATUS_LOST_COMM {
            self.status = 0;
        }
    }

    /// Force lost-comm status if the cell has been silent longer than `threshold`.
    ///
    /// Returns true when the status changed.
    pub fn check_comm_loss(&mut self, now: Instant, threshold: Duration) -> bool {
        let stale = match self.last_comm_at {
            Some(at) => now.saturating_duration_since(at) > threshold,
            None => true,
        };
        if stale && self.status != CHLOR_STATUS_LOST_COMM {
            self.status = CHLOR_STATUS_LOST_COMM;
            return true;
        }
        false
    }

    pub fn status_flags(&self) -> Vec<&'static str> {
        names::chlorinator_status_flags(self.status)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ScheduleKind {
    #[default]
    Schedule,
    /// Runs the circuit for `end_hour:end_minute` after it is turned on
    EggTimer,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Schedule {
    pub id: u8,
    pub circuit: u8,
    pub kind: ScheduleKind,
    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,
    /// Day bitmask, bit 0 = Sunday
    pub days: u8,
}

impl Schedule {
    pub fn day_names(&self) -> Vec<&'static str> {
        names::days_from_mask(self.days)
    }
}

/// Panel-wide status fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ControllerStatus {
    pub hour: u8,
    pub minute: u8,
    pub day_of_week: u8,
    pub day: u8,
    pub month: u8,
    pub year: u8,
    pub adjust_dst: bool,
    pub mode: u8,
    pub celsius: bool,
    pub freeze: bool,
    pub delay: u8,
    pub air_temp: u8,
    pub solar_temp: u8,
    pub water_sensor1: u8,
    pub water_sensor2: u8,
    pub valves: u8,
    pub firmware: Option<String>,
    pub bootloader: Option<String>,
    pub preamble: Option<u8>,
}

/// The whole installation
#[derive(Debug, Clone, Default, Serialize)]
pub struct EquipmentState {
    pub profile: EquipmentProfile,
    pub controller: ControllerStatus,
    circuits: BTreeMap<u8, Circuit>,
    features: BTreeMap<u8, Feature>,
    bodies: BTreeMap<u8, Body>,
    pumps: BTreeMap<u8, Pump>,
    chlorinators: BTreeMap<u8, Chlorinator>,
    schedules: BTreeMap<u8, Schedule>,
    custom_names: BTreeMap<u8, String>,
}

fn in_bounds(id: u8, max: u8) -> bool {
    (1..=max).contains(&id)
}

impl EquipmentState {
    pub fn new(profile: EquipmentProfile) -> Self {
        Self {
            profile,
            ..Default::default()
        }
    }

    /// Install a new profile, dropping entities the new limits exclude
    pub fn set_profile(&mut self, profile: EquipmentProfile) {
        self.circuits.retain(|id, _| in_bounds(*id, profile.max_circuits));
        self.features.retain(|id, _| in_bounds(*id, profile.max_features));
        self.bodies.retain(|id, _| in_bounds(*id, profile.max_bodies));
        self.pumps.retain(|id, _| in_bounds(*id, profile.max_pumps));
        self.chlorinators.retain(|id, _| in_bounds(*id, profile.max_chlorinators));
        self.schedules.retain(|id, _| in_bounds(*id, profile.max_schedules));
        self.profile = profile;
    }

    // ========== Circuits ==========

    pub fn circuit(&self, id: u8) -> Option<&Circuit> {
        self.circuits.get(&id)
    }

    pub fn circuit_mut(&mut self, id: u8) -> Option<&mut Circuit> {
        if !in_bounds(id, self.profile.max_circuits) {
            return None;
        }
        Some(self.circuits.entry(id).or_insert_with(|| Circuit::new(id)))
    }

    pub fn circuits(&self) -> impl Iterator<Item = &Circuit> {
        self.circuits.values()
    }

    // ========== Features ==========

    pub fn feature(&self, id: u8) -> Option<&Feature> {
        self.features.get(&id)
    }

    /// Feature behind a status-bitmap circuit id
    pub fn feature_for_circuit_mut(&mut self, circuit_id: u8) -> Option<&mut Feature> {
        let id = self.profile.feature_id(circuit_id)?;
        Some(self.features.entry(id).or_insert_with(|| Feature {
            id,
            circuit_id,
            name: format!("Feature {}", id),
            is_on: false,
        }))
    }

    pub fn features(&self) -> impl Iterator<Item = &Feature> {
        self.features.values()
    }

    // ========== Bodies ==========

    pub fn body(&self, id: u8) -> Option<&Body> {
        self.bodies.get(&id)
    }

    pub fn body_mut(&mut self, id: u8) -> Option<&mut Body> {
        if !in_bounds(id, self.profile.max_bodies) {
            return None;
        }
        Some(self.bodies.entry(id).or_insert_with(|| Body::new(id)))
    }

    pub fn bodies(&self) -> impl Iterator<Item = &Body> {
        self.bodies.values()
    }

    // ========== Pumps ==========

    pub fn pump(&self, id: u8) -> Option<&Pump> {
        self.pumps.get(&id)
    }

    pub fn pump_mut(&mut self, id: u8) -> Option<&mut Pump> {
        if !in_bounds(id, self.profile.max_pumps) {
            return None;
        }
        Some(self.pumps.entry(id).or_insert_with(|| Pump {
            id,
            ..Default::default()
        }))
    }

    pub fn pumps(&self) -> impl Iterator<Item = &Pump> {
        self.pumps.values()
    }

    // ========== Chlorinators ==========

    pub fn chlorinator(&self, id: u8) -> Option<&Chlorinator> {
        self.chlorinators.get(&id)
    }

    pub fn chlorinator_mut(&mut self, id: u8) -> Option<&mut Chlorinator> {
        if !in_bounds(id, self.profile.max_chlorinators) {
            return None;
        }
        Some(self.chlorinators.entry(id).or_insert_with(|| Chlorinator::new(id)))
    }

    pub fn chlorinators(&self) -> impl Iterator<Item = &Chlorinator> {
        self.chlorinators.values()
    }

    // ========== Schedules ==========

    pub fn schedule(&self, id: u8) -> Option<&Schedule> {
        self.schedules.get(&id)
    }

    pub fn schedule_mut(&mut self, id: u8) -> Option<&mut Schedule> {
        if !in_bounds(id, self.profile.max_schedules) {
            return None;
        }
        Some(self.schedules.entry(id).or_insert_with(|| Schedule {
            id,
            ..Default::default()
        }))
    }

    pub fn schedules(&self) -> impl Iterator<Item = &Schedule> {
        self.schedules.values()
    }

    // ========== Names ==========

    pub fn custom_name(&self, index: u8) -> Option<&str> {
        self.custom_names.get(&index).map(String::as_str)
    }

    /// Returns false for an index outside the custom name table
    pub fn set_custom_name(&mut self, index: u8, name: String) -> bool {
        if index >= names::CUSTOM_NAME_COUNT {
            return false;
        }
        self.custom_names.insert(index, name);
        true
    }

    /// Resolve a circuit name id against the built-in and custom tables
    pub fn resolve_name(&self, name_id: u8) -> Option<String> {
        if let Some(slot) = names::custom_name_slot(name_id) {
            return Some(
                self.custom_name(slot)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Custom {}", slot + 1)),
            );
        }
        names::builtin_circuit_name(name_id).map(str::to_string)
    }
}
