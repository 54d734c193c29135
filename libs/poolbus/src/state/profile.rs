//! Panel model identification
//!
//! The panel status broadcast carries two model bytes. They select the
//! controller family and then one entry of that family's model table,
//! which fixes how many bodies, circuits, features, pumps and schedules
//! the installation can have.

use serde::{Deserialize, Serialize};

/// Status bitmap bytes 2..=6 carry circuits 1-40
const STATUS_CIRCUIT_IDS: u8 = 40;
/// Touch panels continue into bytes 7 and 8 for features 41-56
const TOUCH_BITMAP_IDS: u8 = 56;
/// IntelliTouch features occupy circuit ids 41..=50
const INTELLITOUCH_FEATURE_START: u8 = 41;
const INTELLITOUCH_FEATURES: u8 = 10;

/// Panel family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerType {
    Unknown,
    IntelliCenter,
    IntelliTouch,
    EasyTouch,
    SunTouch,
}

/// Installation limits and model description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentProfile {
    pub controller_type: ControllerType,
    pub model: String,
    pub max_bodies: u8,
    pub max_circuits: u8,
    pub max_features: u8,
    pub max_pumps: u8,
    pub max_chlorinators: u8,
    pub max_schedules: u8,
    pub shared: bool,
    pub single: bool,
    pub dual: bool,
    /// First circuit id reported as a feature in the status bitmap
    pub feature_start: u8,
}

impl EquipmentProfile {
    /// Lowest limits, used before any model frame has been seen
    pub fn unknown(feature_start: u8) -> Self {
        Self {
            controller_type: ControllerType::Unknown,
            model: "Unknown".to_string(),
            max_bodies: 1,
            max_circuits: 6,
            max_features: 8,
            max_pumps: 2,
            max_chlorinators: 1,
            max_schedules: 12,
            shared: false,
            single: false,
            dual: false,
            feature_start,
        }
    }

    /// Identify the panel from status payload bytes 27 (`model1`) and 28 (`model2`)
    pub fn identify(model1: u8, model2: u8) -> Option<Self> {
        if (model2 == 0 && (model1 == 23 || model1 >= 40)) || (model2 == 2 && model1 == 0) {
            return Some(Self::intellicenter());
        }
        match model2 {
            // IntelliTouch reports its personality in the second byte
            0..=5 => ModelEntry::find(INTELLITOUCH_MODELS, u16::from(model2)).map(|m| EquipmentProfile {
                max_features: INTELLITOUCH_FEATURES,
                ..m.to_profile(ControllerType::IntelliTouch, INTELLITOUCH_FEATURE_START)
            }),
            11 => ModelEntry::find(SUNTOUCH_MODELS, u16::from(model1))
                .map(|m| m.to_profile(ControllerType::SunTouch, 7)),
            13 | 14 => {
                let key = u16::from(model1) + if model2 == 14 { 128 } else { 0 };
                ModelEntry::find(EASYTOUCH_MODELS, key)
                    .map(|m| m.to_profile(ControllerType::EasyTouch, 11))
            },
            _ => None,
        }
    }

    fn intellicenter() -> Self {
        Self {
            controller_type: ControllerType::IntelliCenter,
            model: "IntelliCenter".to_string(),
            max_bodies: 2,
            max_circuits: 8,
            max_features: 32,
            max_pumps: 2,
            max_chlorinators: 1,
            max_schedules: 100,
            shared: true,
            single: false,
            dual: false,
            feature_start: 11,
        }
    }

    /// Map a status-bitmap circuit id to a feature id (1-based)
    pub fn feature_id(&self, circuit_id: u8) -> Option<u8> {
        if circuit_id < self.feature_start {
            return None;
        }
        let id = circuit_id - self.feature_start + 1;
        (id <= self.max_features).then_some(id)
    }

    /// Highest circuit id carried in the status bitmap
    pub fn max_bitmap_id(&self) -> u8 {
        let cap = match self.controller_type {
            ControllerType::IntelliCenter => STATUS_CIRCUIT_IDS,
            _ => TOUCH_BITMAP_IDS,
        };
        let feature_end = u16::from(self.feature_start) + u16::from(self.max_features) - 1;
        feature_end.max(u16::from(self.max_circuits)).min(u16::from(cap)) as u8
    }
}

impl Default for EquipmentProfile {
    fn default() -> Self {
        Self::unknown(crate::constants::DEFAULT_FEATURE_BASE_CIRCUIT)
    }
}

struct ModelEntry {
    key: u16,
    name: &'static str,
    circuits: u8,
    bodies: Option<u8>,
    features: Option<u8>,
    schedules: Option<u8>,
    pumps: Option<u8>,
    shared: bool,
    single: bool,
    dual: bool,
}

impl ModelEntry {
    const fn new(key: u16, name: &'static str, circuits: u8, shared: bool, single: bool) -> Self {
        Self {
            key,
            name,
            circuits,
            bodies: None,
            features: None,
            schedules: None,
            pumps: None,
            shared,
            single,
            dual: false,
        }
    }

    fn find(table: &'static [ModelEntry], key: u16) -> Option<&'static ModelEntry> {
        table.iter().find(|m| m.key == key)
    }

    fn to_profile(&self, controller_type: ControllerType, feature_start: u8) -> EquipmentProfile {
        EquipmentProfile {
            controller_type,
            model: self.name.to_string(),
            max_bodies: self
                .bodies
                .unwrap_or(if self.shared || self.dual { 2 } else { 1 }),
            max_circuits: self.circuits,
            max_features: self.features.unwrap_or(8),
            max_pumps: self.pumps.unwrap_or(2),
            max_chlorinators: 1,
            max_schedules: self.schedules.unwrap_or(12),
            shared: self.shared,
            single: self.single,
            dual: self.dual,
            feature_start,
        }
    }
}

const INTELLITOUCH_MODELS: &[ModelEntry] = &[
    ModelEntry::new(0, "IntelliTouch i5+3", 6, true, false),
    ModelEntry::new(1, "IntelliTouch i7+3", 8, true, false),
    ModelEntry::new(2, "IntelliTouch i9+3", 10, true, false),
    ModelEntry {
        bodies: Some(2),
        ..ModelEntry::new(3, "IntelliTouch i5+3S", 5, true, true)
    },
    ModelEntry {
        bodies: Some(2),
        ..ModelEntry::new(4, "IntelliTouch i9+3S", 9, true, true)
    },
    ModelEntry {
        dual: true,
        ..ModelEntry::new(5, "IntelliTouch i10D", 10, false, true)
    },
];

const SUNTOUCH_MODELS: &[ModelEntry] = &[
    ModelEntry {
        bodies: Some(2),
        features: Some(4),
        ..ModelEntry::new(40, "SunTouch Pool or Spa", 5, true, true)
    },
    ModelEntry {
        bodies: Some(2),
        features: Some(4),
        ..ModelEntry::new(41, "SunTouch Pool and Spa", 5, true, false)
    },
];

const EASYTOUCH_MODELS: &[ModelEntry] = &[
    ModelEntry::new(0, "EasyTouch2 8", 8, true, false),
    ModelEntry::new(1, "EasyTouch2 8P", 8, false, true),
    ModelEntry::new(2, "EasyTouch2 4", 4, true, false),
    ModelEntry::new(3, "EasyTouch2 4P", 4, false, true),
    ModelEntry {
        features: Some(2),
        schedules: Some(4),
        pumps: Some(1),
        ..ModelEntry::new(6, "EasyTouch PSL4", 4, true, false)
    },
    ModelEntry {
        features: Some(2),
        schedules: Some(4),
        pumps: Some(1),
        ..ModelEntry::new(7, "EasyTouch PL4", 4, false, true)
    },
    ModelEntry::new(128, "EasyTouch 8", 8, true, false),
    ModelEntry::new(129, "EasyTouch 8P", 8, false, true),
    ModelEntry::new(130, "EasyTouch 4", 4, true, false),
    ModelEntry::new(131, "EasyTouch 4P", 4, false, true),
];

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_unknown_defaults() {
        let p = EquipmentProfile::default();
        assert_eq!(p.controller_type, ControllerType::Unknown);
        assert_eq!(p.model, "Unknown");
        assert_eq!(p.max_bodies, 1);
        assert_eq!(p.max_circuits, 6);
        assert_eq!(p.max_pumps, 2);
        assert_eq!(p.max_schedules, 12);
    }

    #[test]
    fn test_easytouch_models() {
        let p = EquipmentProfile::identify(0, 13).unwrap();
        assert_eq!(p.controller_type, ControllerType::EasyTouch);
        assert_eq!(p.model, "EasyTouch2 8");
        assert_eq!(p.max_circuits, 8);
        assert_eq!(p.max_bodies, 2);

        let psl4 = EquipmentProfile::identify(6, 13).unwrap();
        assert_eq!(psl4.max_features, 2);
        assert_eq!(psl4.max_schedules, 4);
        assert_eq!(psl4.max_pumps, 1);

        let et4p = EquipmentProfile::identify(3, 14).unwrap();
        assert_eq!(et4p.model, "EasyTouch 4P");
        assert_eq!(et4p.max_bodies, 1);
        assert!(et4p.single);
    }

    #[test]
    fn test_intellitouch_models() {
        let p = EquipmentProfile::identify(1, 2).unwrap();
        assert_eq!(p.controller_type, ControllerType::IntelliTouch);
        assert_eq!(p.max_circuits, 10);
        assert_eq!(p.feature_start, 41);
        assert_eq!(p.max_features, 10);
        assert_eq!(p.feature_id(41), Some(1));
        assert_eq!(p.feature_id(50), Some(10));
        assert_eq!(p.feature_id(51), None);
        assert_eq!(p.max_bitmap_id(), 50);

        let dual = EquipmentProfile::identify(1, 5).unwrap();
        assert!(dual.dual);
        assert_eq!(dual.max_bodies, 2);
    }

    #[test]
    fn test_suntouch_and_intellicenter() {
        let st = EquipmentProfile::identify(41, 11).unwrap();
        assert_eq!(st.controller_type, ControllerType::SunTouch);
        assert_eq!(st.max_features, 4);
        assert_eq!(st.feature_start, 7);

        let ic = EquipmentProfile::identify(23, 0).unwrap();
        assert_eq!(ic.controller_type, ControllerType::IntelliCenter);
        assert_eq!(ic.max_features, 32);
        assert_eq!(ic.max_schedules, 100);
        assert_eq!(ic.max_bitmap_id(), 40);
        assert_eq!(EquipmentProfile::identify(0, 2).unwrap().controller_type, ControllerType::IntelliCenter);
    }

    #[test]
    fn test_unknown_model_bytes() {
        assert!(EquipmentProfile::identify(9, 13).is_none());
        assert!(EquipmentProfile::identify(0, 99).is_none());
    }

    #[test]
    fn test_feature_mapping() {
        let p = EquipmentProfile::identify(0, 13).unwrap();
        assert_eq!(p.feature_id(10), None);
        assert_eq!(p.feature_id(11), Some(1));
        assert_eq!(p.feature_id(18), Some(8));
        assert_eq!(p.feature_id(19), None);
        assert_eq!(p.max_bitmap_id(), 18);
    }
}
