//! Built-in name tables used by panel configuration records

/// Circuit names selectable on the panel, indexed by name id
const CIRCUIT_NAMES: [&str; 102] = [
    "Not Used", "Aerator", "Air Blower", "AUX 1", "AUX 2", "AUX 3", "AUX 4", "AUX 5", "AUX 6",
    "AUX 7", "AUX 8", "AUX 9", "AUX 10", "Backwash", "Back Light", "BBQ Light", "Beach Light",
    "Booster Pump", "Bug Light", "Cabana Lights", "Chemical Feeder", "Chlorinator", "Cleaner",
    "Color Wheel", "Deck Light", "Drain Line", "Drive Light", "Edge Pump", "Entry Light", "Fan",
    "Fiber Optic", "Fiber Works", "Fill Line", "Floor Cleaner", "Fogger", "Fountain",
    "Fountain 1", "Fountain 2", "Fountain 3", "Fountains", "Front Light", "Garden Lights",
    "Gazebo Lights", "High Speed", "Hi-Temp", "House Light", "Jets", "Lights", "Low Speed",
    "Lo-Temp", "Malibu Lights", "Mist", "Music", "Not Used", "Ozonator", "Path Lights",
    "Patio Lights", "Perimeter Light", "PG2000", "Pond Light", "Pool Pump", "Pool", "Pool High",
    "Pool Light", "Pool Low", "SAM", "Pool SAM 1", "Pool SAM 2", "Pool SAM 3", "Security Light",
    "Slide", "Solar", "Spa", "Spa High", "Spa Light", "Spa Low", "Spa SAL", "Spa SAM",
    "Spa Waterfall", "Spillway", "Sprinklers", "Stream", "Statue Light", "Swim Jets",
    "Water Feature", "Water Feature Light", "Waterfall", "Waterfall 1", "Waterfall 2",
    "Waterfall 3", "Whirlpool", "Waterfall Light", "Yard Light", "AUX EXTRA", "Feature 1",
    "Feature 2", "Feature 3", "Feature 4", "Feature 5", "Feature 6", "Feature 7", "Feature 8",
];

/// First name id that refers to the custom name table
pub const CUSTOM_NAME_BASE: u8 = 200;

/// Number of custom name slots
pub const CUSTOM_NAME_COUNT: u8 = 10;

pub fn builtin_circuit_name(id: u8) -> Option<&'static str> {
    CIRCUIT_NAMES.get(id as usize).copied()
}

/// Slot in the custom name table for a circuit name id, if it refers to one
pub fn custom_name_slot(id: u8) -> Option<u8> {
    (CUSTOM_NAME_BASE..CUSTOM_NAME_BASE + CUSTOM_NAME_COUNT)
        .contains(&id)
        .then(|| id - CUSTOM_NAME_BASE)
}

/// Circuit function (type) description
pub fn circuit_function_name(function: u8) -> &'static str {
    match function {
        0 => "Generic",
        1 => "Spa",
        2 => "Pool",
        5 => "Master Cleaner",
        7 => "Light",
        9 => "SAM Light",
        10 => "SAL Light",
        11 => "Photon Gen",
        12 => "Color Wheel",
        13 => "Valve",
        14 => "Spillway",
        15 => "Floor Cleaner",
        16 => "Intellibrite",
        17 => "Magicstream",
        19 => "Not Used",
        _ => "Unknown",
    }
}

/// Day names for the schedule day bitmask (bit 0 = Sunday)
pub const DAY_NAMES: [&str; 7] = ["Sunday", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday"];

pub fn days_from_mask(mask: u8) -> Vec<&'static str> {
    DAY_NAMES
        .iter()
        .enumerate()
        .filter(|(i, _)| mask & (1 << i) != 0)
        .map(|(_, name)| *name)
        .collect()
}

/// Chlorinator status bit descriptions
pub fn chlorinator_status_flags(status: u8) -> Vec<&'static str> {
    const FLAGS: [(u8, &str); 8] = [
        (1, "Low Flow"),
        (2, "Low Salt"),
        (4, "Very Low Salt"),
        (8, "High Current"),
        (16, "Clean Cell"),
        (32, "Low Voltage"),
        (64, "Water Temp Low"),
        (128, "Comm Lost"),
    ];
    FLAGS
        .iter()
        .filter(|(bit, _)| status & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        assert_eq!(builtin_circuit_name(0), Some("Not Used"));
        assert_eq!(builtin_circuit_name(61), Some("Pool"));
        assert_eq!(builtin_circuit_name(72), Some("Spa"));
        assert_eq!(builtin_circuit_name(101), Some("Feature 8"));
        assert_eq!(builtin_circuit_name(102), None);
    }

    #[test]
    fn test_custom_name_slot() {
        assert_eq!(custom_name_slot(199), None);
        assert_eq!(custom_name_slot(200), Some(0));
        assert_eq!(custom_name_slot(209), Some(9));
        assert_eq!(custom_name_slot(210), None);
    }

    #[test]
    fn test_days_and_flags() {
        assert_eq!(days_from_mask(0b0100_0001), vec!["Sunday", "Saturday"]);
        assert_eq!(chlorinator_status_flags(0x12), vec!["Low Salt", "Clean Cell"]);
        assert!(chlorinator_status_flags(0).is_empty());
    }
}
