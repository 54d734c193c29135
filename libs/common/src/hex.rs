//! Hex dumps for frame tracing

use std::fmt::Write;

/// Space-separated uppercase hex: `[0xFF, 0xA5, 0x00]` -> `"FF A5 00"`
pub fn encode_spaced(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            result.push(' ');
        }
        // writing to a String cannot fail
        let _ = write!(&mut result, "{:02X}", byte);
    }
    result
}
