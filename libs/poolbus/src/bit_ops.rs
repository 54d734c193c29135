//! Bit-level helpers for status bitmaps and packed fields
//!
//! Panel status frames pack circuit states LSB-first: bit `i` of byte `n`
//! is circuit `base + 8n + i`.

/// Extract single bit from u8 value
#[inline]
pub fn extract_bit_u8(value: u8, bit_index: u8) -> bool {
    debug_assert!(bit_index < 8, "Bit index out of range: {}", bit_index);
    (value & (1 << bit_index)) != 0
}

/// Extract a masked field and shift it down to bit 0
#[inline]
pub fn extract_field(value: u8, mask: u8) -> u8 {
    if mask == 0 {
        return 0;
    }
    (value & mask) >> mask.trailing_zeros()
}

/// Walk an LSB-first on/off bitmap.
///
/// Yields `(id, is_on)` for ids `base_id..=max_id`, stopping early when the
/// bitmap runs out of bytes.
pub fn bitmap_states(bitmap: &[u8], base_id: u8, max_id: u8) -> impl Iterator<Item = (u8, bool)> + '_ {
    let count = usize::from(max_id.saturating_sub(base_id)) + 1;
    (0..count.min(bitmap.len() * 8)).map(move |offset| {
        let byte = bitmap[offset / 8];
        (base_id + offset as u8, extract_bit_u8(byte, (offset % 8) as u8))
    })
}

/// Pack `(id, is_on)` pairs back into a bitmap starting at `base_id`
pub fn pack_bitmap(states: impl IntoIterator<Item = (u8, bool)>, base_id: u8, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    for (id, on) in states {
        if !on || id < base_id {
            continue;
        }
        let offset = usize::from(id - base_id);
        if let Some(byte) = out.get_mut(offset / 8) {
            *byte |= 1 << (offset % 8);
        }
    }
    out
}
