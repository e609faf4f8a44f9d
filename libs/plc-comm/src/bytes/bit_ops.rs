//! Bit-level operations for PLC data
//!
//! Coil and relay areas come back packed eight flags per byte, LSB first.
//! Word areas addressed as `word.bit` need single-bit extraction from u16.

/// Extract single bit from u16 value
#[inline]
pub fn extract_bit_u16(value: u16, bit_index: u8) -> bool {
    debug_assert!(bit_index < 16, "Bit index out of range: {}", bit_index);
    (value & (1 << bit_index)) != 0
}

/// Read a single bit from a byte array (LSB-first within each byte)
///
/// Positions past the end of the array read as `false`.
#[inline]
pub fn get_bit(bytes: &[u8], bit_position: usize) -> bool {
    bytes
        .get(bit_position / 8)
        .is_some_and(|b| (b >> (bit_position % 8)) & 0x01 != 0)
}

/// Set a single bit in a byte array
#[inline]
pub fn set_bit(bytes: &mut [u8], bit_position: usize) {
    if let Some(b) = bytes.get_mut(bit_position / 8) {
        *b |= 1 << (bit_position % 8);
    }
}

/// Unpack `count` flags starting at bit 0
pub fn bytes_to_bools(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count).map(|i| get_bit(bytes, i)).collect()
}

/// Pack flags into bytes, eight per byte, LSB first
///
/// The last byte is zero-padded.
pub fn bools_to_bytes(values: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; values.len().div_ceil(8)];
    for (i, on) in values.iter().enumerate() {
        if *on {
            set_bit(&mut bytes, i);
        }
    }
    bytes
}
