//! Hex helpers
//!
//! HostLink carries every number as ASCII hex, and frame logging prints
//! uppercase hex, so both directions live here.

use std::fmt::Write;

use crate::error::{CommError, Result};

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Encode bytes to uppercase hex string
/// Example: [0x12, 0x34, 0xAB] -> "1234AB"
pub fn encode_upper(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 2);
    for byte in data {
        // Writing to String buffer is infallible
        let _ = write!(&mut result, "{:02X}", byte);
    }
    result
}

/// Encode bytes as uppercase ASCII hex digits (two per byte)
pub fn encode_ascii(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2);
    for byte in data {
        out.extend_from_slice(&ascii_hex_byte(*byte));
    }
    out
}

/// The two uppercase ASCII digits of one byte
#[inline]
pub fn ascii_hex_byte(value: u8) -> [u8; 2] {
    [
        HEX_DIGITS[(value >> 4) as usize],
        HEX_DIGITS[(value & 0x0F) as usize],
    ]
}

fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

/// Parse two ASCII hex digits into a byte
pub fn parse_hex_u8(digits: &[u8]) -> Result<u8> {
    match digits {
        [hi, lo] => match (nibble(*hi), nibble(*lo)) {
            (Some(h), Some(l)) => Ok((h << 4) | l),
            _ => Err(CommError::invalid_response(format!(
                "Invalid hex digits: {:?}",
                String::from_utf8_lossy(digits)
            ))),
        },
        _ => Err(CommError::invalid_response(format!(
            "Expected 2 hex digits, got {}",
            digits.len()
        ))),
    }
}

/// Decode ASCII hex (either case) into bytes
///
/// Odd-length input is rejected.
pub fn decode(digits: &[u8]) -> Result<Vec<u8>> {
    if digits.len() % 2 != 0 {
        return Err(CommError::invalid_response(format!(
            "Odd hex length: {}",
            digits.len()
        )));
    }
    digits.chunks_exact(2).map(parse_hex_u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_upper_basic() {
        assert_eq!(encode_upper(&[0x12, 0x34, 0xAB]), "1234AB");
        assert_eq!(encode_upper(&[]), "");
    }

    #[test]
    fn test_encode_ascii() {
        assert_eq!(encode_ascii(&[0x00, 0x0F, 0xFE]), b"000FFE".to_vec());
    }

    #[test]
    fn test_decode_mixed_case() {
        assert_eq!(decode(b"0aFf").unwrap(), vec![0x0A, 0xFF]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode(b"0G").is_err());
        assert!(decode(b"012").is_err());
        assert!(parse_hex_u8(b"1").is_err());
    }
}
