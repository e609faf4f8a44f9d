//! Sub-word ordering for 32/64-bit values
//!
//! PLC vendors disagree on how the bytes of a multi-word value are laid out
//! in consecutive addresses. `DataFormat` names the layout with ABCD notation
//! (A is the most significant byte) so the same enum can be read from
//! configuration files.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CommError;

/// Byte/word order of 32 and 64-bit values
///
/// `0x12345678` is stored as `12 34 56 78` (ABCD), `78 56 34 12` (DCBA),
/// `56 78 12 34` (CDAB) or `34 12 78 56` (BADC). 64-bit values follow the
/// same pattern over four words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataFormat {
    /// ABCD
    #[default]
    #[serde(alias = "ABCD", alias = "big_endian")]
    BigEndian,

    /// DCBA
    #[serde(alias = "DCBA", alias = "little_endian")]
    LittleEndian,

    /// CDAB, big-endian words with the low word first
    #[serde(alias = "CDAB", alias = "big_endian_swap")]
    BigEndianSwap,

    /// BADC, byte-swapped words with the high word first
    #[serde(alias = "BADC", alias = "little_endian_swap")]
    LittleEndianSwap,
}

impl DataFormat {
    pub const ALL: [DataFormat; 4] = [
        DataFormat::BigEndian,
        DataFormat::LittleEndian,
        DataFormat::BigEndianSwap,
        DataFormat::LittleEndianSwap,
    ];

    /// Four-letter layout name
    pub fn abcd(&self) -> &'static str {
        match self {
            Self::BigEndian => "ABCD",
            Self::LittleEndian => "DCBA",
            Self::BigEndianSwap => "CDAB",
            Self::LittleEndianSwap => "BADC",
        }
    }

    /// Reorder 4 bytes between big-endian value order and wire order.
    ///
    /// Every layout is its own inverse, so the same call encodes and decodes.
    pub fn reorder_4(&self, b: [u8; 4]) -> [u8; 4] {
        match self {
            Self::BigEndian => b,                                  // ABCD
            Self::LittleEndian => [b[3], b[2], b[1], b[0]],        // DCBA
            Self::BigEndianSwap => [b[2], b[3], b[0], b[1]],       // CDAB
            Self::LittleEndianSwap => [b[1], b[0], b[3], b[2]],    // BADC
        }
    }

    /// Reorder 8 bytes between big-endian value order and wire order.
    pub fn reorder_8(&self, b: [u8; 8]) -> [u8; 8] {
        match self {
            Self::BigEndian => b, // ABCDEFGH
            Self::LittleEndian => [b[7], b[6], b[5], b[4], b[3], b[2], b[1], b[0]], // HGFEDCBA
            Self::BigEndianSwap => [b[6], b[7], b[4], b[5], b[2], b[3], b[0], b[1]], // GHEFCDAB
            Self::LittleEndianSwap => [b[1], b[0], b[3], b[2], b[5], b[4], b[7], b[6]], // BADCFEHG
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abcd())
    }
}

impl FromStr for DataFormat {
    type Err = CommError;

    /// Accepts the four-letter layouts (dashes ignored) plus `BE`/`LE`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let layout: String = s
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        match layout.as_str() {
            "BE" | "ABCDEFGH" => Ok(Self::BigEndian),
            "LE" | "HGFEDCBA" => Ok(Self::LittleEndian),
            other => Self::ALL
                .into_iter()
                .find(|format| format.abcd() == other)
                .ok_or_else(|| CommError::config(format!("Unknown data format: {s}"))),
        }
    }
}
