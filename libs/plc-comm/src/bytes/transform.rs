//! Typed value <-> device byte conversion
//!
//! A [`ByteTransform`] is the byte-order policy of one device object. It
//! decodes the raw bytes a read returned into typed values and encodes typed
//! values into the bytes a write sends.
//!
//! | Kind           | 16-bit | 32/64-bit default |
//! |----------------|--------|-------------------|
//! | `Regular`      | LE     | DCBA              |
//! | `ReverseBytes` | BE     | ABCD              |
//! | `ReverseWord`  | BE     | CDAB              |

use serde::{Deserialize, Serialize};

use super::bit_ops::{bools_to_bytes, bytes_to_bools};
use super::data_format::DataFormat;
use crate::error::{CommError, Result};

/// Byte-order family of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Little-endian, the host order of x86 devices and most PC-based runtimes
    #[default]
    Regular,
    /// Big-endian throughout
    ReverseBytes,
    /// Big-endian words, least significant word first
    ReverseWord,
}

impl TransformKind {
    /// Sub-word ordering implied by the kind
    pub fn default_format(self) -> DataFormat {
        match self {
            TransformKind::Regular => DataFormat::LittleEndian,
            TransformKind::ReverseBytes => DataFormat::BigEndian,
            TransformKind::ReverseWord => DataFormat::BigEndianSwap,
        }
    }
}

/// Text encodings supported for string reads/writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringEncoding {
    /// 7-bit ASCII, non-ASCII characters become `?`
    #[default]
    Ascii,
    Utf8,
    /// UTF-16 little-endian
    #[serde(alias = "unicode")]
    Utf16Le,
    Utf16Be,
}

/// Byte-order policy of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteTransform {
    kind: TransformKind,
    data_format: DataFormat,
    string_byte_swap: bool,
}

impl Default for ByteTransform {
    fn default() -> Self {
        Self::new(TransformKind::Regular)
    }
}

/// Generates the array/scalar decoder and the encoder of one numeric type.
macro_rules! numeric_conversions {
    ($ty:ty, $size:expr, $to:ident, $to_array:ident, $from:ident) => {
        #[doc = concat!("Decode `count` `", stringify!($ty), "` values starting at byte `index`")]
        pub fn $to_array(&self, buffer: &[u8], index: usize, count: usize) -> Result<Vec<$ty>> {
            let bytes = checked_slice(buffer, index, count, $size)?;
            Ok(bytes
                .chunks_exact($size)
                .map(|chunk| {
                    let mut raw = [0u8; $size];
                    raw.copy_from_slice(chunk);
                    <$ty>::from_be_bytes(self.device_order(raw))
                })
                .collect())
        }

        #[doc = concat!("Decode one `", stringify!($ty), "` at byte `index`")]
        pub fn $to(&self, buffer: &[u8], index: usize) -> Result<$ty> {
            Ok(self.$to_array(buffer, index, 1)?[0])
        }

        #[doc = concat!("Encode `", stringify!($ty), "` values in device order")]
        pub fn $from(&self, values: &[$ty]) -> Vec<u8> {
            let mut out = Vec::with_capacity(values.len() * $size);
            for value in values {
                out.extend_from_slice(&self.device_order(value.to_be_bytes()));
            }
            out
        }
    };
}

impl ByteTransform {
    pub fn new(kind: TransformKind) -> Self {
        Self {
            kind,
            data_format: kind.default_format(),
            string_byte_swap: false,
        }
    }

    /// Override the sub-word ordering of 32/64-bit values
    pub fn with_data_format(mut self, data_format: DataFormat) -> Self {
        self.data_format = data_format;
        self
    }

    /// Swap each character pair of strings (two chars per word, low char first)
    pub fn with_string_byte_swap(mut self, swap: bool) -> Self {
        self.string_byte_swap = swap;
        self
    }

    pub fn kind(&self) -> TransformKind {
        self.kind
    }

    pub fn data_format(&self) -> DataFormat {
        self.data_format
    }

    pub fn set_data_format(&mut self, data_format: DataFormat) {
        self.data_format = data_format;
    }

    pub fn string_byte_swap(&self) -> bool {
        self.string_byte_swap
    }

    pub fn set_string_byte_swap(&mut self, swap: bool) {
        self.string_byte_swap = swap;
    }

    /// Map between big-endian value bytes and device bytes.
    ///
    /// Each mapping is an involution, so it serves both directions.
    fn device_order<const N: usize>(&self, mut raw: [u8; N]) -> [u8; N] {
        match N {
            2 => {
                if self.kind == TransformKind::Regular {
                    raw.reverse();
                }
                raw
            },
            4 => {
                let mut b = [0u8; 4];
                b.copy_from_slice(&raw);
                raw.copy_from_slice(&self.data_format.reorder_4(b));
                raw
            },
            8 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&raw);
                raw.copy_from_slice(&self.data_format.reorder_8(b));
                raw
            },
            _ => raw,
        }
    }

    numeric_conversions!(i16, 2, to_i16, to_i16_array, from_i16);
    numeric_conversions!(u16, 2, to_u16, to_u16_array, from_u16);
    numeric_conversions!(i32, 4, to_i32, to_i32_array, from_i32);
    numeric_conversions!(u32, 4, to_u32, to_u32_array, from_u32);
    numeric_conversions!(i64, 8, to_i64, to_i64_array, from_i64);
    numeric_conversions!(u64, 8, to_u64, to_u64_array, from_u64);
    numeric_conversions!(f32, 4, to_f32, to_f32_array, from_f32);
    numeric_conversions!(f64, 8, to_f64, to_f64_array, from_f64);

    /// Decode `count` flags packed LSB-first starting at byte `index`
    pub fn to_bool_array(&self, buffer: &[u8], index: usize, count: usize) -> Result<Vec<bool>> {
        let bytes = checked_slice(buffer, index, count.div_ceil(8), 1)?;
        Ok(bytes_to_bools(bytes, count))
    }

    /// Pack flags LSB-first, zero-padding the last byte
    pub fn from_bool_array(&self, values: &[bool]) -> Vec<u8> {
        bools_to_bytes(values)
    }

    /// Decode `length` bytes at `index` as text, trimming trailing NULs
    pub fn to_string(
        &self,
        buffer: &[u8],
        index: usize,
        length: usize,
        encoding: StringEncoding,
    ) -> Result<String> {
        let mut bytes = checked_slice(buffer, index, length, 1)?.to_vec();
        if self.string_byte_swap {
            swap_pairs(&mut bytes);
        }

        let text: String = match encoding {
            StringEncoding::Ascii => bytes
                .iter()
                .map(|b| if b.is_ascii() { *b as char } else { '?' })
                .collect(),
            StringEncoding::Utf8 => String::from_utf8_lossy(&bytes).into_owned(),
            StringEncoding::Utf16Le | StringEncoding::Utf16Be => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| match encoding {
                        StringEncoding::Utf16Le => u16::from_le_bytes([c[0], c[1]]),
                        _ => u16::from_be_bytes([c[0], c[1]]),
                    })
                    .collect();
                String::from_utf16_lossy(&units)
            },
        };
        Ok(text.trim_end_matches('\0').to_string())
    }

    /// Encode text in the given encoding
    pub fn from_string(&self, value: &str, encoding: StringEncoding) -> Vec<u8> {
        let mut bytes: Vec<u8> = match encoding {
            StringEncoding::Ascii => value
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
            StringEncoding::Utf8 => value.as_bytes().to_vec(),
            StringEncoding::Utf16Le => value.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            StringEncoding::Utf16Be => value.encode_utf16().flat_map(u16::to_be_bytes).collect(),
        };
        if self.string_byte_swap {
            swap_pairs(&mut bytes);
        }
        bytes
    }
}

/// Bounds-checked view of `count` elements of `size` bytes at `index`
fn checked_slice(buffer: &[u8], index: usize, count: usize, size: usize) -> Result<&[u8]> {
    let end = count
        .checked_mul(size)
        .and_then(|len| len.checked_add(index))
        .filter(|end| *end <= buffer.len())
        .ok_or_else(|| {
            CommError::out_of_range(format!(
                "{} x {} bytes at offset {} exceeds buffer of {} bytes",
                count,
                size,
                index,
                buffer.len()
            ))
        })?;
    Ok(&buffer[index..end])
}

fn swap_pairs(bytes: &mut [u8]) {
    for pair in bytes.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [TransformKind; 3] = [
        TransformKind::Regular,
        TransformKind::ReverseBytes,
        TransformKind::ReverseWord,
    ];

    #[test]
    fn test_i16_layout() {
        assert_eq!(ByteTransform::new(TransformKind::Regular).from_i16(&[0x1234]), vec![0x34, 0x12]);
        assert_eq!(
            ByteTransform::new(TransformKind::ReverseBytes).from_i16(&[0x1234]),
            vec![0x12, 0x34]
        );
        assert_eq!(
            ByteTransform::new(TransformKind::ReverseWord).from_i16(&[0x1234]),
            vec![0x12, 0x34]
        );
    }

    #[test]
    fn test_i32_layout_per_kind() {
        let value = 0x1234_5678u32;
        assert_eq!(
            ByteTransform::new(TransformKind::Regular).from_u32(&[value]),
            vec![0x78, 0x56, 0x34, 0x12]
        );
        assert_eq!(
            ByteTransform::new(TransformKind::ReverseBytes).from_u32(&[value]),
            vec![0x12, 0x34, 0x56, 0x78]
        );
        assert_eq!(
            ByteTransform::new(TransformKind::ReverseWord).from_u32(&[value]),
            vec![0x56, 0x78, 0x12, 0x34]
        );
    }

    #[test]
    fn test_data_format_override() {
        let transform =
            ByteTransform::new(TransformKind::Regular).with_data_format(DataFormat::LittleEndianSwap);
        assert_eq!(transform.from_u32(&[0x1234_5678]), vec![0x34, 0x12, 0x78, 0x56]);
        assert_eq!(transform.to_u32(&[0x34, 0x12, 0x78, 0x56], 0).unwrap(), 0x1234_5678);
    }

    #[test]
    fn test_round_trip_all_kinds() {
        for kind in KINDS {
            let t = ByteTransform::new(kind);

            let i16s = [0, -1, i16::MIN, i16::MAX, 254];
            assert_eq!(t.to_i16_array(&t.from_i16(&i16s), 0, i16s.len()).unwrap(), i16s);

            let u16s = [0, 1, u16::MAX];
            assert_eq!(t.to_u16_array(&t.from_u16(&u16s), 0, u16s.len()).unwrap(), u16s);

            let i32s = [0, -1, i32::MIN, i32::MAX];
            assert_eq!(t.to_i32_array(&t.from_i32(&i32s), 0, i32s.len()).unwrap(), i32s);

            let u32s = [0, u32::MAX, 0x0102_0304];
            assert_eq!(t.to_u32_array(&t.from_u32(&u32s), 0, u32s.len()).unwrap(), u32s);

            let i64s = [0, -1, i64::MIN, i64::MAX];
            assert_eq!(t.to_i64_array(&t.from_i64(&i64s), 0, i64s.len()).unwrap(), i64s);

            let u64s = [0, u64::MAX];
            assert_eq!(t.to_u64_array(&t.from_u64(&u64s), 0, u64s.len()).unwrap(), u64s);

            let f32s = [0.0f32, -1.5, f32::MIN, f32::MAX];
            assert_eq!(t.to_f32_array(&t.from_f32(&f32s), 0, f32s.len()).unwrap(), f32s);

            let f64s = [0.0f64, -2.25, f64::MIN, f64::MAX];
            assert_eq!(t.to_f64_array(&t.from_f64(&f64s), 0, f64s.len()).unwrap(), f64s);
        }
    }

    #[test]
    fn test_offset_decode() {
        let t = ByteTransform::new(TransformKind::ReverseBytes);
        let buffer = [0xFF, 0xFF, 0x00, 0xFE];
        assert_eq!(t.to_i16(&buffer, 2).unwrap(), 254);
    }

    #[test]
    fn test_zero_count_is_empty() {
        let t = ByteTransform::default();
        assert!(t.to_i32_array(&[], 0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_out_of_range() {
        let t = ByteTransform::default();
        let err = t.to_i32_array(&[0, 1, 2, 3, 4], 2, 1).unwrap_err();
        assert!(matches!(err, CommError::OutOfRange(_)));
        assert!(t.to_u64_array(&[0; 8], usize::MAX, 1).is_err());
    }

    #[test]
    fn test_bool_array() {
        let t = ByteTransform::default();
        let packed = t.from_bool_array(&[true, false, false, true]);
        assert_eq!(packed, vec![0x09]);
        assert_eq!(t.to_bool_array(&packed, 0, 4).unwrap(), vec![true, false, false, true]);
        assert!(t.to_bool_array(&packed, 0, 9).is_err());
    }

    #[test]
    fn test_strings() {
        let t = ByteTransform::default();
        assert_eq!(t.from_string("Ab\u{e9}", StringEncoding::Ascii), b"Ab?".to_vec());
        assert_eq!(t.to_string(b"AB\0\0", 0, 4, StringEncoding::Ascii).unwrap(), "AB");
        assert_eq!(t.to_string(b"AB  ", 0, 4, StringEncoding::Ascii).unwrap(), "AB  ");

        let utf16 = t.from_string("Hi", StringEncoding::Utf16Le);
        assert_eq!(utf16, vec![b'H', 0, b'i', 0]);
        assert_eq!(t.to_string(&utf16, 0, 4, StringEncoding::Utf16Le).unwrap(), "Hi");
        assert_eq!(
            t.to_string(&[0, b'O', 0, b'K'], 0, 4, StringEncoding::Utf16Be).unwrap(),
            "OK"
        );
    }

    #[test]
    fn test_string_byte_swap() {
        let t = ByteTransform::new(TransformKind::ReverseWord).with_string_byte_swap(true);
        assert_eq!(t.from_string("ABCD", StringEncoding::Ascii), b"BADC".to_vec());
        assert_eq!(t.to_string(b"BADC", 0, 4, StringEncoding::Ascii).unwrap(), "ABCD");
    }
}
