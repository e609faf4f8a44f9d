//! Binary data processing utilities
//!
//! Converts between raw device buffers and typed values. Nothing here does
//! I/O; the transport layer hands buffers in and the vendor layer decides
//! how many bytes a value occupies on the wire.
//!
//! - `data_format`: sub-word ordering of 32/64-bit values (ABCD notation)
//! - `transform`: `ByteTransform`, the per-connection marshaling policy
//! - `bit_ops`: bool arrays packed LSB-first into bytes and words
//! - `hex`: ASCII-hex helpers used by text framed protocols

pub mod bit_ops;
pub mod data_format;
pub mod hex;
pub mod transform;

pub use data_format::DataFormat;
pub use transform::{ByteTransform, StringEncoding, TransformKind};
