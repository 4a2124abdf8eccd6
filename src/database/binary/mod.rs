//! Little-endian record codec shared by every dump format.
//!
//! Legacy and local dumps are flat sequences of fixed-width integers, floats,
//! and length-prefixed strings. [`BinaryReader`] decodes them from an
//! in-memory buffer and fails fast on truncation, [`BinaryWriter`] produces
//! the same encoding for the formats this crate saves.

pub mod reader;
pub mod writer;

pub use reader::BinaryReader;
pub use writer::{BinaryWriter, write_atomic};

use thiserror::Error;

/// Marker byte preceding a non-empty ULEB128-prefixed string.
pub const STRING_PRESENT: u8 = 0x0b;
/// Marker byte for an empty ULEB128-prefixed string.
pub const STRING_EMPTY: u8 = 0x00;

/// Length prefix used by a string field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPrefix {
    /// Marker byte followed by a ULEB128 length (osu! style).
    Uleb128,
    /// Plain 4-byte little-endian length.
    FixedU32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BinaryError {
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    TruncatedInput { needed: usize, remaining: usize },
    #[error("string length {length} exceeds the {remaining} remaining bytes")]
    InvalidStringLength { length: u64, remaining: usize },
    #[error("invalid string marker 0x{0:02x}")]
    InvalidMarker(u8),
    #[error("ULEB128 value does not fit in 64 bits")]
    InvalidUleb128,
    #[error("invalid beatmap hash {0:?}")]
    InvalidHash(String),
}
