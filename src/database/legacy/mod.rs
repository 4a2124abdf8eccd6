//! Decoders for the binary dumps that feed the stores.
//!
//! Every format starts with a version integer and lays its records out
//! differently depending on it. Each decoder maps the version onto a layout
//! enum first and then reads the field list for that layout; versions newer
//! than the last known layout are refused instead of guessed at.
//!
//! - [`stable_maps`]: osu!stable `osu!.db` (read only)
//! - [`local_maps`]: this client's own `maps.db` (read/write)
//! - [`scores`]: osu!stable `scores.db` (read only) and the local score dump
//! - [`collections`]: `collection.db` and the local collection dump
//! - [`mcosu`]: `scores.db` from McOsu and early neosu builds (read only)

pub mod collections;
pub mod local_maps;
pub mod mcosu;
pub mod scores;
pub mod stable_maps;

use crate::database::binary::BinaryError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error(transparent)]
    Binary(#[from] BinaryError),
    #[error("unsupported {format} version {version} (newest known is {newest})")]
    UnsupportedFormatVersion {
        format: &'static str,
        version: u32,
        newest: u32,
    },
    #[error("bad magic bytes in {0}")]
    InvalidMagic(&'static str),
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

impl ParseError {
    pub fn is_truncation(&self) -> bool {
        matches!(self, ParseError::Binary(BinaryError::TruncatedInput { .. }))
    }
}

/// Windows ticks (100ns since 0001-01-01) of the unix epoch.
const UNIX_EPOCH_TICKS: u64 = 621_355_968_000_000_000;

pub fn ticks_to_unix_seconds(ticks: u64) -> u64 {
    ticks.saturating_sub(UNIX_EPOCH_TICKS) / 10_000_000
}

pub fn unix_seconds_to_ticks(seconds: u64) -> u64 {
    seconds * 10_000_000 + UNIX_EPOCH_TICKS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_conversion() {
        assert_eq!(ticks_to_unix_seconds(UNIX_EPOCH_TICKS), 0);
        assert_eq!(ticks_to_unix_seconds(unix_seconds_to_ticks(1_700_000_000)), 1_700_000_000);
        assert_eq!(ticks_to_unix_seconds(0), 0);
    }
}
