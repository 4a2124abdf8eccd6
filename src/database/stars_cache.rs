//! Persisted nomod star ratings for raw-loaded beatmaps.
//!
//! Stored as a `bincode` payload compressed with Zstd, so difficulties
//! parsed straight from `.osu` files do not go through the map calc job again
//! on the next start.

use crate::database::binary::write_atomic;
use crate::database::models::BeatmapHash;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::Path;
use zstd::stream::{decode_all, encode_all};

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StarsFile {
    version: u32,
    entries: Vec<(BeatmapHash, f64)>,
}

#[derive(Debug, Default)]
pub struct StarsCache {
    stars: HashMap<BeatmapHash, f64>,
    dirty: bool,
}

fn invalid_data(context: &str, e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("{}: {}", context, e))
}

impl StarsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Missing file means an empty cache.
    pub fn load(path: &Path) -> io::Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e),
        };

        let binary_data = decode_all(file)?;
        let (data, _len): (StarsFile, usize) =
            bincode::serde::decode_from_slice(&binary_data, bincode::config::standard())
                .map_err(|e| invalid_data("Deserialization error", e))?;
        if data.version != FORMAT_VERSION {
            return Err(invalid_data("Unsupported stars cache version", data.version));
        }

        Ok(Self {
            stars: data.entries.into_iter().collect(),
            dirty: false,
        })
    }

    pub fn save(&mut self, path: &Path) -> io::Result<()> {
        let mut entries: Vec<_> = self.stars.iter().map(|(h, s)| (*h, *s)).collect();
        entries.sort_by_key(|(hash, _)| *hash);
        let data = StarsFile {
            version: FORMAT_VERSION,
            entries,
        };

        let binary_data = bincode::serde::encode_to_vec(&data, bincode::config::standard())
            .map_err(|e| invalid_data("Serialization error", e))?;
        let compressed = encode_all(&binary_data[..], 3)?;
        write_atomic(path, &compressed)?;
        self.dirty = false;
        Ok(())
    }

    pub fn get(&self, hash: &BeatmapHash) -> Option<f64> {
        self.stars.get(hash).copied()
    }

    /// Negative ratings mean "not computed" and are never stored.
    pub fn insert(&mut self, hash: BeatmapHash, stars: f64) {
        if stars < 0.0 || !stars.is_finite() {
            return;
        }
        if self.stars.insert(hash, stars) != Some(stars) {
            self.dirty = true;
        }
    }

    pub fn len(&self) -> usize {
        self.stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stars.cache");

        let mut cache = StarsCache::new();
        cache.insert(BeatmapHash([1; 16]), 5.25);
        cache.insert(BeatmapHash([2; 16]), -1.0);
        assert!(cache.is_dirty());
        cache.save(&path).unwrap();
        assert!(!cache.is_dirty());

        let loaded = StarsCache::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get(&BeatmapHash([1; 16])), Some(5.25));
        assert_eq!(loaded.get(&BeatmapHash([2; 16])), None);
    }

    #[test]
    fn missing_file_is_empty_and_garbage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(StarsCache::load(&dir.path().join("none")).unwrap().is_empty());

        let garbage = dir.path().join("garbage");
        std::fs::write(&garbage, b"not zstd").unwrap();
        assert!(StarsCache::load(&garbage).is_err());
    }
}
