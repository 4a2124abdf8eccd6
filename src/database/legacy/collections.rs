//! `collection.db` (osu!stable) and the local collection dump.

use super::ParseError;
use crate::database::binary::{BinaryReader, BinaryWriter, StringPrefix};
use crate::database::models::BeatmapHash;

const S: StringPrefix = StringPrefix::Uleb128;

pub const VERSION_INITIAL: u32 = 20240210;
pub const VERSION_DELETED_MAPS: u32 = 20240429;
pub const CURRENT_VERSION: u32 = VERSION_DELETED_MAPS;
pub const SUPPORTED_VERSIONS: [u32; 2] = [VERSION_INITIAL, VERSION_DELETED_MAPS];
/// Version McOsu writes; it shares the initial layout.
pub const VERSION_MCOSU: u32 = 20220110;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StableCollection {
    pub name: String,
    pub maps: Vec<BeatmapHash>,
}

/// A collection as this client saves it: its own additions, plus the
/// stable entries the user removed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalCollection {
    pub name: String,
    pub deleted_maps: Vec<BeatmapHash>,
    pub maps: Vec<BeatmapHash>,
}

fn read_hash_list(r: &mut BinaryReader<'_>, context: &str) -> Result<Vec<BeatmapHash>, ParseError> {
    let count = r.read_u32()? as usize;
    let mut hashes = Vec::with_capacity(count.min(r.remaining() / 34));
    for _ in 0..count {
        let text = r.read_string(S)?;
        match BeatmapHash::from_hex(&text) {
            Some(hash) => hashes.push(hash),
            None => log::warn!("DB: skipping invalid hash {:?} in collection {:?}", text, context),
        }
    }
    Ok(hashes)
}

pub fn decode_stable(bytes: &[u8]) -> Result<Vec<StableCollection>, ParseError> {
    let mut r = BinaryReader::new(bytes);
    let _version = r.read_u32()?;
    let count = r.read_u32()?;
    let mut collections = Vec::new();
    for _ in 0..count {
        let name = r.read_string(S)?;
        let maps = read_hash_list(&mut r, &name)?;
        collections.push(StableCollection { name, maps });
    }
    Ok(collections)
}

/// Reads the local dump, or a McOsu `collections.db`: every version before
/// [`VERSION_DELETED_MAPS`] uses the initial layout.
pub fn decode_local(bytes: &[u8]) -> Result<Vec<LocalCollection>, ParseError> {
    let mut r = BinaryReader::new(bytes);
    let version = r.read_u32()?;
    if version == 0 || version > CURRENT_VERSION {
        return Err(ParseError::UnsupportedFormatVersion {
            format: "collections.db",
            version,
            newest: CURRENT_VERSION,
        });
    }
    let count = r.read_u32()?;
    let mut collections = Vec::new();
    for _ in 0..count {
        let name = r.read_string(S)?;
        let deleted_maps = if version >= VERSION_DELETED_MAPS {
            read_hash_list(&mut r, &name)?
        } else {
            Vec::new()
        };
        let maps = read_hash_list(&mut r, &name)?;
        collections.push(LocalCollection {
            name,
            deleted_maps,
            maps,
        });
    }
    Ok(collections)
}

fn write_hash_list(w: &mut BinaryWriter, hashes: &[BeatmapHash]) {
    w.write_u32(hashes.len() as u32);
    for hash in hashes {
        w.write_hash_string(hash, S);
    }
}

pub fn encode_local(collections: &[LocalCollection], version: u32) -> Result<Vec<u8>, ParseError> {
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(ParseError::UnsupportedFormatVersion {
            format: "collections.db",
            version,
            newest: CURRENT_VERSION,
        });
    }
    let mut w = BinaryWriter::new();
    w.write_u32(version);
    w.write_u32(collections.len() as u32);
    for collection in collections {
        w.write_string(&collection.name, S);
        if version >= VERSION_DELETED_MAPS {
            write_hash_list(&mut w, &collection.deleted_maps);
        }
        write_hash_list(&mut w, &collection.maps);
    }
    Ok(w.into_bytes())
}

/// Stable format encoder, used to build fixtures.
pub fn encode_stable(collections: &[StableCollection], version: u32) -> Vec<u8> {
    let mut w = BinaryWriter::new();
    w.write_u32(version);
    w.write_u32(collections.len() as u32);
    for collection in collections {
        w.write_string(&collection.name, S);
        write_hash_list(&mut w, &collection.maps);
    }
    w.into_bytes()
}
