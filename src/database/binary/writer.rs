use super::{STRING_EMPTY, STRING_PRESENT, StringPrefix};
use crate::database::models::BeatmapHash;
use std::fs;
use std::io;
use std::path::Path;

/// Growable buffer producing the encoding [`super::BinaryReader`] decodes.
#[derive(Debug, Default, Clone)]
pub struct BinaryWriter {
    buf: Vec<u8>,
}

macro_rules! write_le {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self, value: $ty) {
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
    };
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    write_le!(write_u8, u8);
    write_le!(write_u16, u16);
    write_le!(write_u32, u32);
    write_le!(write_u64, u64);
    write_le!(write_i16, i16);
    write_le!(write_i32, i32);
    write_le!(write_i64, i64);
    write_le!(write_f32, f32);
    write_le!(write_f64, f64);

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_uleb128(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    pub fn write_string(&mut self, value: &str, prefix: StringPrefix) {
        match prefix {
            StringPrefix::FixedU32 => {
                // Dump strings are bounded far below 4 GiB.
                self.write_u32(value.len() as u32);
            }
            StringPrefix::Uleb128 => {
                if value.is_empty() {
                    self.buf.push(STRING_EMPTY);
                    return;
                }
                self.buf.push(STRING_PRESENT);
                self.write_uleb128(value.len() as u64);
            }
        }
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn write_hash_string(&mut self, hash: &BeatmapHash, prefix: StringPrefix) {
        self.write_string(&hash.to_string(), prefix);
    }

    pub fn write_raw_hash(&mut self, hash: &BeatmapHash) {
        self.buf.extend_from_slice(&hash.0);
    }
}

/// Writes `bytes` to a sibling `.tmp` file, then renames it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::binary::BinaryReader;

    #[test]
    fn uleb128_encoding_matches_reference_bytes() {
        let mut writer = BinaryWriter::new();
        writer.write_uleb128(624_485);
        assert_eq!(writer.into_bytes(), vec![0xe5, 0x8e, 0x26]);
    }

    #[test]
    fn strings_are_readable_back() {
        let mut writer = BinaryWriter::new();
        writer.write_string("", StringPrefix::Uleb128);
        writer.write_string(&"x".repeat(300), StringPrefix::Uleb128);
        writer.write_string("fixed", StringPrefix::FixedU32);
        let bytes = writer.into_bytes();

        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(reader.read_string(StringPrefix::Uleb128).unwrap(), "");
        assert_eq!(reader.read_string(StringPrefix::Uleb128).unwrap().len(), 300);
        assert_eq!(reader.read_string(StringPrefix::FixedU32).unwrap(), "fixed");
        assert!(reader.is_empty());
    }

    #[test]
    fn atomic_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.db");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!dir.path().join("nested").join("out.db.tmp").exists());
    }
}
