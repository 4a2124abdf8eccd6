use super::{BinaryError, STRING_EMPTY, STRING_PRESENT, StringPrefix};
use crate::database::models::BeatmapHash;

/// Cursor over a dump loaded in memory.
#[derive(Debug, Clone)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
}

macro_rules! read_le {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self) -> Result<$ty, BinaryError> {
            let bytes = self.take(std::mem::size_of::<$ty>())?;
            let mut buf = [0u8; std::mem::size_of::<$ty>()];
            buf.copy_from_slice(bytes);
            Ok(<$ty>::from_le_bytes(buf))
        }
    };
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], BinaryError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(BinaryError::TruncatedInput { needed, remaining });
        }
        let slice = &self.data[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    read_le!(read_u8, u8);
    read_le!(read_u16, u16);
    read_le!(read_u32, u32);
    read_le!(read_u64, u64);
    read_le!(read_i16, i16);
    read_le!(read_i32, i32);
    read_le!(read_i64, i64);
    read_le!(read_f32, f32);
    read_le!(read_f64, f64);

    pub fn read_bool(&mut self) -> Result<bool, BinaryError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], BinaryError> {
        self.take(len)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), BinaryError> {
        self.take(len).map(|_| ())
    }

    /// Reads an unsigned LEB128 integer: 7 bits per byte, high bit set on
    /// every byte but the last.
    pub fn read_uleb128(&mut self) -> Result<u64, BinaryError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 64 || (shift == 63 && byte & 0x7e != 0) {
                return Err(BinaryError::InvalidUleb128);
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn read_length(&mut self, prefix: StringPrefix) -> Result<Option<u64>, BinaryError> {
        match prefix {
            StringPrefix::FixedU32 => Ok(Some(u64::from(self.read_u32()?))),
            StringPrefix::Uleb128 => match self.read_u8()? {
                STRING_EMPTY => Ok(None),
                STRING_PRESENT => Ok(Some(self.read_uleb128()?)),
                other => Err(BinaryError::InvalidMarker(other)),
            },
        }
    }

    fn checked_len(&self, length: u64) -> Result<usize, BinaryError> {
        let remaining = self.remaining();
        match usize::try_from(length) {
            Ok(len) if len <= remaining => Ok(len),
            _ => Err(BinaryError::InvalidStringLength { length, remaining }),
        }
    }

    /// Reads a length-prefixed string. Invalid UTF-8 is replaced rather than
    /// rejected since dumps written by other clients are not always clean.
    pub fn read_string(&mut self, prefix: StringPrefix) -> Result<String, BinaryError> {
        let Some(length) = self.read_length(prefix)? else {
            return Ok(String::new());
        };
        let len = self.checked_len(length)?;
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn skip_string(&mut self, prefix: StringPrefix) -> Result<(), BinaryError> {
        if let Some(length) = self.read_length(prefix)? {
            let len = self.checked_len(length)?;
            self.skip(len)?;
        }
        Ok(())
    }

    /// Reads a hash written as a 32 character hex string.
    pub fn read_hash_string(&mut self, prefix: StringPrefix) -> Result<BeatmapHash, BinaryError> {
        let text = self.read_string(prefix)?;
        BeatmapHash::from_hex(text.trim()).ok_or(BinaryError::InvalidHash(text))
    }

    /// Reads a hash stored as its 16 raw bytes.
    pub fn read_raw_hash(&mut self) -> Result<BeatmapHash, BinaryError> {
        let bytes = self.take(16)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(bytes);
        Ok(BeatmapHash(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_values() {
        let data = [0x01, 0x02, 0x00, 0x78, 0x56, 0x34, 0x12, 0xff];
        let mut reader = BinaryReader::new(&data);
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.read_u16().unwrap(), 2);
        assert_eq!(reader.read_u32().unwrap(), 0x1234_5678);
        assert!(reader.read_bool().unwrap());
        assert!(reader.is_empty());
    }

    #[test]
    fn truncated_read_reports_sizes() {
        let data = [0u8; 3];
        let mut reader = BinaryReader::new(&data);
        assert_eq!(
            reader.read_u32(),
            Err(BinaryError::TruncatedInput {
                needed: 4,
                remaining: 3
            })
        );
        // A failed read does not move the cursor.
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn uleb128_multi_byte() {
        let data = [0xe5, 0x8e, 0x26];
        let mut reader = BinaryReader::new(&data);
        assert_eq!(reader.read_uleb128().unwrap(), 624_485);
    }

    #[test]
    fn uleb128_rejects_overlong_values() {
        let data = [0xff; 11];
        let mut reader = BinaryReader::new(&data);
        assert_eq!(reader.read_uleb128(), Err(BinaryError::InvalidUleb128));
    }

    #[test]
    fn uleb_strings() {
        let data = [0x00, 0x0b, 0x03, b'a', b'b', b'c'];
        let mut reader = BinaryReader::new(&data);
        assert_eq!(reader.read_string(StringPrefix::Uleb128).unwrap(), "");
        assert_eq!(reader.read_string(StringPrefix::Uleb128).unwrap(), "abc");
    }

    #[test]
    fn fixed_prefix_string() {
        let data = [0x02, 0x00, 0x00, 0x00, b'o', b'k'];
        let mut reader = BinaryReader::new(&data);
        assert_eq!(reader.read_string(StringPrefix::FixedU32).unwrap(), "ok");
    }

    #[test]
    fn oversized_string_length_is_rejected() {
        let data = [0x0b, 0x10, b'x'];
        let mut reader = BinaryReader::new(&data);
        assert_eq!(
            reader.read_string(StringPrefix::Uleb128),
            Err(BinaryError::InvalidStringLength {
                length: 16,
                remaining: 1
            })
        );
    }

    #[test]
    fn unknown_marker_is_rejected() {
        let data = [0x07];
        let mut reader = BinaryReader::new(&data);
        assert_eq!(
            reader.read_string(StringPrefix::Uleb128),
            Err(BinaryError::InvalidMarker(0x07))
        );
    }

    #[test]
    fn hash_string_and_raw_hash() {
        let hex = "0123456789abcdef0123456789abcdef";
        let mut data = vec![0x0b, 0x20];
        data.extend_from_slice(hex.as_bytes());
        data.extend_from_slice(&[0xab; 16]);

        let mut reader = BinaryReader::new(&data);
        let hash = reader.read_hash_string(StringPrefix::Uleb128).unwrap();
        assert_eq!(hash.to_string(), hex);
        assert_eq!(reader.read_raw_hash().unwrap(), BeatmapHash([0xab; 16]));
    }
}
