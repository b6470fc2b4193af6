//! The 24-byte file record header that precedes every file's data bytes.
//!
//! # Layout
//! | Field            | Offset | Size | Notes |
//! |------------------|-------:|-----:|-------|
//! | name             |      0 |   16 | null-terminated ASCII, max 15 content chars |
//! | dataSize         |     16 |    2 | bytes of data following this header |
//! | crc32            |     18 |    4 | IEEE CRC32 over the data bytes only |
//! | nextFileAddress  |     22 |    2 | absolute image offset of the next file record, or `0` |

use jeefs_core::data::Error as CursorError;
use jeefs_core::prelude::*;
use snafu::prelude::*;

/// Total size of a file record header, not including its data bytes.
pub const HEADER_SIZE: usize = 24;
/// Maximum number of visible characters in a file name (the 16th byte is the terminator).
pub const NAME_LEN: usize = 15;
/// Size of the fixed `name` field, including its terminator byte.
pub const NAME_FIELD_LEN: usize = 16;

/// Error conditions for decoding/encoding a file record header.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Thrown if reading/writing a record tries to go out of bounds.
    #[snafu(display("Unexpected End-Of-File while reading a file record!"))]
    EndOfFile,
}
type Result<T> = core::result::Result<T, Error>;

impl From<CursorError> for Error {
    #[inline]
    fn from(_error: CursorError) -> Self {
        Self::EndOfFile
    }
}

/// A decoded 24-byte file record header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileRecord {
    /// Null-padded, 16-byte name field as stored on-image.
    pub name: [u8; NAME_FIELD_LEN],
    pub data_size: u16,
    pub crc32: u32,
    pub next_file_address: u16,
}

impl FileRecord {
    /// Returns `true` if this slot is "empty" by the F5 sentinel rules: the first name byte or
    /// the data size is one of the two empty bytes (`0x00`/`0xFF`).
    #[must_use]
    #[inline]
    pub fn is_empty_slot(&self) -> bool {
        let b = self.name[0];
        let empty_byte = b == 0x00 || b == 0xFF;
        let empty_size = self.data_size == 0x0000 || self.data_size == 0xFFFF;
        empty_byte || empty_size
    }

    /// Builds a record header for a new file, with `next_file_address = 0`.
    #[must_use]
    #[inline]
    pub fn new(name: &[u8; NAME_FIELD_LEN], data_size: u16, crc32: u32) -> Self {
        Self { name: *name, data_size, crc32, next_file_address: 0 }
    }

    /// Decodes a record header from the first [`HEADER_SIZE`] bytes of `data`.
    ///
    /// # Errors
    /// Returns [`EndOfFile`](Error::EndOfFile) if `data` is shorter than [`HEADER_SIZE`].
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = DataCursorRef::new(data, Endian::Little);
        let mut name = [0u8; NAME_FIELD_LEN];
        name.copy_from_slice(cursor.get_slice(NAME_FIELD_LEN)?);
        let data_size = cursor.read_u16()?;
        let crc32 = cursor.read_u32()?;
        let next_file_address = cursor.read_u16()?;
        Ok(Self { name, data_size, crc32, next_file_address })
    }

    /// Encodes this record header into the first [`HEADER_SIZE`] bytes of `data`.
    ///
    /// # Errors
    /// Returns [`EndOfFile`](Error::EndOfFile) if `data` is shorter than [`HEADER_SIZE`].
    pub fn encode_into(&self, data: &mut [u8]) -> Result<()> {
        ensure!(data.len() >= HEADER_SIZE, EndOfFileSnafu);
        data[0..NAME_FIELD_LEN].copy_from_slice(&self.name);
        let mut cursor = DataCursorMut::new(&mut data[NAME_FIELD_LEN..HEADER_SIZE], Endian::Little);
        cursor.write_u16(self.data_size)?;
        cursor.write_u32(self.crc32)?;
        cursor.write_u16(self.next_file_address)?;
        Ok(())
    }

    /// Compares this record's name against `name`, truncating both to [`NAME_LEN`] bytes, the
    /// way the reference implementation's `strncmp(..., 15)` does.
    #[must_use]
    pub fn name_matches(&self, name: &[u8]) -> bool {
        let stored_len = self.name[0..NAME_LEN].iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        let query_len = core::cmp::min(name.len(), NAME_LEN);
        stored_len == query_len && self.name[0..stored_len] == name[0..query_len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let record = FileRecord {
            name: *b"config\0\0\0\0\0\0\0\0\0\0",
            data_size: 64,
            crc32: 0xDEAD_BEEF,
            next_file_address: 344,
        };
        let mut buf = [0u8; HEADER_SIZE];
        record.encode_into(&mut buf).unwrap();
        let decoded = FileRecord::decode(&buf).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn empty_slot_detection_accepts_both_sentinels() {
        let zero = FileRecord { name: [0u8; 16], data_size: 0, crc32: 0, next_file_address: 0 };
        let erased = FileRecord { name: [0xFF; 16], data_size: 0xFFFF, crc32: 0, next_file_address: 0 };
        assert!(zero.is_empty_slot());
        assert!(erased.is_empty_slot());
    }

    #[test]
    fn name_matching_respects_truncation() {
        let mut name = [0u8; NAME_FIELD_LEN];
        name[0..6].copy_from_slice(b"config");
        let record = FileRecord { name, data_size: 1, crc32: 0, next_file_address: 0 };
        assert!(record.name_matches(b"config"));
        assert!(!record.name_matches(b"configuration"));
    }
}
