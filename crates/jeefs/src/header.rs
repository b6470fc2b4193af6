//! The versioned board-identity header that lives at offset zero of every image.
//!
//! Three historical layouts (v1, v2, v3) share a 12-byte magic+version prefix and diverge
//! after that. All three are protected by a trailing IEEE CRC32 that covers every preceding
//! byte. See [`HeaderVersion`] for the per-version layout table.
//!
//! # Layout
//! | Field              | Offset | Size | v1  | v2  | v3  |
//! |--------------------|-------:|-----:|:---:|:---:|:---:|
//! | magic              |      0 |    8 |  ✓  |  ✓  |  ✓  |
//! | version            |      8 |    1 |  ✓  |  ✓  |  ✓  |
//! | reserved           |      9 |    3 |  ✓  |  ✓  |  —  |
//! | signature_version  |      9 |    1 |  —  |  —  |  ✓  |
//! | header_reserved    |     10 |    2 |  —  |  —  |  ✓  |
//! | boardname          |     12 |   32 |  ✓  |  ✓  |  ✓  |
//! | boardversion       |     44 |   32 |  ✓  |  ✓  |  ✓  |
//! | serial             |     76 |   32 |  ✓  |  ✓  |  ✓  |
//! | usid               |    108 |   32 |  ✓  |  ✓  |  ✓  |
//! | cpuid              |    140 |   32 |  ✓  |  ✓  |  ✓  |
//! | mac                |    172 |    6 |  ✓  |  ✓  |  ✓  |
//! | reserved2          |    178 |    2 |  ✓  |  ✓  |  ✓  |
//! | modules            |    180 |   32 |  ✓  |  —  |  —  |
//! | reserved3          |    212 |  296 |  ✓  |  —  |  —  |
//! | reserved3          |    180 |   72 |  —  |  ✓  |  —  |
//! | signature          |    180 |   64 |  —  |  —  |  ✓  |
//! | timestamp          |    244 |    8 |  —  |  —  |  ✓  |
//! | crc32              |  N - 4 |    4 |  ✓  |  ✓  |  ✓  |
//!
//! Total sizes: v1 = 512, v2 = 256, v3 = 256.

use crc::{Crc, CRC_32_ISO_HDLC};
use jeefs_core::data::Error as CursorError;
use jeefs_core::prelude::*;
use snafu::prelude::*;

/// Unique identifier that marks the start of a board-identity header.
pub const MAGIC: [u8; 8] = *b"JETHOME\0";

pub const BOARDNAME_LEN: usize = 32;
pub const BOARDVERSION_LEN: usize = 32;
pub const SERIAL_LEN: usize = 32;
pub const USID_LEN: usize = 32;
pub const CPUID_LEN: usize = 32;
pub const MAC_LEN: usize = 6;
pub const SIGNATURE_LEN: usize = 64;
pub const MODULE_COUNT: usize = 16;

const V1_SIZE: usize = 512;
const V2_SIZE: usize = 256;
const V3_SIZE: usize = 256;

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Error conditions for detecting, verifying, and initializing a board-identity header.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Thrown when the first 8 bytes don't match [`MAGIC`].
    #[snafu(display("Invalid Magic! Expected {:?}.", MAGIC))]
    BadMagic,
    /// Thrown when the version byte is anything other than 1, 2, or 3.
    #[snafu(display("Unknown header version {version}!"))]
    UnknownVersion { version: u8 },
    /// Thrown when the supplied buffer is shorter than the detected version's header size.
    #[snafu(display("Buffer too short: needed {needed} bytes, got {actual}!"))]
    BufferTooShort { needed: usize, actual: usize },
    /// Thrown when the stored CRC32 is zero or doesn't match the recomputed value.
    #[snafu(display("Header CRC32 mismatch!"))]
    BadCrc,
}
type Result<T> = core::result::Result<T, Error>;

impl From<CursorError> for Error {
    #[inline]
    fn from(_error: CursorError) -> Self {
        // The only way a cursor bounds check can fail here is a buffer shorter than the size
        // we've already validated against `header_size`.
        Self::BufferTooShort { needed: 0, actual: 0 }
    }
}

/// The three known board-identity header revisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum HeaderVersion {
    V1 = 1,
    V2 = 2,
    V3 = 3,
}

impl HeaderVersion {
    /// Total on-image size of a header of this version, including the trailing CRC32.
    #[must_use]
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::V1 => V1_SIZE,
            Self::V2 => V2_SIZE,
            Self::V3 => V3_SIZE,
        }
    }
}

impl TryFrom<u8> for HeaderVersion {
    type Error = Error;

    #[inline]
    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            version => UnknownVersionSnafu { version }.fail(),
        }
    }
}

/// The v3 signature algorithm, stored in `signature_version`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SignatureAlgorithm {
    None = 0,
    Secp192r1 = 1,
    Secp256r1 = 2,
}

impl TryFrom<u8> for SignatureAlgorithm {
    type Error = Error;

    #[inline]
    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Secp192r1),
            2 => Ok(Self::Secp256r1),
            version => UnknownVersionSnafu { version }.fail(),
        }
    }
}

/// Reads the magic and version bytes and returns the detected [`HeaderVersion`].
///
/// # Errors
/// Returns [`BadMagic`](Error::BadMagic) if the first 8 bytes aren't [`MAGIC`], or
/// [`UnknownVersion`](Error::UnknownVersion) if the version byte isn't 1, 2, or 3.
#[inline]
pub fn detect_version(data: &[u8]) -> Result<HeaderVersion> {
    ensure!(data.len() >= 12, BufferTooShortSnafu { needed: 12usize, actual: data.len() });
    ensure!(data[0..8] == MAGIC, BadMagicSnafu);
    HeaderVersion::try_from(data[8])
}

/// Returns the total on-image size (including the trailing CRC32) of a header of this version.
#[must_use]
#[inline]
pub const fn header_size(version: HeaderVersion) -> usize {
    version.size()
}

fn crc_region(data: &[u8], version: HeaderVersion) -> Result<(&[u8], u32)> {
    let size = header_size(version);
    ensure!(data.len() >= size, BufferTooShortSnafu { needed: size, actual: data.len() });
    let stored = u32::from_le_bytes(data[size - 4..size].try_into().unwrap());
    Ok((&data[0..size - 4], stored))
}

/// Verifies that the stored CRC32 matches the recomputed CRC32 over `[0, header_size(v) - 4)`.
///
/// A stored CRC32 of `0` is always rejected, even if the recomputed value is also `0`.
///
/// # Errors
/// Returns [`BadMagic`](Error::BadMagic), [`UnknownVersion`](Error::UnknownVersion), or
/// [`BufferTooShort`](Error::BufferTooShort) from detection, or
/// [`BadCrc`](Error::BadCrc) if the CRC doesn't match.
#[inline]
pub fn verify_crc(data: &[u8]) -> Result<()> {
    let version = detect_version(data)?;
    let (region, stored) = crc_region(data, version)?;
    let computed = CRC32.checksum(region);
    ensure!(stored != 0 && stored == computed, BadCrcSnafu);
    Ok(())
}

/// Recomputes the CRC32 over `[0, header_size(v) - 4)` and writes it at `header_size(v) - 4`.
///
/// # Errors
/// Returns [`BadMagic`](Error::BadMagic), [`UnknownVersion`](Error::UnknownVersion), or
/// [`BufferTooShort`](Error::BufferTooShort).
#[inline]
pub fn update_crc(data: &mut [u8]) -> Result<()> {
    let version = detect_version(data)?;
    let size = header_size(version);
    let computed = CRC32.checksum(&data[0..size - 4]);
    data[size - 4..size].copy_from_slice(&computed.to_le_bytes());
    Ok(())
}

/// Zero-fills `[0, header_size(v))`, writes `magic` and `version`, then calls [`update_crc`].
///
/// Every other field (including `signature_version` for v3) is left zero.
///
/// # Errors
/// Returns [`BufferTooShort`](Error::BufferTooShort) if `data` is shorter than `header_size(v)`.
#[inline]
pub fn init(data: &mut [u8], version: HeaderVersion) -> Result<()> {
    let size = header_size(version);
    ensure!(data.len() >= size, BufferTooShortSnafu { needed: size, actual: data.len() });

    data[0..size].fill(0);
    data[0..8].copy_from_slice(&MAGIC);
    data[8] = version as u8;
    update_crc(data)
}

/// A typed view over the common and version-specific board-identity fields.
///
/// Not part of the four core operations above; provided so callers of
/// [`get_header`](crate::fs::Filesystem::get_header)/[`set_header`](crate::fs::Filesystem::set_header)
/// don't have to hand-decode offsets themselves.
#[derive(Clone, Debug)]
pub struct BoardIdentity {
    pub version: HeaderVersion,
    pub boardname: [u8; BOARDNAME_LEN],
    pub boardversion: [u8; BOARDVERSION_LEN],
    pub serial: [u8; SERIAL_LEN],
    pub usid: [u8; USID_LEN],
    pub cpuid: [u8; CPUID_LEN],
    pub mac: [u8; MAC_LEN],
    /// v1 only: sixteen 16-bit module IDs.
    pub modules: Option<[u16; MODULE_COUNT]>,
    /// v3 only: the algorithm used to produce `signature`.
    pub signature_version: Option<SignatureAlgorithm>,
    /// v3 only: algorithm-dependent, zero-padded.
    pub signature: Option<[u8; SIGNATURE_LEN]>,
    /// v3 only: signed Unix seconds.
    pub timestamp: Option<i64>,
}

impl BoardIdentity {
    /// Decodes a typed view from a buffer at least `header_size(v)` bytes long.
    ///
    /// # Errors
    /// Returns the same errors as [`detect_version`].
    pub fn decode(data: &[u8]) -> Result<Self> {
        let version = detect_version(data)?;
        let size = header_size(version);
        ensure!(data.len() >= size, BufferTooShortSnafu { needed: size, actual: data.len() });

        let mut cursor = DataCursorRef::new(&data[0..size], Endian::Little);
        cursor.set_position(12);

        let mut boardname = [0u8; BOARDNAME_LEN];
        boardname.copy_from_slice(cursor.get_slice(BOARDNAME_LEN)?);
        let mut boardversion = [0u8; BOARDVERSION_LEN];
        boardversion.copy_from_slice(cursor.get_slice(BOARDVERSION_LEN)?);
        let mut serial = [0u8; SERIAL_LEN];
        serial.copy_from_slice(cursor.get_slice(SERIAL_LEN)?);
        let mut usid = [0u8; USID_LEN];
        usid.copy_from_slice(cursor.get_slice(USID_LEN)?);
        let mut cpuid = [0u8; CPUID_LEN];
        cpuid.copy_from_slice(cursor.get_slice(CPUID_LEN)?);
        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(cursor.get_slice(MAC_LEN)?);
        // reserved2, skipped
        cursor.get_slice(2)?;

        let (modules, signature_version, signature, timestamp) = match version {
            HeaderVersion::V1 => {
                let mut modules = [0u16; MODULE_COUNT];
                for slot in &mut modules {
                    *slot = cursor.read_u16()?;
                }
                (Some(modules), None, None, None)
            }
            HeaderVersion::V2 => (None, None, None, None),
            HeaderVersion::V3 => {
                let mut signature = [0u8; SIGNATURE_LEN];
                signature.copy_from_slice(cursor.get_slice(SIGNATURE_LEN)?);
                let timestamp = cursor.read_i64()?;
                (None, Some(SignatureAlgorithm::try_from(data[9])?), Some(signature), Some(timestamp))
            }
        };

        Ok(Self {
            version,
            boardname,
            boardversion,
            serial,
            usid,
            cpuid,
            mac,
            modules,
            signature_version,
            signature,
            timestamp,
        })
    }

    /// Encodes this view back into `data`, leaving magic/version/reserved bytes and the
    /// trailing CRC32 word untouched. Callers must call [`update_crc`] afterwards.
    ///
    /// # Errors
    /// Returns [`BufferTooShort`](Error::BufferTooShort) if `data` is shorter than
    /// `header_size(self.version)`.
    pub fn encode_into(&self, data: &mut [u8]) -> Result<()> {
        let size = header_size(self.version);
        ensure!(data.len() >= size, BufferTooShortSnafu { needed: size, actual: data.len() });

        let mut pos = 12;
        data[pos..pos + BOARDNAME_LEN].copy_from_slice(&self.boardname);
        pos += BOARDNAME_LEN;
        data[pos..pos + BOARDVERSION_LEN].copy_from_slice(&self.boardversion);
        pos += BOARDVERSION_LEN;
        data[pos..pos + SERIAL_LEN].copy_from_slice(&self.serial);
        pos += SERIAL_LEN;
        data[pos..pos + USID_LEN].copy_from_slice(&self.usid);
        pos += USID_LEN;
        data[pos..pos + CPUID_LEN].copy_from_slice(&self.cpuid);
        pos += CPUID_LEN;
        data[pos..pos + MAC_LEN].copy_from_slice(&self.mac);
        // reserved2 at pos + MAC_LEN is left untouched

        match self.version {
            HeaderVersion::V1 => {
                if let Some(modules) = self.modules {
                    let mut cursor = DataCursorMut::new(&mut data[180..180 + MODULE_COUNT * 2], Endian::Little);
                    for value in modules {
                        cursor.write_u16(value)?;
                    }
                }
            }
            HeaderVersion::V2 => {}
            HeaderVersion::V3 => {
                if let Some(algo) = self.signature_version {
                    data[9] = algo as u8;
                }
                if let Some(signature) = self.signature {
                    data[180..180 + SIGNATURE_LEN].copy_from_slice(&signature);
                }
                if let Some(timestamp) = self.timestamp {
                    data[244..252].copy_from_slice(&timestamp.to_le_bytes());
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_rejects_bad_magic() {
        let data = [0u8; 512];
        assert!(matches!(detect_version(&data), Err(Error::BadMagic)));
    }

    #[test]
    fn detect_rejects_unknown_version() {
        let mut data = [0u8; 512];
        data[0..8].copy_from_slice(&MAGIC);
        data[8] = 9;
        assert!(matches!(detect_version(&data), Err(Error::UnknownVersion { version: 9 })));
    }

    #[test]
    fn init_then_verify_round_trips() {
        for version in [HeaderVersion::V1, HeaderVersion::V2, HeaderVersion::V3] {
            let mut data = vec![0u8; header_size(version)];
            init(&mut data, version).unwrap();
            assert_eq!(&data[0..8], &MAGIC);
            assert_eq!(data[8], version as u8);
            verify_crc(&data).unwrap();
        }
    }

    #[test]
    fn zero_crc_is_rejected_even_if_it_matches() {
        // An all-zero v2 header has magic/version missing too, so craft one by hand: magic +
        // version are the only nonzero bytes, and a genuine CRC32 over that would not be zero,
        // so we force the stored CRC to zero directly to exercise invariant H3.
        let mut data = vec![0u8; V2_SIZE];
        data[0..8].copy_from_slice(&MAGIC);
        data[8] = 2;
        update_crc(&mut data).unwrap();
        data[V2_SIZE - 4..V2_SIZE].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(verify_crc(&data), Err(Error::BadCrc)));
    }

    #[test]
    fn tampering_breaks_crc() {
        let mut data = vec![0u8; V2_SIZE];
        init(&mut data, HeaderVersion::V2).unwrap();
        data[50] ^= 0x01;
        assert!(matches!(verify_crc(&data), Err(Error::BadCrc)));
    }
}
