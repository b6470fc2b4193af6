//! The file system layer: a handle over an [`ImageBackend`] that uses the [`header`] codec to
//! find where file data starts, then walks, mutates, and compacts the [`record`] linked list.
//!
//! Operations are strictly serialized by the caller (there is no internal locking) and writes
//! happen write-through: there is no in-memory mirror of the image, and no operation retries
//! failed backend I/O.

use crc::{Crc, CRC_32_ISO_HDLC};
use snafu::prelude::*;

use crate::header::{self, HeaderVersion};
use crate::image::ImageBackend;
use crate::record::{self, FileRecord};

#[cfg(not(feature = "std"))]
use crate::no_std::*;

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Error conditions for file system operations.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Thrown by `add` if a file with the given name is already present.
    #[snafu(display("A file with that name already exists!"))]
    FileExists,
    /// Thrown if a name is empty or longer than [`record::NAME_LEN`] bytes.
    #[snafu(display("File name must be 1 to {} bytes!", record::NAME_LEN))]
    FileNameInvalid,
    /// Thrown by `read`/`write`/`delete` if no file with the given name exists.
    #[snafu(display("No file with that name was found!"))]
    FileNotFound,
    /// Thrown by `add` if there isn't enough room left in the image.
    #[snafu(display("Not enough space remaining in the image!"))]
    NotEnoughSpace,
    /// Thrown for a null/empty data buffer, or a caller read buffer smaller than stored data.
    #[snafu(display("Buffer is empty or too small for the stored data!"))]
    BufferInvalid,
    /// Thrown by `read_verified` when the recomputed data CRC32 doesn't match the stored one.
    #[snafu(display("Stored data CRC32 does not match the recomputed value!"))]
    DataCrcMismatch,
    /// Thrown when a record's `nextFileAddress` is inconsistent with its position and size.
    #[snafu(display("Linked list is corrupted or contains an impossible offset!"))]
    EepromCorrupted,
    #[snafu(transparent)]
    Header { source: header::Error },
    #[snafu(transparent)]
    Record { source: record::Error },
    #[snafu(transparent)]
    Image { source: crate::image::Error },
}
type Result<T> = core::result::Result<T, Error>;

fn validate_name(name: &[u8]) -> Result<[u8; record::NAME_FIELD_LEN]> {
    ensure!(!name.is_empty() && name.len() <= record::NAME_LEN, FileNameInvalidSnafu);
    let mut packed = [0u8; record::NAME_FIELD_LEN];
    packed[0..name.len()].copy_from_slice(name);
    Ok(packed)
}

/// A handle over an image backend, providing the versioned header and linked-list file
/// operations described in the module docs.
///
/// There is no cyclic reference to the backend: `Filesystem` owns it outright for as long as
/// the handle lives, and dropping the handle drops (and, for [`FileImage`](crate::image::FileImage),
/// closes) the backend.
pub struct Filesystem<B: ImageBackend> {
    backend: B,
    files_start: Option<u16>,
}

impl<B: ImageBackend> Filesystem<B> {
    /// Opens an image, without inspecting its contents.
    ///
    /// Mirrors the reference `eeprom_open`: no header parsing happens here, so a blank or
    /// otherwise inconsistent image can still be opened in order to [`format`](Self::format) it.
    /// The header version — and with it, where the file list starts — is detected lazily, the
    /// first time an operation needs it.
    #[inline]
    pub fn open(backend: B) -> Result<Self> {
        Ok(Self { backend, files_start: None })
    }

    /// Returns the cached files-start offset, detecting and caching it from the on-image header
    /// if this is the first operation that needs it.
    ///
    /// # Errors
    /// Returns [`BadMagic`](header::Error::BadMagic) or [`UnknownVersion`](header::Error::UnknownVersion)
    /// if the header hasn't been [`format`](Self::format)ted yet.
    fn files_start(&mut self) -> Result<u16> {
        if let Some(start) = self.files_start {
            return Ok(start);
        }
        let mut prefix = [0u8; 12];
        self.backend.read(&mut prefix, 0).context(ImageSnafu)?;
        let version = header::detect_version(&prefix).context(HeaderSnafu)?;
        let start = header::header_size(version) as u16;
        self.files_start = Some(start);
        Ok(start)
    }

    /// Consumes this handle, returning the underlying backend.
    #[must_use]
    #[inline]
    pub fn into_inner(self) -> B {
        self.backend
    }

    /// Zero-fills `[header_size(v), image_size)` and writes a fresh header of the given
    /// version.
    ///
    /// # Errors
    /// Returns [`UnknownVersion`](header::Error::UnknownVersion) if `version` isn't 1, 2, or 3.
    pub fn format(&mut self, version: u8) -> Result<()> {
        let version = HeaderVersion::try_from(version).context(HeaderSnafu)?;
        let size = header::header_size(version) as u16;
        let image_size = self.backend.size();

        if image_size > size {
            let zeros = vec![0u8; usize::from(image_size - size)];
            self.backend.write(&zeros, size).context(ImageSnafu)?;
        }

        let mut header_buf = vec![0u8; usize::from(size)];
        header::init(&mut header_buf, version).context(HeaderSnafu)?;
        self.backend.write(&header_buf, 0).context(ImageSnafu)?;

        self.files_start = Some(size);
        log::debug!("formatted image as header version {}", version as u8);
        Ok(())
    }

    /// Re-detects the header version and verifies its CRC32.
    ///
    /// # Errors
    /// Returns [`BadMagic`](header::Error::BadMagic), [`UnknownVersion`](header::Error::UnknownVersion),
    /// or [`BadCrc`](header::Error::BadCrc).
    pub fn header_consistency(&mut self) -> Result<()> {
        let mut prefix = [0u8; 12];
        self.backend.read(&mut prefix, 0).context(ImageSnafu)?;
        let version = header::detect_version(&prefix).context(HeaderSnafu)?;
        let size = header::header_size(version);
        let mut buf = vec![0u8; size];
        self.backend.read(&mut buf, 0).context(ImageSnafu)?;
        header::verify_crc(&buf).inspect_err(|_| log::warn!("header consistency check failed"))?;
        Ok(())
    }

    /// Copies the raw header bytes into `out`, returning the number of bytes written.
    ///
    /// # Errors
    /// Returns [`BufferTooShort`](header::Error::BufferTooShort) if `out` is shorter than the
    /// detected header's size.
    pub fn get_header(&mut self, out: &mut [u8]) -> Result<usize> {
        let mut prefix = [0u8; 12];
        self.backend.read(&mut prefix, 0).context(ImageSnafu)?;
        let version = header::detect_version(&prefix).context(HeaderSnafu)?;
        let size = header::header_size(version);
        if out.len() < size {
            return Err(header::Error::BufferTooShort { needed: size, actual: out.len() }.into());
        }
        self.backend.read(&mut out[0..size], 0).context(ImageSnafu)?;
        Ok(size)
    }

    /// Validates and installs a caller-supplied header, recomputing its CRC32 before writing it.
    ///
    /// # Errors
    /// Returns [`BadMagic`](header::Error::BadMagic), [`UnknownVersion`](header::Error::UnknownVersion),
    /// or [`BufferTooShort`](header::Error::BufferTooShort) if `header_bytes` doesn't look like a
    /// valid header.
    pub fn set_header(&mut self, header_bytes: &[u8]) -> Result<()> {
        let version = header::detect_version(header_bytes).context(HeaderSnafu)?;
        let size = header::header_size(version);
        if header_bytes.len() < size {
            return Err(header::Error::BufferTooShort { needed: size, actual: header_bytes.len() }.into());
        }

        let mut buf = header_bytes[0..size].to_vec();
        header::update_crc(&mut buf).context(HeaderSnafu)?;
        self.backend.write(&buf, 0).context(ImageSnafu)?;
        self.files_start = Some(size as u16);
        Ok(())
    }

    /// Reads a 24-byte record header at `address`, or `None` if it doesn't fit in the image.
    fn read_record(&mut self, address: u16) -> Result<Option<FileRecord>> {
        if usize::from(address) + record::HEADER_SIZE > usize::from(self.backend.size()) {
            return Ok(None);
        }
        let mut buf = [0u8; record::HEADER_SIZE];
        if self.backend.read(&mut buf, address).is_err() {
            return Ok(None);
        }
        Ok(Some(FileRecord::decode(&buf).context(RecordSnafu)?))
    }

    /// Walks the linked list starting at `files_start`, looking for `name`.
    ///
    /// # Errors
    /// Returns [`EepromCorrupted`](Error::EepromCorrupted) if a non-empty record's
    /// `nextFileAddress` doesn't match its own offset and size.
    fn find(&mut self, name: &[u8]) -> Result<Option<(FileRecord, u16)>> {
        let mut address = self.files_start()?;
        loop {
            let Some(record) = self.read_record(address)? else { return Ok(None) };
            if record.is_empty_slot() {
                return Ok(None);
            }
            if record.name_matches(name) {
                return Ok(Some((record, address)));
            }
            if record.next_file_address == 0 {
                return Ok(None);
            }
            let expected_next = address
                .checked_add(record::HEADER_SIZE as u16)
                .and_then(|v| v.checked_add(record.data_size));
            ensure!(expected_next == Some(record.next_file_address), EepromCorruptedSnafu);
            address = record.next_file_address;
        }
    }

    fn locate(&mut self, name: &[u8]) -> Result<(FileRecord, u16)> {
        validate_name(name)?;
        self.find(name)?.context(FileNotFoundSnafu)
    }

    /// Walks the linked list, writing up to `max_files` names into the returned list.
    ///
    /// # Errors
    /// Returns [`EepromCorrupted`](Error::EepromCorrupted) on an inconsistent linked list.
    pub fn list(&mut self, max_files: usize) -> Result<Vec<[u8; record::NAME_FIELD_LEN]>> {
        let mut names = Vec::new();
        let mut address = self.files_start()?;

        while names.len() < max_files {
            let Some(record) = self.read_record(address)? else { break };
            if record.is_empty_slot() {
                break;
            }
            names.push(record.name);
            if record.next_file_address == 0 {
                break;
            }
            address = record.next_file_address;
        }

        Ok(names)
    }

    /// Reads a file's data into `buf`, without checking the stored data CRC32.
    ///
    /// # Errors
    /// Returns [`FileNotFound`](Error::FileNotFound) or [`BufferInvalid`](Error::BufferInvalid).
    pub fn read(&mut self, name: &[u8], buf: &mut [u8]) -> Result<usize> {
        let (record, address) = self.locate(name)?;
        let size = usize::from(record.data_size);
        ensure!(buf.len() >= size, BufferInvalidSnafu);

        let data_offset = address + record::HEADER_SIZE as u16;
        self.backend.read(&mut buf[0..size], data_offset).context(ImageSnafu)?;
        Ok(size)
    }

    /// Like [`read`](Self::read), but also verifies the stored data CRC32.
    ///
    /// # Errors
    /// Returns the same errors as [`read`](Self::read), plus
    /// [`DataCrcMismatch`](Error::DataCrcMismatch).
    pub fn read_verified(&mut self, name: &[u8], buf: &mut [u8]) -> Result<usize> {
        let size = self.read(name, buf)?;
        let (record, _) = self.locate(name)?;
        let computed = CRC32.checksum(&buf[0..size]);
        ensure!(computed == record.crc32, DataCrcMismatchSnafu);
        Ok(size)
    }

    /// Overwrites a file's data in place if `data.len()` matches the stored size, otherwise
    /// deletes and re-adds it.
    ///
    /// # Errors
    /// Returns [`FileNotFound`](Error::FileNotFound), [`BufferInvalid`](Error::BufferInvalid) if
    /// `data` is empty, or [`NotEnoughSpace`](Error::NotEnoughSpace) when the size changed and
    /// there's no room for the replacement.
    pub fn write(&mut self, name: &[u8], data: &[u8]) -> Result<usize> {
        ensure!(!data.is_empty(), BufferInvalidSnafu);
        let (record, address) = self.locate(name)?;

        if usize::from(record.data_size) != data.len() {
            self.delete(name)?;
            return self.add(name, data);
        }

        let data_offset = address + record::HEADER_SIZE as u16;
        self.backend.write(data, data_offset).context(ImageSnafu)?;

        let updated = FileRecord {
            name: record.name,
            data_size: record.data_size,
            crc32: CRC32.checksum(data),
            next_file_address: record.next_file_address,
        };
        let mut buf = [0u8; record::HEADER_SIZE];
        updated.encode_into(&mut buf).context(RecordSnafu)?;
        self.backend.write(&buf, address).context(ImageSnafu)?;

        Ok(data.len())
    }

    /// Appends a new file. Fails if a file with the same name already exists.
    ///
    /// # Errors
    /// Returns [`FileNameInvalid`](Error::FileNameInvalid), [`BufferInvalid`](Error::BufferInvalid),
    /// [`FileExists`](Error::FileExists), or [`NotEnoughSpace`](Error::NotEnoughSpace).
    pub fn add(&mut self, name: &[u8], data: &[u8]) -> Result<usize> {
        let packed_name = validate_name(name)?;
        ensure!(!data.is_empty(), BufferInvalidSnafu);
        ensure!(self.find(name)?.is_none(), FileExistsSnafu);

        let mut current_address = self.files_start()?;
        let mut previous: Option<(FileRecord, u16)> = None;

        loop {
            let Some(record) = self.read_record(current_address)? else { break };
            if record.is_empty_slot() {
                break;
            }

            let expected_next = current_address
                .checked_add(record::HEADER_SIZE as u16)
                .and_then(|v| v.checked_add(record.data_size));

            if record.next_file_address == 0 {
                previous = Some((record, current_address));
                current_address = expected_next.context(EepromCorruptedSnafu)?;
                break;
            }

            if expected_next != Some(record.next_file_address) {
                // The reference walk treats a broken next-pointer the same as an empty slot:
                // this is where we insert.
                break;
            }

            log::debug!("add: walking past occupied slot at {current_address}");
            previous = Some((record, current_address));
            current_address = record.next_file_address;
        }

        let new_offset = current_address;
        let image_size = self.backend.size();
        ensure!(
            usize::from(new_offset) + record::HEADER_SIZE + data.len() <= usize::from(image_size),
            NotEnoughSpaceSnafu
        );

        if let Some((mut prev_record, prev_address)) = previous {
            if prev_record.next_file_address == 0 {
                prev_record.next_file_address = new_offset;
                let mut buf = [0u8; record::HEADER_SIZE];
                prev_record.encode_into(&mut buf).context(RecordSnafu)?;
                self.backend.write(&buf, prev_address).context(ImageSnafu)?;
            }
        }

        let new_record = FileRecord::new(&packed_name, data.len() as u16, CRC32.checksum(data));
        let mut header_buf = [0u8; record::HEADER_SIZE];
        new_record.encode_into(&mut header_buf).context(RecordSnafu)?;
        self.backend.write(&header_buf, new_offset).context(ImageSnafu)?;
        self.backend.write(data, new_offset + record::HEADER_SIZE as u16).context(ImageSnafu)?;

        Ok(data.len())
    }

    /// Deletes a file and compacts the image, relinking every moved record's
    /// `nextFileAddress` so the list stays contiguous.
    ///
    /// # Errors
    /// Returns [`FileNameInvalid`](Error::FileNameInvalid) or [`FileNotFound`](Error::FileNotFound).
    pub fn delete(&mut self, name: &[u8]) -> Result<usize> {
        validate_name(name)?;
        let (record, address) = self.find(name)?.context(FileNotFoundSnafu)?;

        let shift = record::HEADER_SIZE as u16 + record.data_size;
        let image_size = self.backend.size();
        let src = address.checked_add(shift).context(EepromCorruptedSnafu)?;
        ensure!(src <= image_size, EepromCorruptedSnafu);

        let tail_len = usize::from(image_size - src);
        let mut tail = vec![0u8; tail_len];
        if tail_len > 0 {
            self.backend.read(&mut tail, src).context(ImageSnafu)?;
        }

        // Relink every moved record's nextFileAddress before the shifted bytes are written back;
        // leaving stale absolute offsets here is the reference implementation's known defect.
        let mut offset = 0usize;
        while offset + record::HEADER_SIZE <= tail.len() {
            let mut moved = FileRecord::decode(&tail[offset..offset + record::HEADER_SIZE]).context(RecordSnafu)?;
            if moved.is_empty_slot() {
                break;
            }
            if moved.next_file_address != 0 {
                moved.next_file_address -= shift;
            }
            moved.encode_into(&mut tail[offset..offset + record::HEADER_SIZE]).context(RecordSnafu)?;
            offset += record::HEADER_SIZE + usize::from(moved.data_size);
            log::debug!("delete: relinked moved record, new offset {}", offset);
        }

        if tail_len > 0 {
            self.backend.write(&tail, address).context(ImageSnafu)?;
        }

        let clear = vec![0u8; usize::from(shift)];
        self.backend.write(&clear, image_size - shift).context(ImageSnafu)?;

        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::MemoryImage;

    fn formatted(size: u16, version: u8) -> Filesystem<MemoryImage> {
        let image = MemoryImage::new(size);
        let mut fs = Filesystem::open(image).unwrap();
        fs.format(version).unwrap();
        fs
    }

    #[test]
    fn format_then_header_consistency_ok() {
        let mut fs = formatted(8192, 2);
        fs.header_consistency().unwrap();
    }

    /// Mirrors the reference bring-up flow: a freshly zeroed image opens cleanly, is reported
    /// inconsistent before it's ever been formatted, and becomes consistent once it is.
    #[test]
    fn open_blank_image_then_format() {
        let image = MemoryImage::new(8192);
        let mut fs = Filesystem::open(image).unwrap();
        assert!(fs.header_consistency().is_err());
        fs.format(2).unwrap();
        fs.header_consistency().unwrap();
    }

    #[test]
    fn add_list_read_round_trip() {
        let mut fs = formatted(8192, 3);
        fs.add(b"config", &[0xAB; 64]).unwrap();
        fs.add(b"wifi.conf", &[0xCD; 128]).unwrap();
        fs.add(b"serial", b"SN-GOLDEN-001\0\0\0").unwrap();

        let names = fs.list(10).unwrap();
        assert_eq!(names.len(), 3);
        assert_eq!(&names[1][0..9], b"wifi.conf");

        let mut buf = [0u8; 256];
        let n = fs.read(b"wifi.conf", &mut buf).unwrap();
        assert_eq!(n, 128);
        assert!(buf[0..128].iter().all(|&b| b == 0xCD));
    }

    #[test]
    fn write_same_size_preserves_offsets() {
        let mut fs = formatted(8192, 3);
        fs.add(b"config", &[0xAB; 64]).unwrap();
        fs.add(b"wifi.conf", &[0xCD; 128]).unwrap();
        fs.add(b"serial", &[0x11; 16]).unwrap();

        fs.write(b"config", &[0x55; 64]).unwrap();

        let mut buf = [0u8; 64];
        fs.read(b"config", &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x55));

        let (_, wifi_addr) = fs.find(b"wifi.conf").unwrap().unwrap();
        let (_, serial_addr) = fs.find(b"serial").unwrap().unwrap();
        assert_eq!(wifi_addr, 344);
        assert_eq!(serial_addr, 496);
    }

    #[test]
    fn delete_middle_compacts_and_relinks() {
        let mut fs = formatted(8192, 3);
        fs.add(b"config", &[0xAB; 64]).unwrap();
        fs.add(b"wifi.conf", &[0xCD; 128]).unwrap();
        fs.add(b"serial", &[0x11; 16]).unwrap();

        assert_eq!(fs.delete(b"wifi.conf").unwrap(), 1);

        let names = fs.list(10).unwrap();
        assert_eq!(names.len(), 2);

        let (config, config_addr) = fs.find(b"config").unwrap().unwrap();
        assert_eq!(config_addr, 256);
        assert_eq!(config.next_file_address, 344);

        let (serial, serial_addr) = fs.find(b"serial").unwrap().unwrap();
        assert_eq!(serial_addr, 344);
        assert_eq!(serial.next_file_address, 0);
    }

    #[test]
    fn capacity_rejection() {
        let mut fs = formatted(512, 3);
        assert!(matches!(fs.add(b"x", &[0u8; 300]), Err(Error::NotEnoughSpace)));
    }

    #[test]
    fn add_existing_name_fails() {
        let mut fs = formatted(8192, 3);
        fs.add(b"config", &[0xAB; 64]).unwrap();
        assert!(matches!(fs.add(b"config", &[0xCD; 64]), Err(Error::FileExists)));
    }

    #[test]
    fn name_too_long_rejected() {
        let mut fs = formatted(8192, 3);
        let name = [b'a'; 16];
        assert!(matches!(fs.add(&name, &[1u8; 4]), Err(Error::FileNameInvalid)));
    }
}
