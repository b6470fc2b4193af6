//! Property-based tests covering the invariants that every header/record operation must hold
//! regardless of the specific bytes involved.

use jeefs::fs::Filesystem;
use jeefs::header::{self, HeaderVersion};
use jeefs::image::MemoryImage;
use jeefs::record::FileRecord;
use proptest::prelude::*;

fn version_strategy() -> impl Strategy<Value = HeaderVersion> {
    prop_oneof![Just(HeaderVersion::V1), Just(HeaderVersion::V2), Just(HeaderVersion::V3)]
}

fn bootstrap(size: u16, version: HeaderVersion) -> Filesystem<MemoryImage> {
    let image = MemoryImage::new(size);
    let mut fs = Filesystem::open(image).unwrap();
    fs.format(version as u8).unwrap();
    fs
}

proptest! {
    /// A freshly initialized header of any version always verifies, and tampering with any
    /// single byte before the CRC32 word always breaks verification.
    #[test]
    fn header_init_verifies_and_tamper_detects(
        version in version_strategy(),
        tamper_byte in 0usize..252,
    ) {
        let size = version.size();
        let mut data = vec![0u8; size];
        header::init(&mut data, version).unwrap();
        prop_assert!(header::verify_crc(&data).is_ok());

        if tamper_byte < size - 4 {
            data[tamper_byte] ^= 0x01;
            prop_assert!(header::verify_crc(&data).is_err());
        }
    }

    /// A record header round-trips through encode/decode for any name, size, CRC32, and next
    /// pointer, as long as the name byte isn't one of the two empty sentinels in position zero.
    #[test]
    fn record_round_trips(
        name_byte in 1u8..0xFF,
        data_size in 0u16..0xFFFF,
        crc32 in any::<u32>(),
        next_file_address in any::<u16>(),
    ) {
        let mut name = [0u8; 16];
        name[0] = name_byte;
        let record = FileRecord { name, data_size, crc32, next_file_address };
        let mut buf = [0u8; 24];
        record.encode_into(&mut buf).unwrap();
        let decoded = FileRecord::decode(&buf).unwrap();
        prop_assert_eq!(decoded, record);
    }

    /// Writing a same-size replacement never moves any other file's offset, and the replacement
    /// reads back byte-for-byte.
    #[test]
    fn write_same_size_is_offset_stable(
        first_len in 1usize..64,
        second_len in 1usize..64,
        fill in any::<u8>(),
    ) {
        let mut fs = bootstrap(4096, HeaderVersion::V3);
        fs.add(b"a", &vec![0xAAu8; first_len]).unwrap();
        fs.add(b"b", &vec![0xBBu8; second_len]).unwrap();
        prop_assert_eq!(fs.list(10).unwrap().len(), 2);

        fs.write(b"a", &vec![fill; first_len]).unwrap();
        let mut buf = vec![0u8; first_len];
        fs.read(b"a", &mut buf).unwrap();
        prop_assert!(buf.iter().all(|&b| b == fill));

        let mut second = vec![0u8; second_len];
        fs.read(b"b", &mut second).unwrap();
        prop_assert!(second.iter().all(|&b| b == 0xBB));
    }

    /// Adding a file beyond the image's remaining capacity is always rejected, and never
    /// corrupts the files that were already present.
    #[test]
    fn capacity_bound_is_respected(image_size in 352u16..1024, data_len in 0usize..2000) {
        let mut fs = bootstrap(image_size, HeaderVersion::V3);
        fs.add(b"seed", &[0x11; 32]).unwrap();

        let result = fs.add(b"overflow", &vec![0x22u8; data_len]);
        let available = usize::from(image_size) - 256 - 24 - 32;
        if data_len + 24 > available {
            prop_assert!(result.is_err());
        }

        let mut buf = [0u8; 32];
        fs.read(b"seed", &mut buf).unwrap();
        prop_assert!(buf.iter().all(|&b| b == 0x11));
    }

    /// Deleting a file then re-adding one of the same total size restores a walkable,
    /// non-corrupted list.
    #[test]
    fn add_delete_add_keeps_list_walkable(len_a in 1usize..64, len_b in 1usize..64) {
        let mut fs = bootstrap(4096, HeaderVersion::V3);
        fs.add(b"a", &vec![1u8; len_a]).unwrap();
        fs.add(b"b", &vec![2u8; len_b]).unwrap();
        fs.add(b"c", &vec![3u8; 8]).unwrap();

        fs.delete(b"b").unwrap();
        fs.add(b"d", &vec![4u8; len_b]).unwrap();

        let names = fs.list(10).unwrap();
        prop_assert_eq!(names.len(), 3);
    }
}
