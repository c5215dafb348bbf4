//! Data descriptor handling: signed, unsigned and announced-but-absent descriptors.

mod common;

use common::{ArchiveBuilder, Descriptor, EntrySpec, catalog, read_all, read_entry};
use streamzip::Error;

fn lorem() -> Vec<u8> {
    b"Lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(12)
}

#[test]
fn test_signed_descriptor() {
    let built = ArchiveBuilder::new()
        .entry(EntrySpec::new("a.txt", &lorem()).deflate().descriptor(Descriptor::Signed))
        .entry(EntrySpec::new("b.txt", b"stored after").descriptor(Descriptor::Signed))
        .build();

    let mut catalog = catalog(built.bytes);
    let entries = read_all(&mut catalog);
    assert_eq!(entries[0].1, lorem());
    assert_eq!(entries[1].1, b"stored after");
}

#[test]
fn test_unsigned_descriptor() {
    let built = ArchiveBuilder::new()
        .entry(EntrySpec::new("a.txt", &lorem()).descriptor(Descriptor::Unsigned))
        .file("b.txt", b"next")
        .build();

    let mut catalog = catalog(built.bytes);
    assert_eq!(read_entry(&mut catalog, 0).unwrap(), lorem());
    // 12 bytes of descriptor follow the body.
    assert_eq!(catalog.position(), built.layouts[0].body_end() + 12);
    assert_eq!(read_entry(&mut catalog, 1).unwrap(), b"next");
}

#[test]
fn test_absent_descriptor_before_next_header() {
    let built = ArchiveBuilder::new()
        .entry(EntrySpec::new("a.txt", b"flag says descriptor").descriptor(Descriptor::Missing))
        .file("b.txt", b"next header follows directly")
        .build();
    assert_eq!(built.layouts[0].body_end(), built.layouts[1].lfh_offset);

    let mut catalog = catalog(built.bytes);
    assert_eq!(read_entry(&mut catalog, 0).unwrap(), b"flag says descriptor");
    // The next header's signature was looked at but not consumed.
    assert_eq!(catalog.position(), built.layouts[1].lfh_offset);
    assert_eq!(
        read_entry(&mut catalog, 1).unwrap(),
        b"next header follows directly"
    );
}

#[test]
fn test_absent_descriptor_before_directory() {
    let built = ArchiveBuilder::new()
        .file("a.txt", b"first")
        .entry(EntrySpec::new("b.txt", &lorem()).deflate().descriptor(Descriptor::Missing))
        .build();
    assert_eq!(built.layouts[1].body_end(), built.cd_offset);

    let mut catalog = catalog(built.bytes);
    let entries = read_all(&mut catalog);
    assert_eq!(entries[1].1, lorem());
    assert_eq!(catalog.position(), built.cd_offset);
}

#[test]
fn test_descriptor_crc_takes_precedence() {
    let built = ArchiveBuilder::new()
        .entry(EntrySpec::new("a.txt", b"checked against the descriptor").descriptor(Descriptor::Signed))
        .build();
    let mut bytes = built.bytes.clone();
    // Corrupt the CRC stored in the descriptor; the directory copy is intact.
    let crc_at = built.layouts[0].body_end() as usize + 4;
    bytes[crc_at] ^= 0xFF;
    let corrupted = u32::from_le_bytes(bytes[crc_at..crc_at + 4].try_into().unwrap());

    let mut catalog = catalog(bytes);
    match read_entry(&mut catalog, 0) {
        Err(Error::Checksum { expected, .. }) => assert_eq!(expected, corrupted),
        other => panic!("expected checksum error, got {other:?}"),
    }
}

#[test]
fn test_zipcrypto_with_descriptor_uses_time_check_byte() {
    let built = ArchiveBuilder::new()
        .entry(
            EntrySpec::new("secret.txt", &lorem())
                .deflate()
                .zipcrypto("hunter2")
                .descriptor(Descriptor::Signed),
        )
        .build();

    let mut catalog = catalog(built.bytes);
    let mut reader = catalog.open_with_password(0, b"hunter2").unwrap();
    let mut data = Vec::new();
    std::io::Read::read_to_end(&mut reader, &mut data).unwrap();
    assert_eq!(data, lorem());
    assert!(reader.is_verified());
}
