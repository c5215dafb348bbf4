//! Shared test utilities for integration tests.
//!
//! [`ArchiveBuilder`] writes small ZIP archives in memory with exactly the
//! layout a test needs: stored or deflated bodies, ZipCrypto or WinZip AES
//! encryption, the different data descriptor variants, a central directory
//! order that differs from the physical order, and disk-relative offsets for
//! split archives.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::sync::Arc;

use aes::{Aes128, Aes192, Aes256};
use ctr::cipher::{KeyIvInit, StreamCipher};
use flate2::Compression;
use flate2::write::DeflateEncoder;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use streamzip::io::ReadAt;
use streamzip::zip::zipcrypto::ZipCryptoKeys;
use streamzip::{Error, VolumeSet, ZipCatalog};

/// DOS time 12:00:00.
pub const MOD_TIME: u16 = 0x6000;
/// DOS date 2025-01-01.
pub const MOD_DATE: u16 = (45 << 9) | (1 << 5) | 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Stored,
    Deflate,
    /// Written as-is with an arbitrary method id; the body is the raw data.
    Raw(u16),
}

impl Method {
    fn id(self) -> u16 {
        match self {
            Method::Stored => 0,
            Method::Deflate => 8,
            Method::Raw(id) => id,
        }
    }

    fn compress(self, data: &[u8]) -> Vec<u8> {
        match self {
            Method::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data).unwrap();
                encoder.finish().unwrap()
            }
            Method::Stored | Method::Raw(_) => data.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Crypt {
    None,
    ZipCrypto(Vec<u8>),
    /// Password, strength (1, 2 or 3) and vendor version (1 or 2).
    Aes(Vec<u8>, u8, u16),
}

/// How the CRC and sizes of an entry reach the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    /// In the local header.
    None,
    /// Flag bit 3 and a `PK\x07\x08` descriptor after the body.
    Signed,
    /// Flag bit 3 and a descriptor without signature.
    Unsigned,
    /// Flag bit 3 set but no descriptor written at all.
    Missing,
}

#[derive(Debug, Clone)]
pub struct EntrySpec {
    pub name: String,
    pub data: Vec<u8>,
    pub method: Method,
    pub crypt: Crypt,
    pub descriptor: Descriptor,
    /// Uncompressed size written to the directory instead of the real one.
    pub declared_size: Option<u64>,
    /// CRC written to the directory instead of the real one.
    pub declared_crc: Option<u32>,
    /// Compressed size written to the directory through a ZIP64 extra field.
    pub zip64_compressed_size: Option<u64>,
}

impl EntrySpec {
    pub fn new(name: &str, data: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            data: data.to_vec(),
            method: Method::Stored,
            crypt: Crypt::None,
            descriptor: Descriptor::None,
            declared_size: None,
            declared_crc: None,
            zip64_compressed_size: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn deflate(self) -> Self {
        self.method(Method::Deflate)
    }

    pub fn zipcrypto(mut self, password: &str) -> Self {
        self.crypt = Crypt::ZipCrypto(password.as_bytes().to_vec());
        self
    }

    pub fn aes(mut self, password: &str, strength: u8, version: u16) -> Self {
        self.crypt = Crypt::Aes(password.as_bytes().to_vec(), strength, version);
        self
    }

    pub fn descriptor(mut self, descriptor: Descriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub fn declared_size(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }

    pub fn declared_crc(mut self, crc: u32) -> Self {
        self.declared_crc = Some(crc);
        self
    }

    pub fn zip64_compressed_size(mut self, size: u64) -> Self {
        self.zip64_compressed_size = Some(size);
        self
    }
}

/// Byte ranges of one written entry.
#[derive(Debug, Clone, Copy)]
pub struct EntryLayout {
    pub lfh_offset: u64,
    pub body_offset: u64,
    pub body_len: u64,
}

impl EntryLayout {
    pub fn body_end(&self) -> u64 {
        self.body_offset + self.body_len
    }
}

#[derive(Debug, Clone)]
pub struct Built {
    pub bytes: Vec<u8>,
    /// Layouts in the order the entries were added.
    pub layouts: Vec<EntryLayout>,
    pub cd_offset: u64,
}

#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    entries: Vec<EntrySpec>,
    directory_order: Option<Vec<usize>>,
    volume_sizes: Option<Vec<u64>>,
}

struct Written {
    method: u16,
    flags: u16,
    crc: u32,
    compressed: u64,
    uncompressed: u64,
    extra: Vec<u8>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, spec: EntrySpec) -> Self {
        self.entries.push(spec);
        self
    }

    pub fn file(self, name: &str, data: &[u8]) -> Self {
        self.entry(EntrySpec::new(name, data))
    }

    /// Order of the central directory records, as indexes of added entries.
    pub fn directory_order(mut self, order: &[usize]) -> Self {
        self.directory_order = Some(order.to_vec());
        self
    }

    /// Write disk numbers and disk-relative offsets for a split at these volume sizes.
    /// The last volume takes whatever remains.
    pub fn volume_sizes(mut self, sizes: &[u64]) -> Self {
        self.volume_sizes = Some(sizes.to_vec());
        self
    }

    fn disk_of(&self, offset: u64) -> (u16, u32) {
        let Some(sizes) = &self.volume_sizes else {
            return (0, offset as u32);
        };
        let mut start = 0u64;
        for (disk, size) in sizes.iter().enumerate() {
            if offset < start + size {
                return (disk as u16, (offset - start) as u32);
            }
            start += size;
        }
        (sizes.len() as u16, (offset - start) as u32)
    }

    pub fn build(self) -> Built {
        let mut out = Vec::new();
        let mut layouts = Vec::new();
        let mut records = Vec::new();

        for spec in &self.entries {
            let lfh_offset = out.len() as u64;
            let crc = crc32fast::hash(&spec.data);
            let compressed = spec.method.compress(&spec.data);
            let mut flags = 0u16;
            if spec.descriptor != Descriptor::None {
                flags |= 1 << 3;
            }

            let (method, body, extra, stored_crc) = match &spec.crypt {
                Crypt::None => (spec.method.id(), compressed, Vec::new(), crc),
                Crypt::ZipCrypto(password) => {
                    flags |= 1;
                    let check = if flags & (1 << 3) != 0 {
                        (MOD_TIME >> 8) as u8
                    } else {
                        (crc >> 24) as u8
                    };
                    let body = zipcrypto_encrypt(password, check, &compressed);
                    (spec.method.id(), body, Vec::new(), crc)
                }
                Crypt::Aes(password, strength, version) => {
                    flags |= 1;
                    let body = aes_encrypt(password, *strength, &compressed);
                    let mut extra = Vec::new();
                    extra.extend_from_slice(&0x9901u16.to_le_bytes());
                    extra.extend_from_slice(&7u16.to_le_bytes());
                    extra.extend_from_slice(&version.to_le_bytes());
                    extra.extend_from_slice(b"AE");
                    extra.push(*strength);
                    extra.extend_from_slice(&spec.method.id().to_le_bytes());
                    let stored_crc = if *version == 2 { 0 } else { crc };
                    (99, body, extra, stored_crc)
                }
            };

            let in_header = spec.descriptor == Descriptor::None;
            let written = Written {
                method,
                flags,
                crc: spec.declared_crc.unwrap_or(stored_crc),
                compressed: body.len() as u64,
                uncompressed: spec.declared_size.unwrap_or(spec.data.len() as u64),
                extra,
            };

            // Local file header
            out.extend_from_slice(b"PK\x03\x04");
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&written.flags.to_le_bytes());
            out.extend_from_slice(&written.method.to_le_bytes());
            out.extend_from_slice(&MOD_TIME.to_le_bytes());
            out.extend_from_slice(&MOD_DATE.to_le_bytes());
            let (h_crc, h_comp, h_uncomp) = if in_header {
                (written.crc, written.compressed as u32, written.uncompressed as u32)
            } else {
                (0, 0, 0)
            };
            out.extend_from_slice(&h_crc.to_le_bytes());
            out.extend_from_slice(&h_comp.to_le_bytes());
            out.extend_from_slice(&h_uncomp.to_le_bytes());
            out.extend_from_slice(&(spec.name.len() as u16).to_le_bytes());
            out.extend_from_slice(&(written.extra.len() as u16).to_le_bytes());
            out.extend_from_slice(spec.name.as_bytes());
            out.extend_from_slice(&written.extra);

            let body_offset = out.len() as u64;
            out.extend_from_slice(&body);

            match spec.descriptor {
                Descriptor::Signed | Descriptor::Unsigned => {
                    if spec.descriptor == Descriptor::Signed {
                        out.extend_from_slice(b"PK\x07\x08");
                    }
                    out.extend_from_slice(&written.crc.to_le_bytes());
                    out.extend_from_slice(&(written.compressed as u32).to_le_bytes());
                    out.extend_from_slice(&(written.uncompressed as u32).to_le_bytes());
                }
                Descriptor::None | Descriptor::Missing => {}
            }

            layouts.push(EntryLayout {
                lfh_offset,
                body_offset,
                body_len: body.len() as u64,
            });
            records.push(written);
        }

        // Central directory
        let cd_offset = out.len() as u64;
        let order = self
            .directory_order
            .clone()
            .unwrap_or_else(|| (0..self.entries.len()).collect());
        for &index in &order {
            let spec = &self.entries[index];
            let written = &records[index];
            let (disk, local) = self.disk_of(layouts[index].lfh_offset);
            let mut extra = Vec::new();
            let compressed = match spec.zip64_compressed_size {
                Some(size) => {
                    extra.extend_from_slice(&0x0001u16.to_le_bytes());
                    extra.extend_from_slice(&8u16.to_le_bytes());
                    extra.extend_from_slice(&size.to_le_bytes());
                    0xFFFF_FFFF
                }
                None => written.compressed as u32,
            };
            extra.extend_from_slice(&written.extra);
            out.extend_from_slice(b"PK\x01\x02");
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&written.flags.to_le_bytes());
            out.extend_from_slice(&written.method.to_le_bytes());
            out.extend_from_slice(&MOD_TIME.to_le_bytes());
            out.extend_from_slice(&MOD_DATE.to_le_bytes());
            out.extend_from_slice(&written.crc.to_le_bytes());
            out.extend_from_slice(&compressed.to_le_bytes());
            out.extend_from_slice(&(written.uncompressed as u32).to_le_bytes());
            out.extend_from_slice(&(spec.name.len() as u16).to_le_bytes());
            out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&disk.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&local.to_le_bytes());
            out.extend_from_slice(spec.name.as_bytes());
            out.extend_from_slice(&extra);
        }
        let cd_size = out.len() as u64 - cd_offset;

        // End of central directory
        let (cd_disk, cd_local) = self.disk_of(cd_offset);
        let (last_disk, _) = self.disk_of(out.len() as u64);
        out.extend_from_slice(b"PK\x05\x06");
        out.extend_from_slice(&last_disk.to_le_bytes());
        out.extend_from_slice(&cd_disk.to_le_bytes());
        out.extend_from_slice(&(order.len() as u16).to_le_bytes());
        out.extend_from_slice(&(order.len() as u16).to_le_bytes());
        out.extend_from_slice(&(cd_size as u32).to_le_bytes());
        out.extend_from_slice(&cd_local.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());

        Built {
            bytes: out,
            layouts,
            cd_offset,
        }
    }
}

/// Encrypt a body with the traditional PKWARE cipher.
pub fn zipcrypto_encrypt(password: &[u8], check: u8, data: &[u8]) -> Vec<u8> {
    let mut keys = ZipCryptoKeys::new(password);
    let mut header = [0x3Cu8; 12];
    header[11] = check;
    header
        .iter()
        .chain(data)
        .map(|&b| keys.encrypt_byte(b))
        .collect()
}

/// Build a WinZip AES body: salt, verifier, ciphertext and 10-byte code.
pub fn aes_encrypt(password: &[u8], strength: u8, data: &[u8]) -> Vec<u8> {
    let key_len = match strength {
        1 => 16,
        2 => 24,
        3 => 32,
        other => panic!("bad AES strength {other}"),
    };
    let salt: Vec<u8> = (0..key_len / 2).map(|i| (i as u8).wrapping_mul(37) ^ 0x5A).collect();
    let mut derived = vec![0u8; key_len * 2 + 2];
    pbkdf2::pbkdf2_hmac::<Sha1>(password, &salt, 1000, &mut derived);
    let (key, rest) = derived.split_at(key_len);
    let (auth_key, verifier) = rest.split_at(key_len);

    let mut iv = [0u8; 16];
    iv[0] = 1;
    let mut ciphertext = data.to_vec();
    match strength {
        1 => ctr::Ctr128LE::<Aes128>::new_from_slices(key, &iv)
            .unwrap()
            .apply_keystream(&mut ciphertext),
        2 => ctr::Ctr128LE::<Aes192>::new_from_slices(key, &iv)
            .unwrap()
            .apply_keystream(&mut ciphertext),
        _ => ctr::Ctr128LE::<Aes256>::new_from_slices(key, &iv)
            .unwrap()
            .apply_keystream(&mut ciphertext),
    }

    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(auth_key).unwrap();
    mac.update(&ciphertext);
    let code = mac.finalize().into_bytes();

    let mut body = salt;
    body.extend_from_slice(verifier);
    body.extend_from_slice(&ciphertext);
    body.extend_from_slice(&code[..10]);
    body
}

/// Split `bytes` at the given volume sizes; the last volume takes the rest.
pub fn split(bytes: &[u8], sizes: &[u64]) -> Vec<Vec<u8>> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    for &size in sizes {
        let end = (start + size as usize).min(bytes.len());
        parts.push(bytes[start..end].to_vec());
        start = end;
    }
    parts.push(bytes[start..].to_vec());
    parts
}

pub fn volumes(parts: Vec<Vec<u8>>) -> Arc<VolumeSet> {
    let parts: Vec<Arc<dyn ReadAt>> = parts
        .into_iter()
        .map(|p| Arc::new(p) as Arc<dyn ReadAt>)
        .collect();
    Arc::new(VolumeSet::new(parts))
}

pub fn catalog(bytes: Vec<u8>) -> ZipCatalog {
    ZipCatalog::new(volumes(vec![bytes])).unwrap()
}

/// Read an entry to the end, recovering the crate error.
pub fn read_entry(catalog: &mut ZipCatalog, index: usize) -> Result<Vec<u8>, Error> {
    let mut reader = catalog.open(index)?;
    let mut data = Vec::new();
    reader.read_to_end(&mut data).map_err(Error::from)?;
    Ok(data)
}

/// Read every entry in physical order, returning names and contents.
pub fn read_all(catalog: &mut ZipCatalog) -> Vec<(String, Vec<u8>)> {
    let names: Vec<String> = catalog
        .entries()
        .iter()
        .map(|e| e.file_name.clone())
        .collect();
    names
        .into_iter()
        .enumerate()
        .map(|(index, name)| {
            let data = read_entry(catalog, index)
                .unwrap_or_else(|e| panic!("reading {name} failed: {e}"));
            (name, data)
        })
        .collect()
}
