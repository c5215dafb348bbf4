//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from a [`VolumeSet`] that may span several split volumes.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the archive's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. Reorder the entries by Local File Header offset so the bodies can be
//!    decoded in one forward pass
//!
//! Offsets stored in the directory are relative to the volume ("disk") that
//! declares them. They are translated into global offsets across the whole
//! volume set here, so nothing downstream needs to know about volumes.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Read};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::io::{ReadAt, VolumeSet};

use super::encoding::decode_name;
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// PKWARE strong encryption flag; not supported.
const FLAG_STRONG_ENCRYPTION: u16 = 1 << 6;

/// Location and size of the Central Directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryLocation {
    /// Global offset of the first directory record.
    pub offset: u64,
    pub size: u64,
    pub total_entries: u64,
}

/// Low-level ZIP file parser.
///
/// Reads the End of Central Directory and the Central Directory with random
/// access. Typically used through [`ZipCatalog`](super::ZipCatalog).
pub struct ZipParser {
    /// The underlying volumes
    volumes: Arc<VolumeSet>,
    /// Total size of the archive in bytes
    size: u64,
}

impl ZipParser {
    pub fn new(volumes: Arc<VolumeSet>) -> Self {
        let size = volumes.size();
        Self { volumes, size }
    }

    /// Translate a disk-relative offset into a global one.
    ///
    /// Returns `None` when the sum does not fit in a `u64`.
    fn global_offset(&self, disk: u32, offset: u64) -> Option<u64> {
        match self.volumes.volume_start(disk as usize) {
            Some(start) if self.volumes.volume_count() > 1 => start.checked_add(offset),
            _ => Some(offset),
        }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// The EOCD is located at the end of the ZIP file. This method
    /// handles both the simple case (no comment) and archives with
    /// comments by searching backwards for the signature.
    ///
    /// Returns the record and its global offset.
    pub fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        // Try the common case of an archive without a comment first.
        if self.size >= EndOfCentralDirectory::SIZE as u64 {
            let offset = self.size - EndOfCentralDirectory::SIZE as u64;
            let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
            self.volumes.read_exact_at(offset, &mut buf)?;

            if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
                let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
                return Ok((eocd, offset));
            }
        }

        // The EOCD could be earlier if there's a ZIP comment.
        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.volumes.read_exact_at(search_start, &mut buf)?;

        // Search backwards for EOCD signature (PK\x05\x06)
        for i in (0..=buf.len().saturating_sub(EndOfCentralDirectory::SIZE)).rev() {
            if buf.len() < EndOfCentralDirectory::SIZE {
                break;
            }
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                // The comment length field must match the remaining bytes.
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                    )?;
                    return Ok((eocd, search_start + i as u64));
                }
            }
        }

        Err(Error::format("end of central directory not found"))
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD indicates ZIP64 extensions are needed
    /// (fields set to 0xFFFF or 0xFFFFFFFF).
    pub fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        // The ZIP64 EOCD Locator is located immediately before the regular EOCD
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| Error::format("missing ZIP64 end of central directory locator"))?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.volumes.read_exact_at(locator_offset, &mut locator_buf)?;

        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        // Read the actual ZIP64 EOCD from the offset specified in the locator
        let eocd64_offset = self
            .global_offset(locator.disk_with_eocd64, locator.eocd64_offset)
            .ok_or_else(|| Error::format("ZIP64 end of central directory offset overflows"))?;
        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.volumes.read_exact_at(eocd64_offset, &mut eocd64_buf)?;

        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// Locate the Central Directory.
    pub fn locate_directory(&self) -> Result<DirectoryLocation> {
        let (eocd, eocd_offset) = self.find_eocd()?;

        let (disk, offset, size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset)?;
            (
                eocd64.disk_with_cd,
                eocd64.cd_offset,
                eocd64.cd_size,
                eocd64.total_entries,
            )
        } else {
            (
                eocd.disk_with_cd as u32,
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        let offset = self
            .global_offset(disk, offset)
            .ok_or_else(|| Error::format("central directory offset overflows"))?;
        if offset > eocd_offset {
            return Err(Error::format(format!(
                "central directory offset {offset} lies beyond its end record at {eocd_offset}"
            )));
        }
        log::debug!(
            "central directory at {} ({} bytes, {} entries)",
            offset,
            size,
            total_entries
        );

        Ok(DirectoryLocation {
            offset,
            size,
            total_entries,
        })
    }

    /// List all files in the ZIP archive, ordered by physical position.
    ///
    /// Directory records are parsed until the declared count is reached or a
    /// malformed or short record is found; the latter ends the listing
    /// without failing it. The result is sorted by Local File Header
    /// offset, which may differ from directory order.
    pub fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        let location = self.locate_directory()?;

        // Read the whole directory at once; a directory cut off by the end of
        // the archive makes enumeration stop at the first short record.
        let available = self.size.saturating_sub(location.offset);
        let cd_len = location.size.min(available) as usize;
        let mut cd_data = vec![0u8; cd_len];
        let read = self.volumes.read_at(location.offset, &mut cd_data)?;
        cd_data.truncate(read);

        let capacity = location.total_entries.min(cd_data.len() as u64 / CDFH_MIN_SIZE as u64);
        let mut entries = Vec::with_capacity(capacity as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());

        for index in 0..location.total_entries {
            match self.parse_cdfh(&mut cursor) {
                Ok(entry) => entries.push(entry),
                Err(ParseStop(reason)) => {
                    log::warn!(
                        "central directory ends after {} of {} entries: {}",
                        index,
                        location.total_entries,
                        reason
                    );
                    break;
                }
            }
        }

        entries.sort_by_key(|entry| entry.lfh_offset);
        Ok(entries)
    }

    /// Parse a Central Directory File Header from a cursor.
    ///
    /// The CDFH contains metadata about a file in the archive, including
    /// its name, sizes, and location of the actual file data.
    fn parse_cdfh(&self, cursor: &mut Cursor<&[u8]>) -> std::result::Result<ZipFileEntry, ParseStop> {
        let record_start = cursor.position();
        let remaining = cursor.get_ref().len() as u64 - record_start;
        if remaining < CDFH_MIN_SIZE as u64 {
            return Err(ParseStop(format!(
                "record at {record_start} has only {remaining} bytes"
            )));
        }

        // Read and verify the signature (PK\x01\x02)
        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig)?;
        if sig != CDFH_SIGNATURE {
            return Err(ParseStop(format!(
                "bad signature {sig:02x?} at {record_start}"
            )));
        }

        // Read fixed-size header fields
        let _version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;
        let file_comment_length = cursor.read_u16::<LittleEndian>()?;
        let mut disk_number_start = cursor.read_u16::<LittleEndian>()? as u32;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let _external_attrs = cursor.read_u32::<LittleEndian>()?;
        let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

        // Read the variable-length file name
        let mut file_name_raw = vec![0u8; file_name_length as usize];
        cursor.read_exact(&mut file_name_raw)?;
        let file_name = decode_name(&file_name_raw, flags);

        // Directory entries end with '/'
        let is_directory = file_name.ends_with('/');

        let mut extra = vec![0u8; extra_field_length as usize];
        cursor.read_exact(&mut extra)?;

        // Skip over the file comment (we don't use it)
        let comment_end = cursor.position() + file_comment_length as u64;
        if comment_end > cursor.get_ref().len() as u64 {
            return Err(ParseStop(format!(
                "comment of record at {record_start} is cut off"
            )));
        }
        cursor.set_position(comment_end);

        // Walk the extra field for ZIP64 and AES information
        let mut zip64 = false;
        let mut aes = None;
        let mut extra_cursor = Cursor::new(extra.as_slice());
        while extra_cursor.position() + 4 <= extra.len() as u64 {
            let header_id = extra_cursor.read_u16::<LittleEndian>()?;
            let field_size = extra_cursor.read_u16::<LittleEndian>()? as u64;
            let field_start = extra_cursor.position();
            let field_end = (field_start + field_size).min(extra.len() as u64);

            match header_id {
                0x0001 => {
                    // Fields are present only if the header field is saturated
                    if uncompressed_size == 0xFFFFFFFF && extra_cursor.position() + 8 <= field_end {
                        uncompressed_size = extra_cursor.read_u64::<LittleEndian>()?;
                        zip64 = true;
                    }
                    if compressed_size == 0xFFFFFFFF && extra_cursor.position() + 8 <= field_end {
                        compressed_size = extra_cursor.read_u64::<LittleEndian>()?;
                        zip64 = true;
                    }
                    if lfh_offset == 0xFFFFFFFF && extra_cursor.position() + 8 <= field_end {
                        lfh_offset = extra_cursor.read_u64::<LittleEndian>()?;
                    }
                    if disk_number_start == 0xFFFF && extra_cursor.position() + 4 <= field_end {
                        disk_number_start = extra_cursor.read_u32::<LittleEndian>()?;
                    }
                }
                AesExtraField::HEADER_ID => {
                    let data = &extra[field_start as usize..field_end as usize];
                    aes = Some(AesExtraField::from_bytes(data));
                }
                _ => {}
            }
            extra_cursor.set_position(field_end);
        }

        let mut method = CompressionMethod::from_u16(compression_method);
        let encryption = if flags & FLAG_ENCRYPTED == 0 {
            Encryption::None
        } else if flags & FLAG_STRONG_ENCRYPTION != 0 {
            Encryption::Unsupported
        } else {
            match aes {
                Some(Ok(field)) if method == CompressionMethod::Aes => {
                    method = field.compression_method;
                    Encryption::Aes {
                        strength: field.strength,
                        version: field.version,
                    }
                }
                Some(Err(err)) => {
                    log::warn!("{}: {}", file_name, err);
                    Encryption::Unsupported
                }
                _ if method == CompressionMethod::Aes => {
                    log::warn!("{}: AES method without AES extra field", file_name);
                    Encryption::Unsupported
                }
                _ => Encryption::ZipCrypto,
            }
        };

        let lfh_offset = self
            .global_offset(disk_number_start, lfh_offset)
            .filter(|&offset| offset < self.size)
            .ok_or_else(|| {
                ParseStop(format!(
                    "local header of {file_name} at disk {disk_number_start} offset {lfh_offset} is outside the archive"
                ))
            })?;
        let volume = self
            .volumes
            .locate(lfh_offset)
            .map(|(volume, _)| volume)
            .unwrap_or(disk_number_start as usize);

        Ok(ZipFileEntry {
            file_name,
            file_name_raw,
            compression_method: method,
            compressed_size,
            uncompressed_size,
            crc32,
            flags,
            encryption,
            lfh_offset,
            volume,
            zip64,
            last_mod_time,
            last_mod_date,
            is_directory,
        })
    }
}

/// A short or malformed directory record; treated as the end of the directory.
struct ParseStop(String);

impl From<io::Error> for ParseStop {
    fn from(err: io::Error) -> Self {
        // Reads here come from an in-memory cursor, so an I/O error means the
        // record ran past the end of the directory bytes.
        ParseStop(err.to_string())
    }
}
