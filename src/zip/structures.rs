use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Cursor};

use crate::error::{Error, Result};

/// General purpose flag: entry is encrypted.
pub const FLAG_ENCRYPTED: u16 = 1 << 0;
/// General purpose flag: CRC and sizes follow the data in a data descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// General purpose flag: name and comment are UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// Length of the truncated HMAC trailing an AES-encrypted entry.
pub const AUTH_CODE_LEN: usize = 10;
/// Length of the AES password verification value.
pub const PASSWORD_VERIFIER_LEN: usize = 2;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    /// Placeholder used by AES-encrypted entries; the real method lives in the 0x9901 extra field.
    Aes,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            99 => CompressionMethod::Aes,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Aes => 99,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// AES key strength from the 0x9901 extra field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesStrength {
    Aes128,
    Aes192,
    Aes256,
}

impl AesStrength {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(AesStrength::Aes128),
            2 => Some(AesStrength::Aes192),
            3 => Some(AesStrength::Aes256),
            _ => None,
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            AesStrength::Aes128 => 16,
            AesStrength::Aes192 => 24,
            AesStrength::Aes256 => 32,
        }
    }

    /// Salt length is half the key length.
    pub fn salt_len(&self) -> usize {
        self.key_len() / 2
    }
}

/// WinZip AES vendor version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesVersion {
    /// AE-1: the CRC-32 is stored and checked.
    Ae1,
    /// AE-2: the CRC-32 is zeroed; integrity rests on the authentication code.
    Ae2,
}

/// How an entry's body is encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    None,
    /// Traditional PKWARE stream cipher.
    ZipCrypto,
    Aes {
        strength: AesStrength,
        version: AesVersion,
    },
    /// PKWARE strong encryption or a malformed AES description.
    Unsupported,
}

/// Contents of the AES extra field (header id 0x9901).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesExtraField {
    pub version: AesVersion,
    pub strength: AesStrength,
    pub compression_method: CompressionMethod,
}

impl AesExtraField {
    pub const HEADER_ID: u16 = 0x9901;
    pub const SIZE: usize = 7;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::format("AES extra field is too short"));
        }
        let version = match u16::from_le_bytes([data[0], data[1]]) {
            1 => AesVersion::Ae1,
            2 => AesVersion::Ae2,
            other => {
                return Err(Error::UnsupportedEncryption(format!(
                    "AES vendor version {other}"
                )));
            }
        };
        if &data[2..4] != b"AE" {
            return Err(Error::UnsupportedEncryption(
                "AES extra field has an unknown vendor id".to_string(),
            ));
        }
        let strength = AesStrength::from_u8(data[4]).ok_or_else(|| {
            Error::UnsupportedEncryption(format!("AES strength {}", data[4]))
        })?;
        let compression_method = CompressionMethod::from_u16(u16::from_le_bytes([data[5], data[6]]));
        Ok(Self {
            version,
            strength,
            compression_method,
        })
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::format("invalid end of central directory"));
        }
        Self::read_fields(&mut Cursor::new(&data[4..]))
            .map_err(|_| Error::format("truncated end of central directory"))
    }

    fn read_fields(cursor: &mut Cursor<&[u8]>) -> io::Result<Self> {
        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::format("invalid ZIP64 end of central directory locator"));
        }
        let mut cursor = Cursor::new(&data[4..]);
        let read = |cursor: &mut Cursor<&[u8]>| -> io::Result<Self> {
            Ok(Self {
                disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
                eocd64_offset: cursor.read_u64::<LittleEndian>()?,
                total_disks: cursor.read_u32::<LittleEndian>()?,
            })
        };
        read(&mut cursor).map_err(|_| Error::format("truncated ZIP64 locator"))
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::format("invalid ZIP64 end of central directory"));
        }
        Self::read_fields(&mut Cursor::new(&data[4..]))
            .map_err(|_| Error::format("truncated ZIP64 end of central directory"))
    }

    fn read_fields(cursor: &mut Cursor<&[u8]>) -> io::Result<Self> {
        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Data descriptor signature (optional in the descriptor itself)
pub const DATA_DESCRIPTOR_SIGNATURE: &[u8] = b"PK\x07\x08";

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Fixed part of a Local File Header.
///
/// Only the variable-length field sizes are needed to find the body; the
/// remaining fields are kept for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    pub fn from_bytes(data: &[u8; LFH_SIZE]) -> Result<Self> {
        if &data[0..4] != LFH_SIGNATURE {
            return Err(Error::format(format!(
                "invalid local file header signature {:02x?}",
                &data[0..4]
            )));
        }
        let u16_at = |at: usize| u16::from_le_bytes([data[at], data[at + 1]]);
        let u32_at =
            |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        Ok(Self {
            version_needed: u16_at(4),
            flags: u16_at(6),
            compression_method: u16_at(8),
            crc32: u32_at(14),
            compressed_size: u32_at(18),
            uncompressed_size: u32_at(22),
            file_name_length: u16_at(26),
            extra_field_length: u16_at(28),
        })
    }

    /// Bytes between the fixed header and the entry body.
    pub fn variable_len(&self) -> u64 {
        self.file_name_length as u64 + self.extra_field_length as u64
    }
}

/// Parsed ZIP file entry information
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub file_name: String,
    /// Name bytes exactly as stored in the central directory.
    pub file_name_raw: Vec<u8>,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub flags: u16,
    pub encryption: Encryption,
    /// Global offset of the Local File Header across all volumes.
    pub lfh_offset: u64,
    /// Volume holding the Local File Header.
    pub volume: usize,
    /// Sizes came from a ZIP64 extra field, so a data descriptor uses 8-byte sizes.
    pub zip64: bool,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub is_directory: bool,
}

impl ZipFileEntry {
    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.last_mod_date & 0x1F) as u8;
        let month = ((self.last_mod_date >> 5) & 0x0F) as u8;
        let year = ((self.last_mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.last_mod_time & 0x1F) * 2) as u8;
        let minute = ((self.last_mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.last_mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption != Encryption::None
    }

    /// AE-2 entries carry a zero CRC and are verified by their authentication code only.
    pub fn verifies_crc(&self) -> bool {
        !matches!(
            self.encryption,
            Encryption::Aes {
                version: AesVersion::Ae2,
                ..
            }
        )
    }
}
