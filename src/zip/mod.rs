//! ZIP archive parsing and single-pass decoding.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Central directory parsing with random access over the volumes
//! - [`catalog`]: Entries in physical order and the shared forward-only cursor
//! - [`extractor`]: High-level extraction API for end users
//!
//! Each opened entry is a fixed pipeline of readers:
//!
//! ```text
//! forward stream -> [ZipCrypto | AES] -> [stored | deflate] -> size/CRC check
//! ```
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! The directory is read first, with random access. Entry bodies are then
//! read strictly front to back, so data descriptors and AES authentication
//! codes, which follow the data they describe, are checked as the stream
//! passes them.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB
//! - Split and spanned archives (`.z01`, `.zip.001`)
//! - STORED and DEFLATE compression methods
//! - WinZip AES (AE-1, AE-2) and traditional ZipCrypto encryption
//!
//! ## Limitations
//!
//! - No PKWARE strong encryption
//! - No BZIP2, LZMA, or other compression methods

pub mod aes;
mod catalog;
mod decompress;
mod encoding;
mod extractor;
mod integrity;
mod parser;
mod structures;
pub mod zipcrypto;

pub use catalog::{DEFAULT_CHUNK_SIZE, EntryReader, OpenOptions, ZipCatalog};
pub use decompress::{Decompressor, EntryBody};
pub use encoding::decode_name;
pub use extractor::{TestOutcome, ZipExtractor};
pub use integrity::IntegrityReader;
pub use parser::{DirectoryLocation, ZipParser};
pub use structures::*;
