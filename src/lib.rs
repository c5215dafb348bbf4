//! # streamzip
//!
//! A ZIP reader that decodes archives in one forward pass, with inline
//! WinZip AES authentication and support for split (multi-volume) archives.
//!
//! The central directory is read with random access through [`ReadAt`].
//! Entry bodies are then streamed front to back through a single shared
//! cursor, so the archive can come from a local file, a set of volume
//! files, or an HTTP server answering Range requests, and each entry is
//! fully verified (size, CRC-32, AES authentication code) as it is read.
//!
//! ## Features
//!
//! - Local files, split volumes and HTTP/HTTPS URLs
//! - ZIP64 archives
//! - STORED and DEFLATE entries
//! - WinZip AES-128/192/256 (AE-1 and AE-2) and legacy ZipCrypto
//!
//! ## Example
//!
//! ```no_run
//! use std::io::Read;
//! use streamzip::{Error, OpenOptions, ZipCatalog};
//!
//! fn main() -> streamzip::Result<()> {
//!     let options = OpenOptions::new().password("secret");
//!     let mut catalog = ZipCatalog::open_paths(&["archive.z01", "archive.zip"], options)?;
//!
//!     // Entries come back in physical order and must be opened in that order.
//!     for index in 0..catalog.len() {
//!         let mut reader = catalog.open(index)?;
//!         let mut data = Vec::new();
//!         reader.read_to_end(&mut data).map_err(Error::from)?;
//!         println!("{}: {} bytes", reader.entry().file_name, data.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, Result};
pub use io::{ForwardStream, HttpRangeReader, LocalFileReader, ReadAt, VolumeSet, discover_volumes};
pub use zip::{EntryReader, OpenOptions, TestOutcome, ZipCatalog, ZipExtractor, ZipFileEntry};
