//! Entry catalog: the directory in physical order plus the shared forward stream.
//!
//! Entries are decoded in a single pass over the volumes. Opening an entry
//! mutably borrows the catalog, so exactly one [`EntryReader`] owns the
//! stream cursor at any time; dropping it hands the cursor back. Entries must
//! be opened in the order returned by [`ZipCatalog::entries`]; going back to
//! an earlier entry fails with [`Error::OutOfOrder`].

use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::io::{ForwardStream, ReadAt, SequentialReader, VolumeSet};

use super::aes::AesReader;
use super::decompress::{Decompressor, EntryBody};
use super::integrity::{DescriptorLayout, Expectations, IntegrityReader};
use super::parser::ZipParser;
use super::structures::{Encryption, FLAG_ENCRYPTED, LFH_SIZE, LocalFileHeader, ZipFileEntry};
use super::zipcrypto::{self, ZipCryptoReader};

/// Default size of sequential reads from the volumes.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Options for opening an archive.
#[derive(Clone)]
pub struct OpenOptions {
    chunk_size: usize,
    password: Option<Zeroizing<Vec<u8>>>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            password: None,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of each sequential read issued to the volumes.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Password used for encrypted entries when none is given at open time.
    pub fn password(mut self, password: impl AsRef<[u8]>) -> Self {
        self.password = Some(Zeroizing::new(password.as_ref().to_vec()));
        self
    }
}

impl std::fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenOptions")
            .field("chunk_size", &self.chunk_size)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

type Stream = ForwardStream<SequentialReader<VolumeSet>>;

/// Archive directory plus the forward-only decode cursor.
pub struct ZipCatalog {
    volumes: Arc<VolumeSet>,
    entries: Vec<ZipFileEntry>,
    stream: Stream,
    password: Option<Zeroizing<Vec<u8>>>,
    /// Entry whose local header was parsed last and the offset of its body,
    /// so a failed password check can be retried without going backwards.
    parsed: Option<(usize, u64)>,
}

impl ZipCatalog {
    /// Read the central directory of `volumes` with default options.
    pub fn new(volumes: Arc<VolumeSet>) -> Result<Self> {
        Self::with_options(volumes, OpenOptions::default())
    }

    pub fn with_options(volumes: Arc<VolumeSet>, options: OpenOptions) -> Result<Self> {
        let entries = ZipParser::new(volumes.clone()).list_files()?;
        log::debug!(
            "catalog of {} entries over {} volume(s), {} bytes",
            entries.len(),
            volumes.volume_count(),
            volumes.size()
        );
        let stream = ForwardStream::new(volumes.sequential(options.chunk_size));
        Ok(Self {
            volumes,
            entries,
            stream,
            password: options.password,
            parsed: None,
        })
    }

    /// Open a single-volume archive.
    pub fn from_reader(source: Arc<dyn ReadAt>) -> Result<Self> {
        Self::new(Arc::new(VolumeSet::single(source)))
    }

    /// Open the given volume files, in order, as one archive.
    pub fn open_paths<P: AsRef<Path>>(paths: &[P], options: OpenOptions) -> Result<Self> {
        let volumes = VolumeSet::open_paths(paths)?;
        Self::with_options(Arc::new(volumes), options)
    }

    /// Entries in physical order, the only order in which they can be opened.
    pub fn entries(&self) -> &[ZipFileEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the first entry called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.file_name == name)
    }

    pub fn volumes(&self) -> &Arc<VolumeSet> {
        &self.volumes
    }

    /// Current offset of the shared decode cursor.
    pub fn position(&self) -> u64 {
        self.stream.position()
    }

    /// Open entry `index` with the password from [`OpenOptions`], if any.
    pub fn open(&mut self, index: usize) -> Result<EntryReader<'_>> {
        let password = self.password.clone();
        self.open_inner(index, password.as_deref().map(Vec::as_slice))
    }

    /// Open entry `index` with an explicit password.
    ///
    /// After [`Error::Password`] the same entry may be opened again with
    /// another password.
    pub fn open_with_password(&mut self, index: usize, password: &[u8]) -> Result<EntryReader<'_>> {
        self.open_inner(index, Some(password))
    }

    fn open_inner(&mut self, index: usize, password: Option<&[u8]>) -> Result<EntryReader<'_>> {
        let entry = self
            .entries
            .get(index)
            .ok_or_else(|| Error::format(format!("no entry at index {index}")))?;
        let position = self.stream.position();

        let body_start = match self.parsed {
            Some((parsed, body_start)) if parsed == index && position == body_start => body_start,
            _ => {
                if position > entry.lfh_offset {
                    return Err(Error::OutOfOrder {
                        name: entry.file_name.clone(),
                        offset: entry.lfh_offset,
                        position,
                    });
                }
                let body_start = read_local_header(&self.stream, entry)?;
                self.parsed = Some((index, body_start));
                body_start
            }
        };

        log::debug!(
            "opening {} ({} -> {} bytes, {:?}, {:?}) at {}",
            entry.file_name,
            entry.compressed_size,
            entry.uncompressed_size,
            entry.compression_method,
            entry.encryption,
            body_start
        );

        if !Decompressor::<&[u8]>::supports(entry.compression_method) {
            return Err(Error::UnsupportedMethod {
                method: entry.compression_method.as_u16(),
            });
        }

        let body_end = body_start.checked_add(entry.compressed_size).ok_or_else(|| {
            Error::format(format!(
                "{}: compressed size {} overflows the archive offset range",
                entry.file_name, entry.compressed_size
            ))
        })?;

        let stream = &self.stream;
        let body = open_body(stream, entry, body_start, password)?;
        let decompressor = Decompressor::new(entry.compression_method, body)?;
        let expect = Expectations {
            name: entry.file_name.clone(),
            uncompressed_size: entry.uncompressed_size,
            compressed_size: entry.compressed_size,
            crc32: entry.crc32,
            verify_crc: entry.verifies_crc(),
            descriptor: entry.has_data_descriptor().then_some(DescriptorLayout {
                offset: body_end,
                zip64: entry.zip64,
            }),
        };

        Ok(EntryReader {
            entry,
            inner: IntegrityReader::new(decompressor, stream, expect),
        })
    }
}

impl std::fmt::Debug for ZipCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipCatalog")
            .field("volumes", &self.volumes)
            .field("entries", &self.entries.len())
            .field("stream", &self.stream)
            .finish()
    }
}

fn truncated_header(name: &str) -> impl FnOnce(io::Error) -> Error + '_ {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::format(format!("local header of {name} is truncated"))
        } else {
            Error::from(e)
        }
    }
}

/// Parse the local header of `entry` and skip to its body. Returns the body offset.
///
/// The name and extra field lengths come from the local header; they may
/// differ from the directory copy.
fn read_local_header(stream: &Stream, entry: &ZipFileEntry) -> Result<u64> {
    stream
        .seek(entry.lfh_offset)
        .map_err(truncated_header(&entry.file_name))?;

    let mut buf = [0u8; LFH_SIZE];
    let mut reader = stream;
    reader
        .read_exact(&mut buf)
        .map_err(truncated_header(&entry.file_name))?;
    let header = LocalFileHeader::from_bytes(&buf)?;

    if (header.flags ^ entry.flags) & FLAG_ENCRYPTED != 0 {
        log::warn!(
            "{}: local header and directory disagree on encryption",
            entry.file_name
        );
    }

    let skip = header.variable_len();
    if stream.discard(skip)? < skip {
        return Err(Error::format(format!(
            "local header of {} is truncated",
            entry.file_name
        )));
    }
    entry
        .lfh_offset
        .checked_add(LFH_SIZE as u64 + skip)
        .ok_or_else(|| Error::format(format!("local header of {} overflows", entry.file_name)))
}

/// Build the plain or decrypting view of exactly the entry's compressed bytes.
fn open_body<'a>(
    stream: &'a Stream,
    entry: &ZipFileEntry,
    body_start: u64,
    password: Option<&[u8]>,
) -> Result<EntryBody<'a, SequentialReader<VolumeSet>>> {
    let require_password = || {
        password.ok_or_else(|| Error::PasswordRequired {
            name: entry.file_name.clone(),
        })
    };

    match entry.encryption {
        Encryption::None => Ok(EntryBody::Plain(stream.take(entry.compressed_size))),
        Encryption::ZipCrypto => {
            let password = require_password()?;
            let check_byte = if entry.has_data_descriptor() {
                (entry.last_mod_time >> 8) as u8
            } else {
                (entry.crc32 >> 24) as u8
            };
            // Keep the encryption header replayable so a wrong password can be retried.
            stream.set_buffer_size(zipcrypto::HEADER_LEN);
            match ZipCryptoReader::new(
                stream.take(entry.compressed_size),
                password,
                check_byte,
                &entry.file_name,
            ) {
                Ok(reader) => {
                    stream.set_buffer_size(0);
                    Ok(EntryBody::ZipCrypto(reader))
                }
                Err(err @ Error::Password { .. }) => {
                    stream.rewind();
                    Err(err)
                }
                Err(err) => {
                    stream.set_buffer_size(0);
                    Err(err)
                }
            }
        }
        Encryption::Aes { strength, .. } => {
            let password = require_password()?;
            let reader = AesReader::new(
                stream,
                body_start,
                entry.compressed_size,
                strength,
                password,
                &entry.file_name,
            )?;
            Ok(EntryBody::Aes(reader))
        }
        Encryption::Unsupported => Err(Error::UnsupportedEncryption(format!(
            "{} uses an encryption scheme that is not supported",
            entry.file_name
        ))),
    }
}

/// Decoded contents of one entry.
///
/// Reading to the end performs every integrity check: size, CRC-32 and,
/// for AES entries, the authentication code. An error is returned in place
/// of end of data when a check fails, and every later read repeats it.
pub struct EntryReader<'a> {
    entry: &'a ZipFileEntry,
    inner: IntegrityReader<'a, SequentialReader<VolumeSet>>,
}

impl EntryReader<'_> {
    pub fn entry(&self) -> &ZipFileEntry {
        self.entry
    }

    /// True for AES entries once their authentication code matched.
    pub fn is_authenticated(&self) -> bool {
        self.inner.is_authenticated()
    }

    /// True once the whole entry was read and verified.
    pub fn is_verified(&self) -> bool {
        self.inner.is_verified()
    }

    /// Decoded bytes produced so far.
    pub fn produced(&self) -> u64 {
        self.inner.produced()
    }
}

impl Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl std::fmt::Debug for EntryReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryReader")
            .field("name", &self.entry.file_name)
            .field("produced", &self.inner.produced())
            .finish()
    }
}
