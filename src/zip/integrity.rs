//! Size and CRC-32 verification of decoded entry data.
//!
//! [`IntegrityReader`] is the outermost stage of an entry pipeline. It counts
//! and checksums what the decompressor produces and, at end of data, resolves
//! the data descriptor (if the entry announces one) before comparing CRCs.
//!
//! Data descriptor layout after the compressed bytes:
//!
//! ```text
//! [signature PK\x07\x08] crc32 (4) | compressed size (4 or 8) | uncompressed size (4 or 8)
//! ```
//!
//! The signature is optional. When the first four bytes are instead the
//! signature of the next local header or of the central directory, the
//! writer emitted no descriptor at all; those bytes are rewound for the next
//! reader and the CRC from the central directory is used.

use std::io::{self, Read};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::io::ForwardStream;

use super::decompress::{Decompressor, EntryBody};
use super::structures::{
    CDFH_SIGNATURE, DATA_DESCRIPTOR_SIGNATURE, EndOfCentralDirectory, LFH_SIGNATURE,
};

/// Where the data descriptor of an entry would start and how wide its size fields are.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorLayout {
    pub offset: u64,
    pub zip64: bool,
}

impl DescriptorLayout {
    fn sizes_len(&self) -> usize {
        if self.zip64 { 16 } else { 8 }
    }
}

/// What an entry is expected to decode to.
#[derive(Debug, Clone)]
pub struct Expectations {
    pub name: String,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub crc32: u32,
    /// False for AE-2 entries, whose CRC field is zero.
    pub verify_crc: bool,
    pub descriptor: Option<DescriptorLayout>,
}

enum State {
    Reading,
    Done,
    Failed(Error),
}

/// Counting, checksumming reader over a decompressor.
pub struct IntegrityReader<'a, R: Read> {
    inner: Decompressor<EntryBody<'a, R>>,
    stream: &'a ForwardStream<R>,
    hasher: crc32fast::Hasher,
    produced: u64,
    expect: Expectations,
    state: State,
}

impl<'a, R: Read> IntegrityReader<'a, R> {
    pub fn new(
        inner: Decompressor<EntryBody<'a, R>>,
        stream: &'a ForwardStream<R>,
        expect: Expectations,
    ) -> Self {
        Self {
            inner,
            stream,
            hasher: crc32fast::Hasher::new(),
            produced: 0,
            expect,
            state: State::Reading,
        }
    }

    /// Bytes produced so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// True once all data was produced and every check passed.
    pub fn is_verified(&self) -> bool {
        matches!(self.state, State::Done)
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.body().is_authenticated()
    }

    fn fail(&mut self, err: Error) -> io::Error {
        log::debug!("{}: {}", self.expect.name, err);
        self.state = State::Failed(err.clone());
        err.into()
    }

    fn truncated(&self) -> Error {
        Error::Truncated {
            name: self.expect.name.clone(),
            expected: self.expect.uncompressed_size,
            actual: self.produced,
        }
    }

    fn finish(&mut self) -> Result<()> {
        // Pull the rest of the compressed body through the decryption stage
        // so an AES authentication code is always checked.
        io::copy(self.inner.body_mut(), &mut io::sink())?;

        if self.produced != self.expect.uncompressed_size {
            return Err(self.truncated());
        }

        let expected_crc = match self.expect.descriptor {
            Some(layout) => self.read_descriptor(layout)?.unwrap_or(self.expect.crc32),
            None => self.expect.crc32,
        };

        if self.expect.verify_crc {
            let actual = self.hasher.clone().finalize();
            if actual != expected_crc {
                return Err(Error::Checksum {
                    name: self.expect.name.clone(),
                    expected: expected_crc,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Read the data descriptor, returning its CRC, or `None` when the entry
    /// turns out to have no descriptor at all.
    fn read_descriptor(&mut self, layout: DescriptorLayout) -> Result<Option<u32>> {
        self.stream.seek(layout.offset)?;
        self.stream.set_buffer_size(4 + 4 + layout.sizes_len());

        let mut first = [0u8; 4];
        if let Err(e) = self.read_window(&mut first) {
            self.stream.set_buffer_size(0);
            return Err(e);
        }

        if first == LFH_SIGNATURE
            || first == CDFH_SIGNATURE
            || first == EndOfCentralDirectory::SIGNATURE
        {
            log::debug!(
                "{}: no data descriptor before the next record at {}",
                self.expect.name,
                layout.offset
            );
            self.stream.rewind();
            return Ok(None);
        }

        let result = self.read_descriptor_fields(layout, first);
        self.stream.set_buffer_size(0);
        result.map(Some)
    }

    fn read_descriptor_fields(&mut self, layout: DescriptorLayout, first: [u8; 4]) -> Result<u32> {
        let crc = if first == DATA_DESCRIPTOR_SIGNATURE {
            let mut crc = [0u8; 4];
            self.read_window(&mut crc)?;
            u32::from_le_bytes(crc)
        } else {
            u32::from_le_bytes(first)
        };

        let mut sizes = [0u8; 16];
        let sizes = &mut sizes[..layout.sizes_len()];
        self.read_window(sizes)?;
        let compressed = if layout.zip64 {
            LittleEndian::read_u64(&sizes[..8])
        } else {
            LittleEndian::read_u32(&sizes[..4]) as u64
        };
        if compressed != self.expect.compressed_size {
            log::warn!(
                "{}: data descriptor declares {} compressed bytes, directory says {}",
                self.expect.name,
                compressed,
                self.expect.compressed_size
            );
        }
        Ok(crc)
    }

    fn read_window(&self, buf: &mut [u8]) -> Result<()> {
        let mut reader = self.stream;
        reader.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::format(format!("data descriptor of {} is truncated", self.expect.name))
            } else {
                Error::from(e)
            }
        })
    }
}

impl<R: Read> Read for IntegrityReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &self.state {
            State::Failed(err) => return Err(err.clone().into()),
            State::Done => return Ok(0),
            State::Reading => {}
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let n = match self.inner.read(buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Err(e),
            Err(e) => return Err(self.fail(e.into())),
        };

        if n > 0 {
            self.produced += n as u64;
            if self.produced > self.expect.uncompressed_size {
                let err = self.truncated();
                return Err(self.fail(err));
            }
            self.hasher.update(&buf[..n]);
            return Ok(n);
        }

        match self.finish() {
            Ok(()) => {
                log::trace!("{}: verified {} bytes", self.expect.name, self.produced);
                self.state = State::Done;
                Ok(0)
            }
            Err(err) => Err(self.fail(err)),
        }
    }
}
