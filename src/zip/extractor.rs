use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::{Error, Result};

use super::catalog::ZipCatalog;
use super::structures::ZipFileEntry;

/// Result of reading an entry without writing it anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestOutcome {
    /// Decoded bytes, equal to the entry's uncompressed size.
    pub bytes: u64,
    /// The AES authentication code was checked and matched.
    pub authenticated: bool,
}

/// ZIP file extractor
///
/// Entries must be processed in the order of [`list_files`](Self::list_files).
pub struct ZipExtractor {
    catalog: ZipCatalog,
}

impl ZipExtractor {
    pub fn new(catalog: ZipCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &ZipCatalog {
        &self.catalog
    }

    /// All entries, in physical order.
    pub fn list_files(&self) -> &[ZipFileEntry] {
        self.catalog.entries()
    }

    /// Decode entry `index` into `writer`, returning the number of bytes written.
    pub fn extract_to_writer<W: Write + ?Sized>(&mut self, index: usize, writer: &mut W) -> Result<u64> {
        let mut reader = self.catalog.open(index)?;
        let mut buf = vec![0u8; 64 * 1024];
        let mut written = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::from(e)),
            };
            writer.write_all(&buf[..n])?;
            written += n as u64;
        }
        Ok(written)
    }

    /// Extract file to disk
    ///
    /// Directory entries create the directory. A file whose data fails
    /// verification is removed again.
    pub fn extract_to_file(&mut self, index: usize, output_path: &Path) -> Result<u64> {
        let is_directory = self
            .list_files()
            .get(index)
            .is_some_and(|entry| entry.is_directory);
        if is_directory {
            fs::create_dir_all(output_path)?;
            return Ok(0);
        }

        // Create parent directories if needed
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = io::BufWriter::new(fs::File::create(output_path)?);
        let result = self
            .extract_to_writer(index, &mut file)
            .and_then(|written| file.flush().map(|_| written).map_err(Error::from));
        if result.is_err() {
            drop(file);
            if let Err(e) = fs::remove_file(output_path) {
                log::warn!("could not remove {}: {}", output_path.display(), e);
            }
        }
        result
    }

    /// Extract file to stdout
    pub fn extract_to_stdout(&mut self, index: usize) -> Result<u64> {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        let written = self.extract_to_writer(index, &mut lock)?;
        lock.flush()?;
        Ok(written)
    }

    /// Read entry `index` to the end, running every integrity check.
    pub fn test_entry(&mut self, index: usize) -> Result<TestOutcome> {
        let mut reader = self.catalog.open(index)?;
        let bytes = io::copy(&mut reader, &mut io::sink()).map_err(Error::from)?;
        Ok(TestOutcome {
            bytes,
            authenticated: reader.is_authenticated(),
        })
    }
}
