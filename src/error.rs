//! Error types for archive reading.
//!
//! Every failure the decode pipeline can detect maps to one [`Error`]
//! variant, so callers can tell a wrong password from a tampered entry or
//! from a transport failure without parsing messages.
//!
//! Entry readers implement [`std::io::Read`], which forces errors through
//! [`io::Error`]. The crate error travels inside it as the payload and is
//! recovered with `Error::from(io_error)`:
//!
//! ```no_run
//! use std::io::Read;
//! use streamzip::{Error, ZipCatalog};
//!
//! fn read_first(catalog: &mut ZipCatalog) -> streamzip::Result<Vec<u8>> {
//!     let mut reader = catalog.open(0)?;
//!     let mut data = Vec::new();
//!     reader.read_to_end(&mut data).map_err(Error::from)?;
//!     Ok(data)
//! }
//! ```

use std::io;
use std::sync::Arc;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while opening or reading an archive.
///
/// Errors are cheap to clone so that a failed entry reader can hand the
/// same error back on every later call.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The underlying data source failed.
    #[error("transport error: {0}")]
    Transport(Arc<io::Error>),

    /// Structural corruption: bad signature, short fixed header, bad directory.
    #[error("invalid archive format: {0}")]
    Format(String),

    /// The entry uses a compression method this reader does not implement.
    #[error("unsupported compression method: {method}")]
    UnsupportedMethod { method: u16 },

    /// The entry uses an encryption scheme this reader does not implement.
    #[error("unsupported encryption: {0}")]
    UnsupportedEncryption(String),

    /// The entry is encrypted and no password was supplied.
    #[error("password required for {name}")]
    PasswordRequired { name: String },

    /// The password verification value did not match.
    #[error("incorrect password for {name}")]
    Password { name: String },

    /// The authentication code over the ciphertext did not match.
    #[error("authentication failed for {name}: data was modified or corrupted")]
    Authentication { name: String },

    /// The encrypted entry's framing is malformed (e.g. a short authentication trailer).
    #[error("decryption error in {name}: {reason}")]
    Decryption { name: String, reason: String },

    /// The CRC-32 of the produced data did not match.
    #[error("CRC-32 mismatch in {name}: expected {expected:#010x}, got {actual:#010x}")]
    Checksum {
        name: String,
        expected: u32,
        actual: u32,
    },

    /// Fewer (or more) bytes were produced than the entry declares.
    #[error("unexpected end of {name}: expected {expected} bytes, got {actual}")]
    Truncated {
        name: String,
        expected: u64,
        actual: u64,
    },

    /// An entry was opened after the shared stream had already moved past it.
    #[error("entry {name} at offset {offset} opened out of order (stream is at {position})")]
    OutOfOrder {
        name: String,
        offset: u64,
        position: u64,
    },
}

impl Error {
    pub(crate) fn format(reason: impl Into<String>) -> Self {
        Error::Format(reason.into())
    }

    /// Returns true for errors raised by the data source rather than the archive.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        // Unwrap errors that were tunnelled through an `io::Read` boundary.
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(error) = inner.downcast::<Error>() {
                    return *error;
                }
            }
            return Error::format("unrecoverable nested error");
        }
        Error::Transport(Arc::new(err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        // Transport errors keep their kind but stay tagged, so a stage
        // further up can tell them apart from its own failures.
        let kind = match &err {
            Error::Transport(inner) => inner.kind(),
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
