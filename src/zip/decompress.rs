//! Reader stages between the raw entry body and the integrity check.
//!
//! The combinations are fixed by the format, so each stage is a closed enum
//! chosen once when the entry is opened:
//!
//! - [`EntryBody`]: plain, ZipCrypto or AES view of exactly the entry's
//!   compressed bytes
//! - [`Decompressor`]: stored or deflate over that view

use std::io::{self, Read, Take};

use flate2::read::DeflateDecoder;

use crate::error::{Error, Result};
use crate::io::ForwardStream;

use super::aes::AesReader;
use super::structures::CompressionMethod;
use super::zipcrypto::ZipCryptoReader;

/// Compressed bytes of one entry, decrypted if needed.
pub enum EntryBody<'a, R: Read> {
    Plain(Take<&'a ForwardStream<R>>),
    ZipCrypto(ZipCryptoReader<Take<&'a ForwardStream<R>>>),
    Aes(AesReader<'a, R>),
}

impl<R: Read> EntryBody<'_, R> {
    /// True for AES bodies whose authentication code has been verified.
    pub fn is_authenticated(&self) -> bool {
        match self {
            EntryBody::Aes(reader) => reader.is_authenticated(),
            _ => false,
        }
    }
}

impl<R: Read> Read for EntryBody<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = match self {
            EntryBody::Plain(r) => r.read(buf),
            EntryBody::ZipCrypto(r) => r.read(buf),
            EntryBody::Aes(r) => r.read(buf),
        };
        // Tag raw source errors as transport errors before they reach the decoder.
        result.map_err(|e| match e.kind() {
            io::ErrorKind::Interrupted => e,
            _ => Error::from(e).into(),
        })
    }
}

/// Decompressor registry: one variant per supported method.
pub enum Decompressor<B: Read> {
    Stored(B),
    Deflate(DeflateDecoder<B>),
}

impl<B: Read> Decompressor<B> {
    /// Pick the decompressor for `method`, or fail with [`Error::UnsupportedMethod`].
    pub fn new(method: CompressionMethod, body: B) -> Result<Self> {
        match method {
            CompressionMethod::Stored => Ok(Decompressor::Stored(body)),
            CompressionMethod::Deflate => Ok(Decompressor::Deflate(DeflateDecoder::new(body))),
            other => Err(Error::UnsupportedMethod {
                method: other.as_u16(),
            }),
        }
    }

    /// Check whether `method` can be decoded without building a decoder.
    pub fn supports(method: CompressionMethod) -> bool {
        matches!(method, CompressionMethod::Stored | CompressionMethod::Deflate)
    }

    /// The compressed-side reader, bypassing any decoder buffering.
    pub fn body_mut(&mut self) -> &mut B {
        match self {
            Decompressor::Stored(b) => b,
            Decompressor::Deflate(d) => d.get_mut(),
        }
    }

    pub fn body(&self) -> &B {
        match self {
            Decompressor::Stored(b) => b,
            Decompressor::Deflate(d) => d.get_ref(),
        }
    }
}

impl<B: Read> Read for Decompressor<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decompressor::Stored(b) => b.read(buf),
            Decompressor::Deflate(d) => d.read(buf).map_err(|e| {
                let from_body = e.get_ref().is_some_and(|inner| inner.is::<Error>());
                if from_body || e.kind() == io::ErrorKind::Interrupted {
                    e
                } else {
                    Error::format(format!("corrupt deflate stream: {e}")).into()
                }
            }),
        }
    }
}
