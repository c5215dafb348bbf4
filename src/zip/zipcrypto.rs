//! Traditional PKWARE encryption ("ZipCrypto").
//!
//! A weak byte-oriented stream cipher kept for compatibility with old
//! archives. Every encrypted body starts with a 12-byte header; after
//! decryption its last byte must equal a check byte taken from the entry
//! (high byte of the CRC-32, or of the modification time when a data
//! descriptor is used). This is the only password check the scheme offers.

use std::io::{self, Read};

use crate::error::{Error, Result};

/// Length of the encryption header preceding the data.
pub const HEADER_LEN: usize = 12;

const CRC_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

fn crc32_update(crc: u32, byte: u8) -> u32 {
    CRC_TABLE[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8)
}

/// Cipher state: three 32-bit keys updated with each plaintext byte.
#[derive(Clone)]
pub struct ZipCryptoKeys {
    key0: u32,
    key1: u32,
    key2: u32,
}

impl ZipCryptoKeys {
    pub fn new(password: &[u8]) -> Self {
        let mut keys = Self {
            key0: 0x1234_5678,
            key1: 0x2345_6789,
            key2: 0x3456_7890,
        };
        for &byte in password {
            keys.update(byte);
        }
        keys
    }

    fn update(&mut self, plain: u8) {
        self.key0 = crc32_update(self.key0, plain);
        self.key1 = self
            .key1
            .wrapping_add(self.key0 & 0xFF)
            .wrapping_mul(134_775_813)
            .wrapping_add(1);
        self.key2 = crc32_update(self.key2, (self.key1 >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        let temp = (self.key2 | 2) as u16;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    pub fn decrypt_byte(&mut self, cipher: u8) -> u8 {
        let plain = cipher ^ self.stream_byte();
        self.update(plain);
        plain
    }

    pub fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let cipher = plain ^ self.stream_byte();
        self.update(plain);
        cipher
    }
}

/// Decrypting reader over a ZipCrypto body.
pub struct ZipCryptoReader<R> {
    inner: R,
    keys: ZipCryptoKeys,
}

impl<R: Read> ZipCryptoReader<R> {
    /// Consume and check the encryption header.
    ///
    /// Fails with [`Error::Password`] before any data is decrypted when the
    /// check byte does not match.
    pub fn new(mut inner: R, password: &[u8], check_byte: u8, name: &str) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        inner.read_exact(&mut header).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::Decryption {
                    name: name.to_string(),
                    reason: "encryption header is truncated".to_string(),
                }
            } else {
                Error::from(e)
            }
        })?;

        let mut keys = ZipCryptoKeys::new(password);
        for byte in header.iter_mut() {
            *byte = keys.decrypt_byte(*byte);
        }
        if header[HEADER_LEN - 1] != check_byte {
            return Err(Error::Password {
                name: name.to_string(),
            });
        }
        Ok(Self { inner, keys })
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: Read> Read for ZipCryptoReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        for byte in &mut buf[..n] {
            *byte = self.keys.decrypt_byte(*byte);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypt(password: &[u8], check: u8, data: &[u8]) -> Vec<u8> {
        let mut keys = ZipCryptoKeys::new(password);
        let mut header = [0x5Au8; HEADER_LEN];
        header[HEADER_LEN - 1] = check;
        header
            .iter()
            .chain(data)
            .map(|&b| keys.encrypt_byte(b))
            .collect()
    }

    #[test]
    fn test_crc_table_matches_crc32fast() {
        let data = b"123456789";
        let crc = !data.iter().fold(!0u32, |crc, &b| crc32_update(crc, b));
        assert_eq!(crc, crc32fast::hash(data));
    }

    #[test]
    fn test_decrypts_with_correct_password() {
        let body = encrypt(b"secret", 0xAB, b"legacy payload");
        let mut reader = ZipCryptoReader::new(&body[..], b"secret", 0xAB, "x").unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"legacy payload");
    }

    #[test]
    fn test_wrong_password_is_rejected_before_data() {
        let body = encrypt(b"secret", 0xAB, b"legacy payload");
        // A wrong password passes the one-byte check about once in 256 tries,
        // but then it cannot produce the same plaintext.
        let mut rejected = 0;
        let candidates: [&[u8]; 5] = [b"wrong", b"Secret", b"secret1", b"s", b"password"];
        for candidate in candidates {
            match ZipCryptoReader::new(&body[..], candidate, 0xAB, "x") {
                Err(Error::Password { .. }) => rejected += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
                Ok(mut reader) => {
                    let mut out = Vec::new();
                    reader.read_to_end(&mut out).unwrap();
                    assert_ne!(out, b"legacy payload");
                }
            }
        }
        assert!(rejected >= 1);
    }

    #[test]
    fn test_short_header_is_decryption_error() {
        let result = ZipCryptoReader::new(&[0u8; 5][..], b"pw", 0, "x");
        assert!(matches!(result, Err(Error::Decryption { .. })));
    }
}
