//! WinZip AES encryption (AE-1 / AE-2).
//!
//! An AES entry body is laid out as
//!
//! ```text
//! salt (key_len / 2) | verifier (2) | ciphertext | authentication code (10)
//! ```
//!
//! Keys come from PBKDF2-HMAC-SHA1 (1000 iterations) over the password and
//! salt. The ciphertext is AES in CTR mode with a little-endian counter
//! starting at 1, and the authentication code is HMAC-SHA1 over the
//! ciphertext truncated to 10 bytes.
//!
//! [`AesReader`] works on the shared forward stream: it peeks the salt and
//! verifier through a look-ahead session, rejects a wrong password before
//! decrypting anything, decrypts while feeding the HMAC, and checks the
//! trailing code once the ciphertext is exhausted.

use std::io::{self, Read, Take};

use aes::{Aes128, Aes192, Aes256};
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::io::ForwardStream;

use super::structures::{AUTH_CODE_LEN, AesStrength, PASSWORD_VERIFIER_LEN};

type HmacSha1 = Hmac<Sha1>;

const PBKDF2_ROUNDS: u32 = 1000;

/// Key material derived from a password and an entry's salt.
pub struct AesKeys {
    pub decryption_key: Zeroizing<Vec<u8>>,
    pub authentication_key: Zeroizing<Vec<u8>>,
    pub verifier: [u8; PASSWORD_VERIFIER_LEN],
}

/// Derive the decryption key, authentication key and password verifier.
pub fn derive_keys(password: &[u8], salt: &[u8], strength: AesStrength) -> AesKeys {
    let key_len = strength.key_len();
    let mut derived = Zeroizing::new(vec![0u8; key_len * 2 + PASSWORD_VERIFIER_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, PBKDF2_ROUNDS, &mut derived);

    AesKeys {
        decryption_key: Zeroizing::new(derived[..key_len].to_vec()),
        authentication_key: Zeroizing::new(derived[key_len..key_len * 2].to_vec()),
        verifier: [derived[key_len * 2], derived[key_len * 2 + 1]],
    }
}

/// AES-CTR keystream for one of the three key sizes.
pub enum AesCtr {
    Aes128(ctr::Ctr128LE<Aes128>),
    Aes192(ctr::Ctr128LE<Aes192>),
    Aes256(ctr::Ctr128LE<Aes256>),
}

impl AesCtr {
    pub fn new(strength: AesStrength, key: &[u8]) -> Result<Self> {
        let mut iv = [0u8; 16];
        iv[0] = 1;
        let bad_key = |_| Error::UnsupportedEncryption(format!("AES key of {} bytes", key.len()));
        Ok(match strength {
            AesStrength::Aes128 => {
                AesCtr::Aes128(ctr::Ctr128LE::new_from_slices(key, &iv).map_err(bad_key)?)
            }
            AesStrength::Aes192 => {
                AesCtr::Aes192(ctr::Ctr128LE::new_from_slices(key, &iv).map_err(bad_key)?)
            }
            AesStrength::Aes256 => {
                AesCtr::Aes256(ctr::Ctr128LE::new_from_slices(key, &iv).map_err(bad_key)?)
            }
        })
    }

    /// XOR the keystream into `buf`; encryption and decryption are the same operation.
    pub fn apply_keystream(&mut self, buf: &mut [u8]) {
        match self {
            AesCtr::Aes128(c) => c.apply_keystream(buf),
            AesCtr::Aes192(c) => c.apply_keystream(buf),
            AesCtr::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

enum AuthState {
    Streaming,
    Authenticated,
    Failed(Error),
}

/// Decrypting, authenticating reader over one AES entry body.
pub struct AesReader<'a, R: Read> {
    data: Take<&'a ForwardStream<R>>,
    stream: &'a ForwardStream<R>,
    cipher: AesCtr,
    mac: HmacSha1,
    data_len: u64,
    trailer_offset: u64,
    name: String,
    state: AuthState,
}

impl<'a, R: Read> AesReader<'a, R> {
    /// Check the password and position the stream at the first ciphertext byte.
    ///
    /// `body_start` is the stream offset of the salt and `body_len` the
    /// entry's compressed size (salt, verifier, ciphertext and code).
    pub fn new(
        stream: &'a ForwardStream<R>,
        body_start: u64,
        body_len: u64,
        strength: AesStrength,
        password: &[u8],
        name: &str,
    ) -> Result<Self> {
        let header_len = strength.salt_len() + PASSWORD_VERIFIER_LEN;
        let overhead = (header_len + AUTH_CODE_LEN) as u64;
        let data_len = body_len.checked_sub(overhead).ok_or_else(|| Error::Decryption {
            name: name.to_string(),
            reason: format!("body of {body_len} bytes cannot hold AES framing"),
        })?;

        let overflow = || Error::format(format!("{name}: AES body overflows the offset range"));
        let data_start = body_start.checked_add(header_len as u64).ok_or_else(overflow)?;
        let trailer_offset = data_start.checked_add(data_len).ok_or_else(overflow)?;

        stream.seek(body_start)?;
        stream.set_buffer_size(header_len);
        let mut header = vec![0u8; header_len];
        let mut peek = stream;
        let peeked = peek.read_exact(&mut header);
        stream.rewind();
        peeked.map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::Decryption {
                    name: name.to_string(),
                    reason: "salt and password verifier are truncated".to_string(),
                }
            } else {
                Error::from(e)
            }
        })?;

        let (salt, verifier) = header.split_at(strength.salt_len());
        let keys = derive_keys(password, salt, strength);
        if keys.verifier != verifier {
            log::debug!("{}: password verifier mismatch", name);
            return Err(Error::Password {
                name: name.to_string(),
            });
        }

        let cipher = AesCtr::new(strength, &keys.decryption_key)?;
        let mac = <HmacSha1 as Mac>::new_from_slice(&keys.authentication_key)
            .map_err(|e| Error::UnsupportedEncryption(e.to_string()))?;

        // The verified header bytes are replayed here and skipped; they are
        // not part of the authenticated ciphertext.
        stream.seek(data_start)?;

        Ok(Self {
            data: stream.take(data_len),
            stream,
            cipher,
            mac,
            data_len,
            trailer_offset,
            name: name.to_string(),
            state: AuthState::Streaming,
        })
    }

    /// True once the authentication code has been checked and matched.
    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated)
    }

    fn fail(&mut self, err: Error) -> io::Error {
        self.state = AuthState::Failed(err.clone());
        err.into()
    }

    fn verify(&mut self) -> io::Result<()> {
        if let Err(e) = self.stream.seek(self.trailer_offset) {
            return Err(self.fail(e.into()));
        }

        let mut code = [0u8; AUTH_CODE_LEN];
        let mut filled = 0;
        while filled < AUTH_CODE_LEN {
            match self.stream.read(&mut code[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.fail(e.into())),
            }
        }
        if filled < AUTH_CODE_LEN {
            let err = Error::Decryption {
                name: self.name.clone(),
                reason: format!("authentication code has {filled} of {AUTH_CODE_LEN} bytes"),
            };
            return Err(self.fail(err));
        }

        // Constant-time comparison against the leftmost 10 bytes of the HMAC.
        if self.mac.clone().verify_truncated_left(&code).is_err() {
            let err = Error::Authentication {
                name: self.name.clone(),
            };
            return Err(self.fail(err));
        }

        log::trace!("{}: authentication code verified", self.name);
        self.state = AuthState::Authenticated;
        Ok(())
    }
}

impl<R: Read> Read for AesReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &self.state {
            AuthState::Failed(err) => return Err(err.clone().into()),
            AuthState::Authenticated => return Ok(0),
            AuthState::Streaming => {}
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let n = match self.data.read(buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Err(e),
            Err(e) => return Err(self.fail(e.into())),
        };
        if n > 0 {
            self.mac.update(&buf[..n]);
            self.cipher.apply_keystream(&mut buf[..n]);
            return Ok(n);
        }

        if self.data.limit() > 0 {
            let err = Error::Truncated {
                name: self.name.clone(),
                expected: self.data_len,
                actual: self.data_len - self.data.limit(),
            };
            return Err(self.fail(err));
        }

        self.verify()?;
        Ok(0)
    }
}
