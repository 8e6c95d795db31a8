//! Per-file envelope
//!
//! Every encrypted object body is laid out as `[16-byte IV][ciphertext]`,
//! and the same IV is recorded hex-encoded in the object's metadata. On
//! receive the two copies must agree before a single byte is decrypted.

use crate::crypto::cipher::{CipherReader, Direction};
use crate::crypto::envelope::decode_fixed;
use crate::crypto::keys::FileKey;
use crate::crypto::{random_bytes, IV_SIZE};
use crate::error::{Error, Result};
use std::io::{self, Chain, Cursor, Read};
use tracing::debug;

/// Outbound encrypted body: IV header followed by ciphertext
pub type SealedReader<R> = Chain<Cursor<[u8; IV_SIZE]>, CipherReader<R>>;

/// Length of an encrypted body for a plaintext of `plain_len` bytes
pub fn sealed_len(plain_len: u64) -> u64 {
    plain_len + IV_SIZE as u64
}

/// IV for a single encrypted file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEnvelope {
    iv: [u8; IV_SIZE],
}

impl FileEnvelope {
    /// Fresh random IV; never reuse one across files
    pub fn generate() -> Self {
        FileEnvelope { iv: random_bytes() }
    }

    /// Parse the `iv` metadata attribute
    ///
    /// Missing or empty means the object was sent unencrypted.
    pub fn from_metadata(iv_hex: Option<&str>) -> Result<Option<Self>> {
        match iv_hex {
            None => Ok(None),
            Some(s) if s.is_empty() => Ok(None),
            Some(s) => Ok(Some(FileEnvelope {
                iv: decode_fixed("iv", s)?,
            })),
        }
    }

    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// Hex form for the metadata attribute
    pub fn iv_hex(&self) -> String {
        hex::encode(self.iv)
    }

    /// Encrypt `plaintext` for sending, with the IV prepended
    pub fn seal<R: Read>(&self, key: &FileKey, plaintext: R) -> Result<SealedReader<R>> {
        let body = CipherReader::new(key.key(), &self.iv, Direction::Encrypt, plaintext)?;
        Ok(Cursor::new(self.iv).chain(body))
    }

    /// Check the embedded IV and return a decrypting reader over the rest
    ///
    /// Fails before yielding anything if the header is short or differs
    /// from this envelope's IV.
    pub fn open<R: Read>(&self, key: &FileKey, mut body: R) -> Result<CipherReader<R>> {
        let header = read_header(&mut body)?;

        if header != self.iv {
            return Err(Error::IvMismatch {
                header: hex::encode(header),
                metadata: self.iv_hex(),
            });
        }

        debug!("Header IV matches metadata IV {}", self.iv_hex());
        CipherReader::new(key.key(), &header, Direction::Decrypt, body)
    }
}

/// Read the IV header, tolerating short reads
fn read_header<R: Read>(body: &mut R) -> Result<[u8; IV_SIZE]> {
    let mut header = [0u8; IV_SIZE];
    let mut filled = 0;

    while filled < IV_SIZE {
        match body.read(&mut header[filled..]) {
            Ok(0) => return Err(Error::TruncatedHeader(filled)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(header)
}

/// A received object body, decrypted or passed through
pub enum Received<R> {
    /// Object carried no IV and was stored as-is
    Passthrough(R),
    /// IV verified; plaintext is produced as the body is read
    Decrypting(CipherReader<R>),
}

impl<R> Received<R> {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Received::Decrypting(_))
    }
}

impl<R: Read> Read for Received<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Received::Passthrough(r) => r.read(buf),
            Received::Decrypting(r) => r.read(buf),
        }
    }
}

/// Prepare a received body for reading
///
/// `key` is only invoked when the metadata says the object is encrypted, so
/// callers can defer prompting for a passphrase until it is actually needed.
pub fn open_received<R, F>(iv_hex: Option<&str>, body: R, key: F) -> Result<Received<R>>
where
    R: Read,
    F: FnOnce() -> Result<FileKey>,
{
    match FileEnvelope::from_metadata(iv_hex)? {
        None => {
            debug!("No IV in metadata, passing body through");
            Ok(Received::Passthrough(body))
        }
        Some(envelope) => {
            let key = key()?;
            Ok(Received::Decrypting(envelope.open(&key, body)?))
        }
    }
}
