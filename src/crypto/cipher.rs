//! AES-256-CFB stream transform
//!
//! CFB turns the AES block cipher into a byte-oriented stream: output length
//! always equals input length, and the state advances per byte consumed, so
//! callers may feed data in chunks of any size. The same construction serves
//! both the 32-byte file-key wrap and multi-gigabyte file bodies.

use crate::crypto::{IV_SIZE, KEY_SIZE};
use crate::error::{Error, Result};
use aes::Aes256;
use cfb_mode::cipher::KeyIvInit;
use cfb_mode::{BufDecryptor, BufEncryptor};
use std::io::{self, Read};

/// Which way the transform runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

enum Keystream {
    Encrypt(BufEncryptor<Aes256>),
    Decrypt(BufDecryptor<Aes256>),
}

/// Keyed CFB state for one stream
pub struct StreamCipher {
    keystream: Keystream,
    direction: Direction,
}

impl StreamCipher {
    /// Create a new transform
    ///
    /// `key` must be 32 bytes and `iv` 16 bytes. Anything else means a caller
    /// passed corrupted state, and is reported as an invariant error.
    pub fn new(key: &[u8], iv: &[u8], direction: Direction) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(Error::InvalidKeyLength {
                expected: KEY_SIZE,
                got: key.len(),
            });
        }
        if iv.len() != IV_SIZE {
            return Err(Error::InvalidIvLength {
                expected: IV_SIZE,
                got: iv.len(),
            });
        }

        let keystream = match direction {
            Direction::Encrypt => BufEncryptor::<Aes256>::new_from_slices(key, iv)
                .map(Keystream::Encrypt),
            Direction::Decrypt => BufDecryptor::<Aes256>::new_from_slices(key, iv)
                .map(Keystream::Decrypt),
        }
        .map_err(|_| Error::Internal("Unable to create AES cipher".to_string()))?;

        Ok(StreamCipher {
            keystream,
            direction,
        })
    }

    /// Transform `data` in place, continuing from wherever the last call stopped
    pub fn apply(&mut self, data: &mut [u8]) {
        match &mut self.keystream {
            Keystream::Encrypt(enc) => enc.encrypt(data),
            Keystream::Decrypt(dec) => dec.decrypt(data),
        }
    }

    /// Direction this transform was created for
    pub fn direction(&self) -> Direction {
        self.direction
    }
}

/// Transform a small in-memory buffer in one shot
pub fn transform(key: &[u8], iv: &[u8], data: &[u8], direction: Direction) -> Result<Vec<u8>> {
    let mut cipher = StreamCipher::new(key, iv, direction)?;
    let mut out = data.to_vec();
    cipher.apply(&mut out);
    Ok(out)
}

/// Reader adapter that transforms bytes as they are pulled through it
///
/// Single pass, holds no buffer of its own beyond the CFB state.
pub struct CipherReader<R> {
    inner: R,
    cipher: StreamCipher,
}

impl<R: Read> CipherReader<R> {
    /// Wrap `inner` with a fresh transform
    pub fn new(key: &[u8], iv: &[u8], direction: Direction, inner: R) -> Result<Self> {
        Ok(CipherReader {
            inner,
            cipher: StreamCipher::new(key, iv, direction)?,
        })
    }
}

impl<R: Read> Read for CipherReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.apply(&mut buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::random_bytes;
    use std::io::Cursor;

    fn test_key() -> [u8; KEY_SIZE] {
        random_bytes()
    }

    fn test_iv() -> [u8; IV_SIZE] {
        random_bytes()
    }

    /// Reader that returns at most `step` bytes per call
    struct Trickle<R> {
        inner: R,
        step: usize,
    }

    impl<R: Read> Read for Trickle<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = buf.len().min(self.step);
            self.inner.read(&mut buf[..len])
        }
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = test_key();
        let iv = test_iv();
        let plaintext = b"Hello, filesender!";

        let ciphertext = transform(&key, &iv, plaintext, Direction::Encrypt).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len());
        assert_ne!(&ciphertext[..], &plaintext[..]);

        let decrypted = transform(&key, &iv, &ciphertext, Direction::Decrypt).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_known_vector() {
        // NIST SP 800-38A F.3.17, CFB128-AES256.Encrypt, first block
        let key = hex::decode("603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4")
            .unwrap();
        let iv = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let plaintext = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();

        let ciphertext = transform(&key, &iv, &plaintext, Direction::Encrypt).unwrap();
        assert_eq!(hex::encode(ciphertext), "dc7e84bfda79164b7ecd8486985d3860");
    }

    #[test]
    fn test_empty_plaintext() {
        let key = test_key();
        let iv = test_iv();

        let ciphertext = transform(&key, &iv, b"", Direction::Encrypt).unwrap();
        assert!(ciphertext.is_empty());
    }

    #[test]
    fn test_wrong_key_does_not_recover() {
        let iv = test_iv();
        let plaintext = b"Secret data that spans more than one block";

        let ciphertext = transform(&test_key(), &iv, plaintext, Direction::Encrypt).unwrap();
        let garbage = transform(&test_key(), &iv, &ciphertext, Direction::Decrypt).unwrap();
        assert_ne!(&garbage[..], &plaintext[..]);
    }

    #[test]
    fn test_bad_key_length() {
        let err = StreamCipher::new(&[0u8; 16], &[0u8; IV_SIZE], Direction::Encrypt)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::InvalidKeyLength {
                expected: KEY_SIZE,
                got: 16
            }
        ));
    }

    #[test]
    fn test_bad_iv_length() {
        let err = StreamCipher::new(&[0u8; KEY_SIZE], &[0u8; 12], Direction::Decrypt)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::InvalidIvLength {
                expected: IV_SIZE,
                got: 12
            }
        ));
    }

    #[test]
    fn test_chunking_independent() {
        let key = test_key();
        let iv = test_iv();
        let plaintext: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let whole = transform(&key, &iv, &plaintext, Direction::Encrypt).unwrap();

        for step in [1, 7, 16, 17, 4096] {
            let mut reader = CipherReader::new(
                &key,
                &iv,
                Direction::Encrypt,
                Trickle {
                    inner: Cursor::new(&plaintext),
                    step,
                },
            )
            .unwrap();
            let mut streamed = Vec::new();
            reader.read_to_end(&mut streamed).unwrap();
            assert_eq!(streamed, whole, "step {}", step);
        }
    }

    #[test]
    fn test_reader_roundtrip_large() {
        let key = test_key();
        let iv = test_iv();
        let plaintext = vec![0x42u8; 1024 * 1024 + 3];

        let enc =
            CipherReader::new(&key, &iv, Direction::Encrypt, Cursor::new(&plaintext)).unwrap();
        let mut dec = CipherReader::new(&key, &iv, Direction::Decrypt, enc).unwrap();

        let mut out = Vec::new();
        dec.read_to_end(&mut out).unwrap();
        assert_eq!(out, plaintext);
    }

    #[test]
    fn test_direction_reported() {
        let cipher = StreamCipher::new(&test_key(), &test_iv(), Direction::Decrypt).unwrap();
        assert_eq!(cipher.direction(), Direction::Decrypt);
    }
}
