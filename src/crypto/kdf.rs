//! Passphrase key derivation
//!
//! PBKDF2-HMAC-SHA256 with 65536 iterations stretches the passphrase into 64
//! bytes. The first half is stored and compared on unlock to detect a wrong
//! passphrase; the second half wraps the file key and is never stored.

use crate::crypto::{DERIVED_SIZE, KEY_SIZE, PBKDF2_ITERATIONS, SALT_SIZE};
use crate::error::{Error, Result};
use ring::pbkdf2::{self, PBKDF2_HMAC_SHA256};
use std::num::NonZeroU32;
use zeroize::Zeroizing;

const ITERATIONS: NonZeroU32 = match NonZeroU32::new(PBKDF2_ITERATIONS) {
    Some(n) => n,
    None => panic!("PBKDF2 iteration count must be non-zero"),
};

/// Output of the passphrase KDF
pub struct DerivedKey {
    /// Stored alongside the envelope to check the passphrase
    verification_hash: [u8; KEY_SIZE],
    /// Key-wrapping key, lives only for the duration of a wrap/unwrap
    wrapping_key: Zeroizing<[u8; KEY_SIZE]>,
}

impl DerivedKey {
    /// Split raw KDF output into its two halves
    fn split(material: &[u8]) -> Result<Self> {
        if material.len() != DERIVED_SIZE {
            return Err(Error::KeyDerivation(format!(
                "Incorrect key size returned by pbkdf2: {}",
                material.len()
            )));
        }

        let mut verification_hash = [0u8; KEY_SIZE];
        verification_hash.copy_from_slice(&material[..KEY_SIZE]);

        let mut wrapping_key = Zeroizing::new([0u8; KEY_SIZE]);
        wrapping_key.copy_from_slice(&material[KEY_SIZE..]);

        Ok(DerivedKey {
            verification_hash,
            wrapping_key,
        })
    }

    /// Get the passphrase verification hash
    pub fn verification_hash(&self) -> &[u8; KEY_SIZE] {
        &self.verification_hash
    }

    /// Get the key-wrapping key
    pub fn wrapping_key(&self) -> &[u8; KEY_SIZE] {
        &self.wrapping_key
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("verification_hash", &hex::encode(self.verification_hash))
            .field("wrapping_key", &"[REDACTED]")
            .finish()
    }
}

/// Derive the verification hash and key-wrapping key from a passphrase
///
/// Deterministic for a given `(password, salt)` pair.
pub fn derive_key(password: &[u8], salt: &[u8; SALT_SIZE]) -> Result<DerivedKey> {
    let mut material = Zeroizing::new([0u8; DERIVED_SIZE]);
    pbkdf2::derive(
        PBKDF2_HMAC_SHA256,
        ITERATIONS,
        salt,
        password,
        material.as_mut_slice(),
    );

    DerivedKey::split(material.as_slice())
}
