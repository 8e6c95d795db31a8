//! Key management for filesender
//!
//! Implements a two-level key structure:
//! - File Key: random, encrypts every file body, stored only in wrapped form
//! - Key-Wrapping Key: derived from the user's passphrase, wraps the file key

use crate::crypto::cipher::{transform, Direction};
use crate::crypto::envelope::{EnvelopeRecord, EnvelopeRepository};
use crate::crypto::{derive_key, random_bytes, IV_SIZE, KEY_SIZE, SALT_SIZE};
use crate::error::{Error, Result};
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// The symmetric key used to encrypt file contents
#[derive(Clone)]
pub struct FileKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl FileKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        FileKey {
            key: Zeroizing::new(random_bytes()),
        }
    }

    /// Create from existing key material
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        FileKey {
            key: Zeroizing::new(bytes),
        }
    }

    /// Create from a slice, checking its length
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(Error::InvalidKeyLength {
                expected: KEY_SIZE,
                got: bytes.len(),
            });
        }

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(bytes);
        Ok(FileKey { key })
    }

    /// Get the raw key bytes
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKey").field("key", &"[REDACTED]").finish()
    }
}

/// Check a newly chosen passphrase against its confirmation
pub fn confirm_passphrase(first: &str, second: &str) -> Result<Zeroizing<String>> {
    if first.is_empty() {
        return Err(Error::EmptyPassword);
    }
    if first != second {
        return Err(Error::PasswordMismatch);
    }
    Ok(Zeroizing::new(first.to_string()))
}

/// Create a new file key and wrap it under `password`
///
/// This is the only place a file key is ever created. Running it again
/// produces a new key, orphaning anything encrypted under the old one.
pub fn generate_envelope(password: &[u8]) -> Result<EnvelopeRecord> {
    if password.is_empty() {
        return Err(Error::EmptyPassword);
    }

    let salt: [u8; SALT_SIZE] = random_bytes();
    let wrap_iv: [u8; IV_SIZE] = random_bytes();
    let file_key = FileKey::generate();

    wrap_file_key(password, &salt, &file_key, &wrap_iv)
}

/// Generate a new envelope and persist it in `repo`
///
/// An existing record is only replaced when `force` is set. The passphrase
/// is requested after that check, so a refused run never prompts.
pub fn install_envelope<P>(
    repo: &dyn EnvelopeRepository,
    force: bool,
    passphrase: P,
) -> Result<EnvelopeRecord>
where
    P: FnOnce() -> Result<Zeroizing<String>>,
{
    if repo.exists() {
        if !force {
            return Err(Error::EnvelopeExists(repo.location()));
        }
        warn!(
            "Replacing crypto data at {}; files sent under the old key become unreadable",
            repo.location()
        );
    }

    let password = passphrase()?;
    let record = generate_envelope(password.as_bytes())?;
    repo.write(&record)?;
    Ok(record)
}

/// Wrap a given file key with explicit salt and IV
pub(crate) fn wrap_file_key(
    password: &[u8],
    salt: &[u8; SALT_SIZE],
    file_key: &FileKey,
    wrap_iv: &[u8; IV_SIZE],
) -> Result<EnvelopeRecord> {
    let derived = derive_key(password, salt)?;

    let wrapped = transform(
        derived.wrapping_key(),
        wrap_iv,
        file_key.key(),
        Direction::Encrypt,
    )?;
    let mut encrypted_key = [0u8; KEY_SIZE];
    encrypted_key.copy_from_slice(&wrapped);

    debug!("Wrapped file key (salt {})", hex::encode(salt));

    Ok(EnvelopeRecord::from_parts(
        salt,
        derived.verification_hash(),
        &encrypted_key,
        wrap_iv,
    ))
}

/// Recover the file key from a stored envelope
///
/// The derived verification hash must equal the stored one before any
/// decryption is attempted; a wrong passphrase never yields a key.
pub fn unlock_envelope(password: &[u8], record: &EnvelopeRecord) -> Result<FileKey> {
    let salt = record.salt()?;
    let password_hash = record.password_hash()?;
    let encrypted_key = record.encrypted_key()?;
    let wrap_iv = record.encrypted_key_iv()?;

    let derived = derive_key(password, &salt)?;
    if derived.verification_hash() != &password_hash {
        warn!("Passphrase verification failed");
        return Err(Error::IncorrectPassword);
    }

    let unwrapped = Zeroizing::new(transform(
        derived.wrapping_key(),
        &wrap_iv,
        &encrypted_key,
        Direction::Decrypt,
    )?);

    debug!("Unlocked file key");
    FileKey::from_slice(&unwrapped)
}
