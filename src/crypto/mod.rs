//! Cryptography module for filesender
//!
//! Password-based envelope encryption: a random file key is wrapped under a
//! key derived from the user's passphrase (PBKDF2-HMAC-SHA256), and file
//! contents are streamed through AES-256-CFB with a fresh IV per file.
//!
//! This scheme provides confidentiality only. The ciphertext body carries no
//! authentication tag; the one integrity check is the embedded IV compared
//! against the out-of-band metadata IV.

mod cipher;
mod envelope;
mod file;
mod kdf;
mod keys;

pub use cipher::{transform, CipherReader, Direction, StreamCipher};
pub use envelope::{EnvelopeRecord, EnvelopeRepository, JsonEnvelopeFile};
pub use file::{open_received, sealed_len, FileEnvelope, Received, SealedReader};
pub use kdf::{derive_key, DerivedKey};
pub use keys::{
    confirm_passphrase, generate_envelope, install_envelope, unlock_envelope, FileKey,
};

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the AES block, and therefore of every IV
pub const IV_SIZE: usize = 16;

/// Size of salt for key derivation
pub const SALT_SIZE: usize = 32;

/// Size of PBKDF2 output: verification hash followed by key-wrapping key
pub const DERIVED_SIZE: usize = 64;

/// PBKDF2-HMAC-SHA256 iteration count
pub const PBKDF2_ITERATIONS: u32 = 65_536;

/// Fill a fixed-size array from the thread-local CSPRNG
pub(crate) fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;

    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
