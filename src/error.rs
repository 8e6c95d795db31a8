//! Error types for filesender

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Broad failure categories, used by the CLI to pick an exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Internal misuse or corrupted state (bad key/IV length, KDF output size)
    Invariant,
    /// Bad passphrase or other user input
    UserInput,
    /// Data that failed validation before any plaintext was produced
    Integrity,
    /// Object store or local I/O failure
    Transport,
}

/// Main error type for filesender
#[derive(Error, Debug)]
pub enum Error {
    // Crypto invariants
    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("IV length {got} != AES block size {expected}")]
    InvalidIvLength { expected: usize, got: usize },

    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    // Passphrase errors
    #[error("Password not entered")]
    EmptyPassword,

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Incorrect password")]
    IncorrectPassword,

    // Integrity errors
    #[error("File header IV [{header}] doesn't match meta data IV [{metadata}]")]
    IvMismatch { header: String, metadata: String },

    #[error("Contents too short to hold IV: {0} bytes")]
    TruncatedHeader(usize),

    #[error("Unable to decode hex string: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Invalid {field} length: expected {expected} bytes, got {got}")]
    InvalidFieldLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    // Envelope persistence
    #[error("Crypto data not found at {0:?}; run 'filesender generate' first")]
    EnvelopeNotFound(PathBuf),

    #[error("Crypto data already exists at {0}")]
    EnvelopeExists(String),

    // Object store errors
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Missing object metadata: {0}")]
    MissingMetadata(&'static str),

    #[error("Invalid object path: {0}")]
    InvalidObjectPath(String),

    // Local file errors
    #[error("Not a file: {0:?}")]
    NotAFile(PathBuf),

    #[error("Receive cancelled")]
    Cancelled,

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidKeyLength { .. }
            | Error::InvalidIvLength { .. }
            | Error::KeyDerivation(_)
            | Error::Internal(_) => ErrorKind::Invariant,

            Error::EmptyPassword
            | Error::PasswordMismatch
            | Error::IncorrectPassword
            | Error::EnvelopeNotFound(_)
            | Error::EnvelopeExists(_)
            | Error::NotAFile(_)
            | Error::Cancelled
            | Error::Config(_)
            | Error::InvalidConfig(_) => ErrorKind::UserInput,

            Error::IvMismatch { .. }
            | Error::TruncatedHeader(_)
            | Error::InvalidHex(_)
            | Error::InvalidFieldLength { .. }
            | Error::MissingMetadata(_)
            | Error::Serialization(_) => ErrorKind::Integrity,

            Error::ObjectNotFound(_) | Error::InvalidObjectPath(_) | Error::Io(_) => {
                ErrorKind::Transport
            }
        }
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::UserInput => 1,
            ErrorKind::Integrity => 2,
            ErrorKind::Transport => 3,
            ErrorKind::Invariant => 70,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
