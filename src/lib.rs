//! filesender - Send files through untrusted object storage
//!
//! Files are uploaded to an object store under a short human-readable
//! transfer code, optionally encrypted with a key that is itself protected
//! by the user's passphrase.

pub mod code;
pub mod config;
pub mod crypto;
pub mod error;
pub mod progress;
pub mod store;
pub mod transfer;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crypto::{EnvelopeRepository, FileKey, JsonEnvelopeFile};
    pub use crate::error::{Error, Result};
    pub use crate::store::{LocalStore, ObjectStore};
    pub use crate::transfer::{ReceiveOptions, Transfers};
}
