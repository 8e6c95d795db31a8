//! Object storage backend
//!
//! Transfers are stored as opaque blobs keyed by path, each with a small
//! string map of metadata. The trait keeps the transfer logic independent of
//! where the blobs actually live.

mod local;

pub use local::LocalStore;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;

/// Metadata attribute holding the transfer code
pub const ATTR_CODE: &str = "code";

/// Metadata attribute holding the original file name
pub const ATTR_FILE_NAME: &str = "file_name";

/// Metadata attribute holding the per-file IV (hex); absent when unencrypted
pub const ATTR_IV: &str = "iv";

/// String attributes stored alongside an object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectMetadata(BTreeMap<String, String>);

impl ObjectMetadata {
    pub fn new() -> Self {
        ObjectMetadata::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Transfer code, if set and non-empty
    pub fn code(&self) -> Option<&str> {
        self.get(ATTR_CODE).filter(|s| !s.is_empty())
    }

    pub fn file_name(&self) -> Option<&str> {
        self.get(ATTR_FILE_NAME).filter(|s| !s.is_empty())
    }

    pub fn iv(&self) -> Option<&str> {
        self.get(ATTR_IV).filter(|s| !s.is_empty())
    }

    pub fn is_encrypted(&self) -> bool {
        self.iv().is_some()
    }
}

/// An object seen while listing a directory
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    /// Full path, usable with `get` and `delete`
    pub path: String,
    /// Stored body size in bytes
    pub size: u64,
    pub metadata: ObjectMetadata,
}

/// Blob storage keyed by path
///
/// Implementations do not retry; failures surface to the caller as-is.
pub trait ObjectStore {
    /// Store `body` under `path`, returning the number of bytes written
    fn put(&self, path: &str, metadata: &ObjectMetadata, body: &mut dyn Read) -> Result<u64>;

    /// Open an object for reading
    fn get(&self, path: &str) -> Result<(ObjectMetadata, Box<dyn Read + Send>)>;

    /// Visit every object directly under `dir`
    fn list(&self, dir: &str, visit: &mut dyn FnMut(&ObjectInfo) -> Result<()>) -> Result<()>;

    /// Remove an object
    fn delete(&self, path: &str) -> Result<()>;
}
