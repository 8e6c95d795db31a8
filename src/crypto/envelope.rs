//! Persisted envelope record
//!
//! Four hex strings written once by `generate` and read on every unlock:
//! the KDF salt, the passphrase verification hash, the wrapped file key and
//! the IV used to wrap it.

use crate::crypto::{IV_SIZE, KEY_SIZE, SALT_SIZE};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// The persisted envelope, hex-encoded field by field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeRecord {
    pub salt: String,
    pub password_hash: String,
    pub encrypted_key: String,
    pub encrypted_key_iv: String,
}

impl EnvelopeRecord {
    /// Build a record from raw parts
    pub fn from_parts(
        salt: &[u8; SALT_SIZE],
        password_hash: &[u8; KEY_SIZE],
        encrypted_key: &[u8; KEY_SIZE],
        encrypted_key_iv: &[u8; IV_SIZE],
    ) -> Self {
        EnvelopeRecord {
            salt: hex::encode(salt),
            password_hash: hex::encode(password_hash),
            encrypted_key: hex::encode(encrypted_key),
            encrypted_key_iv: hex::encode(encrypted_key_iv),
        }
    }

    pub fn salt(&self) -> Result<[u8; SALT_SIZE]> {
        decode_fixed("salt", &self.salt)
    }

    pub fn password_hash(&self) -> Result<[u8; KEY_SIZE]> {
        decode_fixed("password_hash", &self.password_hash)
    }

    pub fn encrypted_key(&self) -> Result<[u8; KEY_SIZE]> {
        decode_fixed("encrypted_key", &self.encrypted_key)
    }

    pub fn encrypted_key_iv(&self) -> Result<[u8; IV_SIZE]> {
        decode_fixed("encrypted_key_iv", &self.encrypted_key_iv)
    }

    /// Check every field decodes to the expected length
    pub fn validate(&self) -> Result<()> {
        self.salt()?;
        self.password_hash()?;
        self.encrypted_key()?;
        self.encrypted_key_iv()?;
        Ok(())
    }
}

/// Decode a hex string that must hold exactly `N` bytes
pub(crate) fn decode_fixed<const N: usize>(field: &'static str, s: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(s.trim())?;
    if bytes.len() != N {
        return Err(Error::InvalidFieldLength {
            field,
            expected: N,
            got: bytes.len(),
        });
    }

    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Where envelope records live
pub trait EnvelopeRepository {
    /// Load the record; `Error::EnvelopeNotFound` if none has been written
    fn read(&self) -> Result<EnvelopeRecord>;

    /// Replace the stored record
    fn write(&self, record: &EnvelopeRecord) -> Result<()>;

    /// Whether a record is present
    fn exists(&self) -> bool;

    /// Human-readable location, used in messages
    fn location(&self) -> String;
}

/// Envelope record stored as a standalone JSON document
#[derive(Debug, Clone)]
pub struct JsonEnvelopeFile {
    path: PathBuf,
}

impl JsonEnvelopeFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        JsonEnvelopeFile {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create `path` readable only by the owner and fill it with `content`
    fn write_private(path: &Path, content: &[u8]) -> Result<()> {
        // A stale temp file could carry looser permissions
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path)?;
        file.write_all(content)?;
        file.sync_all()?;
        Ok(())
    }
}

impl EnvelopeRepository for JsonEnvelopeFile {
    fn read(&self) -> Result<EnvelopeRecord> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::EnvelopeNotFound(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let record: EnvelopeRecord = serde_json::from_str(&content)?;
        record.validate()?;

        debug!("Loaded crypto data from {:?}", self.path);
        Ok(record)
    }

    fn write(&self, record: &EnvelopeRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(record)?;

        // Write beside the target and rename, so a crash never leaves half a record
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        if let Err(e) = Self::write_private(&tmp_path, content.as_bytes())
            .and_then(|()| fs::rename(&tmp_path, &self.path).map_err(Error::from))
        {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        debug!("Wrote crypto data to {:?}", self.path);
        Ok(())
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> EnvelopeRecord {
        EnvelopeRecord::from_parts(
            &[1u8; SALT_SIZE],
            &[2u8; KEY_SIZE],
            &[3u8; KEY_SIZE],
            &[4u8; IV_SIZE],
        )
    }

    #[test]
    fn test_field_accessors() {
        let record = sample();
        assert_eq!(record.salt().unwrap(), [1u8; SALT_SIZE]);
        assert_eq!(record.password_hash().unwrap(), [2u8; KEY_SIZE]);
        assert_eq!(record.encrypted_key().unwrap(), [3u8; KEY_SIZE]);
        assert_eq!(record.encrypted_key_iv().unwrap(), [4u8; IV_SIZE]);
    }

    #[test]
    fn test_malformed_hex() {
        let mut record = sample();
        record.salt = "not hex".to_string();
        assert!(matches!(record.salt(), Err(Error::InvalidHex(_))));
    }

    #[test]
    fn test_wrong_decoded_length() {
        let mut record = sample();
        record.encrypted_key_iv = hex::encode([0u8; 12]);
        assert!(matches!(
            record.validate(),
            Err(Error::InvalidFieldLength {
                field: "encrypted_key_iv",
                expected: IV_SIZE,
                got: 12
            })
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let repo = JsonEnvelopeFile::new(dir.path().join("crypto.json"));

        assert!(!repo.exists());
        assert!(matches!(repo.read(), Err(Error::EnvelopeNotFound(_))));
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let repo = JsonEnvelopeFile::new(dir.path().join("nested").join("crypto.json"));

        repo.write(&sample()).unwrap();
        assert!(repo.exists());
        assert_eq!(repo.read().unwrap(), sample());

        // No temp file left behind
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_json_field_names() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crypto.json");
        JsonEnvelopeFile::new(&path).write(&sample()).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        for field in ["salt", "password_hash", "encrypted_key", "encrypted_key_iv"] {
            assert!(value.get(field).and_then(|v| v.as_str()).is_some(), "{}", field);
        }
    }

    #[test]
    fn test_corrupt_record_rejected_on_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crypto.json");
        let mut record = sample();
        record.password_hash = hex::encode([0u8; 31]);
        fs::write(&path, serde_json::to_string(&record).unwrap()).unwrap();

        let err = JsonEnvelopeFile::new(&path).read().unwrap_err();
        assert!(matches!(err, Error::InvalidFieldLength { field: "password_hash", .. }));
    }

    #[test]
    fn test_failed_rename_cleans_up_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crypto.json");
        // A non-empty directory in the way makes the rename fail
        fs::create_dir_all(path.join("occupied")).unwrap();

        let repo = JsonEnvelopeFile::new(&path);
        assert!(repo.write(&sample()).is_err());
        assert!(!dir.path().join("crypto.json.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_written_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crypto.json");
        // Leftover temp from an earlier crash, world readable
        fs::write(dir.path().join("crypto.json.tmp"), b"stale").unwrap();
        fs::set_permissions(
            dir.path().join("crypto.json.tmp"),
            fs::Permissions::from_mode(0o644),
        )
        .unwrap();

        let repo = JsonEnvelopeFile::new(&path);
        repo.write(&sample()).unwrap();

        let mode = fs::metadata(repo.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(repo.read().unwrap(), sample());
    }
}
