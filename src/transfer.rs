//! Sending and receiving files through an object store
//!
//! A sent file becomes one object under the remote directory, named by a
//! random UUID and tagged with a transfer code, the original file name and,
//! when encrypted, its IV. Receiving looks the code up, verifies and
//! decrypts the body, and writes it into the destination directory.

use crate::code;
use crate::crypto::{open_received, sealed_len, FileEnvelope, FileKey};
use crate::error::{Error, Result};
use crate::progress::CountingReader;
use crate::store::{ObjectInfo, ObjectMetadata, ObjectStore, ATTR_CODE, ATTR_FILE_NAME, ATTR_IV};
use indicatif::ProgressBar;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_CODE_ATTEMPTS: usize = 16;

/// Result of a successful send
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Code the receiver needs
    pub code: String,
    /// Object path in the store
    pub object_path: String,
    /// Bytes handed to the store (includes the IV header when encrypted)
    pub bytes_sent: u64,
    pub encrypted: bool,
}

/// Result of a successful receive
#[derive(Debug, Clone)]
pub struct ReceiveReport {
    /// Where the file was written
    pub path: PathBuf,
    /// Plaintext bytes written
    pub bytes_written: u64,
    pub encrypted: bool,
}

/// A transfer waiting in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransfer {
    pub code: String,
    pub file_name: Option<String>,
    pub size: u64,
    pub encrypted: bool,
}

/// Options for `Transfers::receive`
#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    /// Directory the file is written into
    pub dest_dir: PathBuf,
    /// Keep the object in the store after a successful receive
    pub leave: bool,
}

/// Transfer operations over one remote directory of an object store
pub struct Transfers<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    remote_dir: String,
}

impl<'a, S: ObjectStore + ?Sized> Transfers<'a, S> {
    pub fn new(store: &'a S, remote_dir: impl Into<String>) -> Self {
        Transfers {
            store,
            remote_dir: remote_dir.into(),
        }
    }

    /// Upload `source`, encrypting it under `key` when one is given
    pub fn send(
        &self,
        source: &Path,
        key: Option<&FileKey>,
        bar: &ProgressBar,
    ) -> Result<SendReceipt> {
        let stat = fs::metadata(source)?;
        if !stat.is_file() {
            return Err(Error::NotAFile(source.to_path_buf()));
        }
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::NotAFile(source.to_path_buf()))?;

        let code = self.unused_code()?;
        let object_path = format!("{}/{}", self.remote_dir, Uuid::new_v4());

        let mut metadata = ObjectMetadata::new();
        metadata.insert(ATTR_CODE, code.clone());
        metadata.insert(ATTR_FILE_NAME, file_name);

        let file = File::open(source)?;
        let (body, length): (Box<dyn Read>, u64) = match key {
            Some(key) => {
                let envelope = FileEnvelope::generate();
                metadata.insert(ATTR_IV, envelope.iv_hex());
                debug!("Encrypting {:?} with IV {}", source, envelope.iv_hex());
                let sealed = envelope.seal(key, file)?;
                (Box::new(sealed) as Box<dyn Read>, sealed_len(stat.len()))
            }
            None => (Box::new(file) as Box<dyn Read>, stat.len()),
        };

        bar.set_length(length);
        let mut reader = CountingReader::new(body, bar.clone());
        let bytes_sent = self.store.put(&object_path, &metadata, &mut reader)?;
        bar.finish();

        info!("Sent {:?} as {} ({} bytes)", source, object_path, bytes_sent);
        Ok(SendReceipt {
            code,
            object_path,
            bytes_sent,
            encrypted: key.is_some(),
        })
    }

    /// Find the object carrying `code`
    pub fn find(&self, transfer_code: &str) -> Result<Option<ObjectInfo>> {
        let wanted = code::normalize(transfer_code);
        let mut found = None;

        self.store.list(&self.remote_dir, &mut |info| {
            let matches =
                info.metadata.code().map(code::normalize).as_deref() == Some(wanted.as_str());
            if matches && found.is_none() {
                found = Some(info.clone());
            }
            Ok(())
        })?;

        Ok(found)
    }

    /// Download the transfer named by `code`
    ///
    /// `key` is called only if the object is encrypted. The embedded IV is
    /// checked before anything touches the destination directory, and
    /// `confirm_overwrite` is asked before replacing an existing file.
    /// Returns `Ok(None)` when no transfer has that code.
    pub fn receive<K, C>(
        &self,
        transfer_code: &str,
        options: &ReceiveOptions,
        key: K,
        confirm_overwrite: C,
        bar: &ProgressBar,
    ) -> Result<Option<ReceiveReport>>
    where
        K: FnOnce() -> Result<FileKey>,
        C: FnOnce(&Path) -> Result<bool>,
    {
        let info = match self.find(transfer_code)? {
            Some(info) => info,
            None => return Ok(None),
        };

        let file_name = local_file_name(&info.metadata)?;
        let (metadata, body) = self.store.get(&info.path)?;
        let received = open_received(metadata.iv(), body, key)?;
        let encrypted = received.is_encrypted();

        let dest = options.dest_dir.join(&file_name);
        if dest.exists() && !confirm_overwrite(&dest)? {
            return Err(Error::Cancelled);
        }

        let plain_len = if encrypted {
            info.size.saturating_sub(sealed_len(0))
        } else {
            info.size
        };
        bar.set_length(plain_len);

        let mut reader = CountingReader::new(received, bar.clone());
        write_atomically(&dest, &mut reader)?;
        bar.finish();

        if options.leave {
            debug!("Leaving {} in the store", info.path);
        } else {
            self.store.delete(&info.path)?;
        }

        info!("Received {:?} ({} bytes)", dest, reader.bytes_read());
        Ok(Some(ReceiveReport {
            path: dest,
            bytes_written: reader.bytes_read(),
            encrypted,
        }))
    }

    /// Transfers currently waiting in the store
    pub fn list(&self) -> Result<Vec<PendingTransfer>> {
        let mut pending = Vec::new();
        self.store.list(&self.remote_dir, &mut |info| {
            if let Some(code) = info.metadata.code() {
                pending.push(PendingTransfer {
                    code: code.to_string(),
                    file_name: info.metadata.file_name().map(String::from),
                    size: info.size,
                    encrypted: info.metadata.is_encrypted(),
                });
            }
            Ok(())
        })?;
        Ok(pending)
    }

    /// Delete every transfer in the remote directory, returning how many were removed
    ///
    /// Objects without a transfer code are left alone.
    pub fn purge(&self) -> Result<usize> {
        let mut paths = Vec::new();
        self.store.list(&self.remote_dir, &mut |info| {
            if info.metadata.code().is_some() {
                paths.push(info.path.clone());
            }
            Ok(())
        })?;

        for path in &paths {
            self.store.delete(path)?;
        }

        info!("Purged {} transfers", paths.len());
        Ok(paths.len())
    }

    /// Pick a code no pending transfer already uses
    fn unused_code(&self) -> Result<String> {
        let mut in_use = HashSet::new();
        self.store.list(&self.remote_dir, &mut |info| {
            if let Some(existing) = info.metadata.code() {
                in_use.insert(code::normalize(existing));
            }
            Ok(())
        })?;

        for _ in 0..MAX_CODE_ATTEMPTS {
            let candidate = code::generate();
            if !in_use.contains(&candidate) {
                return Ok(candidate);
            }
            warn!("Transfer code collision, retrying");
        }

        Err(Error::Internal("Unable to pick an unused transfer code".to_string()))
    }
}

/// Final path component of the sender's file name
fn local_file_name(metadata: &ObjectMetadata) -> Result<String> {
    let raw = metadata
        .file_name()
        .ok_or(Error::MissingMetadata(ATTR_FILE_NAME))?;

    // Senders may have stored a path; only ever write into the destination directory
    let name = Path::new(&raw.replace('\\', "/"))
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or(Error::MissingMetadata(ATTR_FILE_NAME))?;

    Ok(name)
}

/// Copy `reader` into `<dest>.part`, then rename over `dest`
fn write_atomically(dest: &Path, reader: &mut dyn Read) -> Result<u64> {
    let mut part_name = dest.as_os_str().to_owned();
    part_name.push(".part");
    let part = PathBuf::from(part_name);

    let result = (|| -> Result<u64> {
        let mut writer = BufWriter::new(File::create(&part)?);
        let n = io::copy(reader, &mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(n)
    })();

    match result {
        Ok(n) => {
            fs::rename(&part, dest)?;
            Ok(n)
        }
        Err(e) => {
            let _ = fs::remove_file(&part);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: LocalStore,
        src: PathBuf,
        dest: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path().join("store")).unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dest).unwrap();
        Fixture {
            _dir: dir,
            store,
            src,
            dest,
        }
    }

    fn opts(f: &Fixture, leave: bool) -> ReceiveOptions {
        ReceiveOptions {
            dest_dir: f.dest.clone(),
            leave,
        }
    }

    fn no_key() -> Result<FileKey> {
        panic!("key requested for unencrypted transfer")
    }

    fn never_overwrite(_: &Path) -> Result<bool> {
        Ok(false)
    }

    #[test]
    fn test_plain_send_receive() {
        let f = fixture();
        let path = f.src.join("notes.txt");
        fs::write(&path, b"plain contents").unwrap();

        let transfers = Transfers::new(&f.store, "filesender");
        let receipt = transfers.send(&path, None, &ProgressBar::hidden()).unwrap();
        assert!(!receipt.encrypted);
        assert_eq!(receipt.bytes_sent, 14);

        let report = transfers
            .receive(
                &receipt.code,
                &opts(&f, false),
                no_key,
                never_overwrite,
                &ProgressBar::hidden(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(report.path, f.dest.join("notes.txt"));
        assert_eq!(fs::read(&report.path).unwrap(), b"plain contents");
        assert!(transfers.list().unwrap().is_empty());
    }

    #[test]
    fn test_encrypted_send_receive() {
        let f = fixture();
        let path = f.src.join("hello.bin");
        fs::write(&path, b"hello world").unwrap();
        let key = FileKey::generate();

        let transfers = Transfers::new(&f.store, "filesender");
        let receipt = transfers
            .send(&path, Some(&key), &ProgressBar::hidden())
            .unwrap();
        assert!(receipt.encrypted);
        assert_eq!(receipt.bytes_sent, sealed_len(11));

        let (meta, mut body) = f.store.get(&receipt.object_path).unwrap();
        let mut stored = Vec::new();
        body.read_to_end(&mut stored).unwrap();
        assert_eq!(hex::encode(&stored[..16]), meta.iv().unwrap());

        let report = transfers
            .receive(
                &receipt.code,
                &opts(&f, true),
                || Ok(key.clone()),
                never_overwrite,
                &ProgressBar::hidden(),
            )
            .unwrap()
            .unwrap();
        assert!(report.encrypted);
        assert_eq!(report.bytes_written, 11);
        assert_eq!(fs::read(&report.path).unwrap(), b"hello world");

        // --leave keeps the object
        assert_eq!(transfers.list().unwrap().len(), 1);
    }

    #[test]
    fn test_tampered_header_writes_nothing() {
        let f = fixture();
        let path = f.src.join("secret.txt");
        fs::write(&path, b"do not leak").unwrap();
        let key = FileKey::generate();

        let transfers = Transfers::new(&f.store, "filesender");
        let receipt = transfers
            .send(&path, Some(&key), &ProgressBar::hidden())
            .unwrap();

        // Corrupt the stored IV header
        let body_path = f.store.root().join(&receipt.object_path);
        let mut stored = fs::read(&body_path).unwrap();
        stored[0] ^= 0xFF;
        fs::write(&body_path, &stored).unwrap();

        let err = transfers
            .receive(
                &receipt.code,
                &opts(&f, false),
                || Ok(key.clone()),
                never_overwrite,
                &ProgressBar::hidden(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::IvMismatch { .. }));
        assert_eq!(fs::read_dir(&f.dest).unwrap().count(), 0);
        assert_eq!(transfers.list().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_code() {
        let f = fixture();
        let transfers = Transfers::new(&f.store, "filesender");
        let result = transfers
            .receive(
                "no-such-code",
                &opts(&f, false),
                no_key,
                never_overwrite,
                &ProgressBar::hidden(),
            )
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_overwrite_declined() {
        let f = fixture();
        let path = f.src.join("dup.txt");
        fs::write(&path, b"new").unwrap();
        fs::write(f.dest.join("dup.txt"), b"old").unwrap();

        let transfers = Transfers::new(&f.store, "filesender");
        let receipt = transfers.send(&path, None, &ProgressBar::hidden()).unwrap();

        let err = transfers
            .receive(
                &receipt.code,
                &opts(&f, false),
                no_key,
                never_overwrite,
                &ProgressBar::hidden(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(fs::read(f.dest.join("dup.txt")).unwrap(), b"old");

        let report = transfers
            .receive(&receipt.code, &opts(&f, false), no_key, |_| Ok(true), &ProgressBar::hidden())
            .unwrap()
            .unwrap();
        assert_eq!(fs::read(report.path).unwrap(), b"new");
    }

    #[test]
    fn test_file_name_is_sanitized() {
        let f = fixture();
        let mut meta = ObjectMetadata::new();
        meta.insert(ATTR_CODE, "abandon-ability-able");
        meta.insert(ATTR_FILE_NAME, "../../etc/evil.txt");
        f.store
            .put("filesender/obj", &meta, &mut &b"x"[..])
            .unwrap();

        let transfers = Transfers::new(&f.store, "filesender");
        let report = transfers
            .receive(
                "Abandon Ability Able",
                &opts(&f, false),
                no_key,
                never_overwrite,
                &ProgressBar::hidden(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(report.path, f.dest.join("evil.txt"));
    }

    #[test]
    fn test_missing_file_name() {
        let f = fixture();
        let mut meta = ObjectMetadata::new();
        meta.insert(ATTR_CODE, "abandon-ability-able");
        f.store.put("filesender/obj", &meta, &mut &b"x"[..]).unwrap();

        let transfers = Transfers::new(&f.store, "filesender");
        let err = transfers
            .receive(
                "abandon-ability-able",
                &opts(&f, false),
                no_key,
                never_overwrite,
                &ProgressBar::hidden(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::MissingMetadata(ATTR_FILE_NAME)));
    }

    #[test]
    fn test_purge_only_transfers() {
        let f = fixture();
        for name in ["a.txt", "b.txt"] {
            let path = f.src.join(name);
            fs::write(&path, name).unwrap();
            Transfers::new(&f.store, "filesender")
                .send(&path, None, &ProgressBar::hidden())
                .unwrap();
        }
        f.store
            .put("filesender/unrelated", &ObjectMetadata::new(), &mut &b"keep"[..])
            .unwrap();

        let transfers = Transfers::new(&f.store, "filesender");
        assert_eq!(transfers.list().unwrap().len(), 2);
        assert_eq!(transfers.purge().unwrap(), 2);
        assert!(transfers.list().unwrap().is_empty());
        assert!(f.store.get("filesender/unrelated").is_ok());
    }

    #[test]
    fn test_send_directory_rejected() {
        let f = fixture();
        let transfers = Transfers::new(&f.store, "filesender");
        let err = transfers
            .send(&f.src, None, &ProgressBar::hidden())
            .unwrap_err();
        assert!(matches!(err, Error::NotAFile(_)));
    }
}
