//! Directory-backed object store
//!
//! Bodies live at `<root>/<path>`, metadata in a JSON sidecar at
//! `<root>/<path>.meta.json`. Uploads stream into a hidden temporary file
//! that is renamed into place once complete, so listings only ever show
//! whole objects.

use crate::error::{Error, Result};
use crate::store::{ObjectInfo, ObjectMetadata, ObjectStore};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const META_SUFFIX: &str = ".meta.json";

/// Object store rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open a store, creating the root directory if needed
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!("Object store at {:?}", root);
        Ok(LocalStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an object path onto the filesystem, refusing anything that escapes the root
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let mut resolved = self.root.clone();
        let mut depth = 0;

        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                _ => return Err(Error::InvalidObjectPath(path.to_string())),
            }
        }

        if depth == 0 || path.ends_with(META_SUFFIX) {
            return Err(Error::InvalidObjectPath(path.to_string()));
        }

        Ok(resolved)
    }

    fn meta_path(body: &Path) -> PathBuf {
        let mut name = body.as_os_str().to_owned();
        name.push(META_SUFFIX);
        PathBuf::from(name)
    }

    fn temp_path(body: &Path) -> PathBuf {
        let name = body
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        body.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()))
    }

    fn read_metadata(body: &Path) -> Result<ObjectMetadata> {
        match fs::read_to_string(Self::meta_path(body)) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ObjectMetadata::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_body(temp: &Path, body: &mut dyn Read) -> Result<u64> {
        let mut writer = BufWriter::new(File::create(temp)?);
        let written = io::copy(body, &mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(written)
    }

    /// Write the sidecar, then move the finished body into place
    fn commit(temp: &Path, target: &Path, metadata: &ObjectMetadata) -> Result<()> {
        let meta_path = Self::meta_path(target);
        fs::write(&meta_path, serde_json::to_vec_pretty(metadata)?)?;
        if let Err(e) = fs::rename(temp, target) {
            let _ = fs::remove_file(&meta_path);
            return Err(e.into());
        }
        Ok(())
    }
}

impl ObjectStore for LocalStore {
    fn put(&self, path: &str, metadata: &ObjectMetadata, body: &mut dyn Read) -> Result<u64> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp = Self::temp_path(&target);
        let written = match Self::write_body(&temp, body)
            .and_then(|n| Self::commit(&temp, &target, metadata).map(|()| n))
        {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&temp);
                return Err(e);
            }
        };

        debug!("Stored {} ({} bytes)", path, written);
        Ok(written)
    }

    fn get(&self, path: &str) -> Result<(ObjectMetadata, Box<dyn Read + Send>)> {
        let target = self.resolve(path)?;
        let file = match File::open(&target) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::ObjectNotFound(path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let metadata = Self::read_metadata(&target)?;
        debug!("Opened {}", path);
        Ok((metadata, Box::new(BufReader::new(file))))
    }

    fn list(&self, dir: &str, visit: &mut dyn FnMut(&ObjectInfo) -> Result<()>) -> Result<()> {
        let dir_path = if dir.is_empty() {
            self.root.clone()
        } else {
            self.resolve(dir)?
        };

        let entries = match fs::read_dir(&dir_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || name.ends_with(META_SUFFIX) {
                continue;
            }
            names.push((name, entry.metadata()?.len()));
        }
        names.sort();

        for (name, size) in names {
            let body = dir_path.join(&name);
            let metadata = match Self::read_metadata(&body) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Skipping {}: unreadable metadata: {}", name, e);
                    continue;
                }
            };
            let path = if dir.is_empty() {
                name
            } else {
                format!("{}/{}", dir.trim_end_matches('/'), name)
            };

            visit(&ObjectInfo {
                path,
                size,
                metadata,
            })?;
        }

        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::ObjectNotFound(path.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        match fs::remove_file(Self::meta_path(&target)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        debug!("Deleted {}", path);
        Ok(())
    }
}
