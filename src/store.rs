//! Durable storage for the salt and the sealed blob.
//!
//! Both live in plain files holding raw bytes with no header. Writes go to a
//! temporary file in the same directory which is then renamed over the
//! destination, so a reader never observes a half-written file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::crypt::Salt;
use crate::error::{Error, Prerequisite, Result};
use crate::secret::SealedBlob;

/// Writes `bytes` to a temporary file next to `path`, ready to be persisted over it.
fn stage(path: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    Ok(file)
}

fn read_required(path: &Path, what: Prerequisite) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::MissingPrerequisite {
            what,
            path: path.to_path_buf(),
        },
        _ => Error::Io(e),
    })
}

/// Generates, persists and loads the salt.
#[derive(Debug, Clone)]
pub struct SaltStore {
    path: PathBuf,
}

impl SaltStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Creates a new random salt and writes it out.
    ///
    /// Replacing a salt orphans every blob sealed with it, so an existing
    /// file is only overwritten when `overwrite` is set.
    pub fn generate(&self, overwrite: bool) -> Result<Salt> {
        let salt = Salt::generate();
        let staged = stage(&self.path, salt.as_bytes())?;

        if overwrite {
            if self.exists() {
                warn!(path = %self.path.display(), "overwriting existing salt");
            }
            staged.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        } else {
            staged
                .persist_noclobber(&self.path)
                .map_err(|e| match e.error.kind() {
                    io::ErrorKind::AlreadyExists => Error::SaltExists {
                        path: self.path.clone(),
                    },
                    _ => Error::Io(e.error),
                })?;
        }

        info!(path = %self.path.display(), "salt generated");
        Ok(salt)
    }

    pub fn load(&self) -> Result<Salt> {
        let bytes = read_required(&self.path, Prerequisite::Salt)?;
        debug!(path = %self.path.display(), len = bytes.len(), "loaded salt");
        Salt::from_slice(&bytes)
    }
}

/// Saves and loads the sealed blob.
#[derive(Debug, Clone)]
pub struct BlobStore {
    path: PathBuf,
}

impl BlobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Writes the blob, replacing whatever was stored before.
    pub fn save(&self, blob: &SealedBlob) -> Result<()> {
        let bytes = blob.to_bytes()?;
        let staged = stage(&self.path, &bytes)?;
        staged.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        info!(path = %self.path.display(), len = bytes.len(), "sealed blob saved");
        Ok(())
    }

    /// Raw stored bytes, not yet parsed.
    pub fn read(&self) -> Result<Vec<u8>> {
        let bytes = read_required(&self.path, Prerequisite::Blob)?;
        debug!(path = %self.path.display(), len = bytes.len(), "read sealed blob");
        Ok(bytes)
    }

    /// Reads the blob back. A file that does not parse is reported as
    /// [`Error::AuthenticationFailure`].
    pub fn load(&self) -> Result<SealedBlob> {
        SealedBlob::from_bytes(&self.read()?)
    }

    /// Size of the stored blob in bytes.
    pub fn size(&self) -> Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::MissingPrerequisite {
                what: Prerequisite::Blob,
                path: self.path.clone(),
            }),
            Err(e) => Err(Error::Io(e)),
        }
    }
}
