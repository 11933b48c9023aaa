//! Fixed algorithm parameters and on-disk locations.
//!
//! A [`SealConfig`] is built once when the process starts and is shared by
//! reference between the seal and retrieve paths.

use bincode::{Decode, Encode};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Length in bytes of every derived key (AES-256).
pub const KEY_LEN: usize = 32;

/// PBKDF2 work factor used when nothing else is specified.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Upper bound accepted for the work factor, including values read back from a blob.
pub const MAX_ITERATIONS: u32 = 10_000_000;

/// Default salt file name, relative to the state directory.
pub const SALT_FILE: &str = "salt.txt";

/// Default sealed blob file name, relative to the state directory.
pub const BLOB_FILE: &str = "encrypted_backup_code.txt";

/// Password-based key derivation function used to turn fragments into a key.
#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KdfAlgorithm {
    /// PBKDF2 with HMAC-SHA256
    #[default]
    Pbkdf2HmacSha256,
}

/// Parameters of the key derivation.
///
/// These are recorded in every sealed blob header so a blob stays openable
/// even if the defaults change later.
#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub algorithm: KdfAlgorithm,
    pub iterations: u32,
}

impl KdfParams {
    pub const fn pbkdf2_sha256(iterations: u32) -> Self {
        Self {
            algorithm: KdfAlgorithm::Pbkdf2HmacSha256,
            iterations,
        }
    }

    /// Checks the work factor is usable.
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 || self.iterations > MAX_ITERATIONS {
            return Err(Error::InvalidKdfParams {
                iterations: self.iterations,
            });
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::pbkdf2_sha256(DEFAULT_ITERATIONS)
    }
}

/// Immutable configuration for a seal/retrieve run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealConfig {
    pub kdf: KdfParams,
    pub salt_path: PathBuf,
    pub blob_path: PathBuf,
}

impl SealConfig {
    /// Places the salt and blob files under `dir` with their default names.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            kdf: KdfParams::default(),
            salt_path: dir.join(SALT_FILE),
            blob_path: dir.join(BLOB_FILE),
        }
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }
}

impl Default for SealConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            salt_path: PathBuf::from(SALT_FILE),
            blob_path: PathBuf::from(BLOB_FILE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = KdfParams::default();
        assert_eq!(params.algorithm, KdfAlgorithm::Pbkdf2HmacSha256);
        assert_eq!(params.iterations, 100_000);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_iteration_bounds() {
        assert!(matches!(
            KdfParams::pbkdf2_sha256(0).validate(),
            Err(Error::InvalidKdfParams { iterations: 0 })
        ));
        assert!(KdfParams::pbkdf2_sha256(MAX_ITERATIONS).validate().is_ok());
        assert!(
            KdfParams::pbkdf2_sha256(MAX_ITERATIONS + 1)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_in_dir_paths() {
        let config = SealConfig::in_dir("/var/lib/seal");
        assert_eq!(config.salt_path, PathBuf::from("/var/lib/seal/salt.txt"));
        assert_eq!(
            config.blob_path,
            PathBuf::from("/var/lib/seal/encrypted_backup_code.txt")
        );
        assert_eq!(config.kdf, KdfParams::default());
    }
}
