//! End-to-end flows: seal a backup code, retrieve it, or retrieve it with
//! diagnostics.

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, instrument, warn};

use crate::config::SealConfig;
use crate::crypt::{DerivedKey, Fragments, SALT_LEN};
use crate::error::{Error, Result};
use crate::secret::SealedBlob;
use crate::store::{BlobStore, SaltStore};

/// Fragments used by the self-test when none are supplied.
pub const DEMO_FRAGMENTS: [&str; 3] = ["secret1", "secret2", "secret3"];

/// Backup code sealed by the self-test.
pub const DEMO_BACKUP_CODE: &str = "BACKUPCODE-123456";

/// What the user sees when retrieval fails for any authentication reason.
pub const INVALID_INPUTS: &str = "Invalid inputs provided.";

/// Outcome of a retrieval that got as far as checking the fragments.
#[derive(Debug)]
pub enum Retrieval {
    Recovered(SecretString),
    /// Wrong fragments, wrong salt, or a damaged blob. Which one is never reported.
    InvalidInputs,
}

impl Retrieval {
    pub fn is_recovered(&self) -> bool {
        matches!(self, Retrieval::Recovered(_))
    }

    pub fn into_code(self) -> Option<SecretString> {
        match self {
            Retrieval::Recovered(code) => Some(code),
            Retrieval::InvalidInputs => None,
        }
    }
}

/// Derives the key from `fragments`, seals `backup_code` and saves the blob.
///
/// Requires the salt to exist. Any previously saved blob is replaced.
#[instrument(level = "debug", skip_all, fields(fragments = fragments.len()))]
pub fn seal_backup_code(
    config: &SealConfig,
    fragments: &Fragments,
    backup_code: &SecretString,
) -> Result<SealedBlob> {
    let salt = SaltStore::new(&config.salt_path).load()?;
    let key = DerivedKey::derive(&fragments.combined(), &salt, &config.kdf)?;
    let blob = SealedBlob::seal(&key, config.kdf, backup_code)?;
    BlobStore::new(&config.blob_path).save(&blob)?;

    info!(path = %config.blob_path.display(), "backup code sealed");
    Ok(blob)
}

/// Recovers the backup code from the saved blob.
///
/// Authentication failures come back as [`Retrieval::InvalidInputs`]; a
/// missing salt or blob file and I/O problems are errors.
#[instrument(level = "debug", skip_all, fields(fragments = fragments.len()))]
pub fn retrieve_backup_code(config: &SealConfig, fragments: &Fragments) -> Result<Retrieval> {
    retrieve(config, fragments, Diagnostics::Off)
}

/// Same as [`retrieve_backup_code`] but logs intermediate sizes and parameters
/// at debug level.
///
/// The derived key is logged only when `reveal_key` is set.
#[instrument(level = "debug", skip_all, fields(fragments = fragments.len()))]
pub fn debug_retrieve(
    config: &SealConfig,
    fragments: &Fragments,
    reveal_key: bool,
) -> Result<Retrieval> {
    retrieve(config, fragments, Diagnostics::On { reveal_key })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Diagnostics {
    Off,
    On { reveal_key: bool },
}

fn retrieve(
    config: &SealConfig,
    fragments: &Fragments,
    diagnostics: Diagnostics,
) -> Result<Retrieval> {
    let blob_store = BlobStore::new(&config.blob_path);
    let bytes = blob_store.read()?;
    let salt = SaltStore::new(&config.salt_path).load()?;
    let blob = match SealedBlob::from_bytes(&bytes) {
        Ok(blob) => blob,
        Err(Error::AuthenticationFailure) => {
            debug!("stored blob could not be parsed");
            return Ok(Retrieval::InvalidInputs);
        }
        Err(e) => return Err(e),
    };
    let combined = fragments.combined();

    let params = *blob.kdf();
    if params != config.kdf {
        warn!(
            configured = config.kdf.iterations,
            recorded = params.iterations,
            "blob was sealed with different KDF parameters, using the recorded ones"
        );
    }

    if let Diagnostics::On { .. } = diagnostics {
        debug!(
            combined_len = combined.expose_secret().chars().count(),
            fragments = fragments.len(),
            "combined input"
        );
        debug!(salt_len = SALT_LEN, "salt");
        debug!(
            blob_len = bytes.len(),
            created_at = blob.header().created_at,
            algorithm = ?params.algorithm,
            iterations = params.iterations,
            "encrypted data"
        );
    }

    let key = DerivedKey::derive(&combined, &salt, &params)?;

    if let Diagnostics::On { reveal_key: true } = diagnostics {
        warn!("writing derived key material to the log");
        debug!(key = %key.encoded().expose_secret(), "derived key");
    }

    match blob.unseal(&key) {
        Ok(code) => {
            debug!("backup code recovered");
            Ok(Retrieval::Recovered(code))
        }
        Err(Error::AuthenticationFailure) => {
            if diagnostics != Diagnostics::Off {
                debug!("authentication tag did not verify");
            }
            Ok(Retrieval::InvalidInputs)
        }
        Err(e) => Err(e),
    }
}
