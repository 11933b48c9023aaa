//! Seal a single backup code behind a key derived from several secret
//! fragments.
//!
//! The fragments are concatenated in order and stretched with
//! PBKDF2-HMAC-SHA256 over a persisted random salt; the resulting key seals
//! the backup code with AES-256-GCM. Only the exact same fragments, in the
//! same order, with the same salt, open it again.

pub mod backup;
pub mod config;
pub mod crypt;
pub mod error;
pub mod secret;
pub mod store;

pub use backup::{Retrieval, debug_retrieve, retrieve_backup_code, seal_backup_code};
pub use config::{KdfAlgorithm, KdfParams, SealConfig};
pub use crypt::{DerivedKey, Fragments, Salt};
pub use error::{Error, Prerequisite, Result};
pub use secret::SealedBlob;
pub use store::{BlobStore, SaltStore};
