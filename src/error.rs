use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A file that has to exist before an operation can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prerequisite {
    Salt,
    Blob,
}

impl Prerequisite {
    /// The step that creates this file.
    pub fn next_step(&self) -> &'static str {
        match self {
            Prerequisite::Salt => "fragment-seal salt",
            Prerequisite::Blob => "fragment-seal seal",
        }
    }
}

impl fmt::Display for Prerequisite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prerequisite::Salt => f.write_str("salt file"),
            Prerequisite::Blob => f.write_str("encrypted backup code file"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{what} '{}' not found. Run `{}` first.", .path.display(), .what.next_step())]
    MissingPrerequisite { what: Prerequisite, path: PathBuf },

    #[error(
        "salt file '{}' already exists; replacing it makes every blob sealed with it unrecoverable",
        .path.display()
    )]
    SaltExists { path: PathBuf },

    #[error("salt must be exactly 32 bytes, got {len}")]
    InvalidSalt { len: usize },

    #[error("unsupported key derivation work factor: {iterations} iterations")]
    InvalidKdfParams { iterations: u32 },

    /// Wrong fragments, wrong salt or a damaged blob. The cause is not reported.
    #[error("authentication failed")]
    AuthenticationFailure,

    #[error("backup code too large: sealed blob would be {len} bytes, limit is {max}")]
    BackupCodeTooLarge { len: usize, max: usize },

    #[error("encryption failed")]
    Encryption,

    #[error("recovered backup code is not valid UTF-8")]
    InvalidBackupCode,

    #[error("failed to encode sealed blob: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_prerequisite_names_next_step() {
        let err = Error::MissingPrerequisite {
            what: Prerequisite::Salt,
            path: PathBuf::from("salt.txt"),
        };
        assert_eq!(
            err.to_string(),
            "salt file 'salt.txt' not found. Run `fragment-seal salt` first."
        );

        let err = Error::MissingPrerequisite {
            what: Prerequisite::Blob,
            path: PathBuf::from("encrypted_backup_code.txt"),
        };
        assert!(err.to_string().contains("fragment-seal seal"));
    }

    #[test]
    fn test_authentication_failure_is_opaque() {
        assert_eq!(Error::AuthenticationFailure.to_string(), "authentication failed");
    }
}
