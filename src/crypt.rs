use base64::{Engine, engine::general_purpose::URL_SAFE};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretSlice, SecretString};
use sha2::Sha256;
use std::fmt;
use tracing::trace;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::{KEY_LEN, KdfAlgorithm, KdfParams};
use crate::error::{Error, Result};

/// Length in bytes of the persisted salt.
pub const SALT_LEN: usize = 32;

/// Random, non-secret value mixed into every derivation.
///
/// One salt is generated per installation and reused for both sealing and
/// retrieving. A different salt does not produce an error, it silently
/// produces a different key.
#[derive(Clone, PartialEq, Eq)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    /// Draws a fresh salt from the thread-local CSPRNG (seeded by the OS).
    pub fn generate() -> Self {
        let mut bytes = [0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; SALT_LEN] = bytes
            .try_into()
            .map_err(|_| Error::InvalidSalt { len: bytes.len() })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }
}

impl From<[u8; SALT_LEN]> for Salt {
    fn from(bytes: [u8; SALT_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({} bytes)", SALT_LEN)
    }
}

/// The secret strings supplied by the parties, in the order they were given.
///
/// Fragments are never trimmed or normalized: the combined secret has to be
/// byte-for-byte identical between sealing and retrieving.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Fragments {
    parts: Vec<String>,
}

impl Fragments {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Concatenates every fragment in order into the combined secret.
    pub fn combined(&self) -> SecretString {
        SecretString::from(self.parts.concat())
    }
}

impl fmt::Debug for Fragments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fragments")
            .field("count", &self.parts.len())
            .finish_non_exhaustive()
    }
}

/// Symmetric key derived from the combined secret and the salt.
///
/// Never persisted, recomputed on every run.
pub struct DerivedKey {
    key: SecretSlice<u8>,
}

impl DerivedKey {
    /// Runs the password-based KDF described by `params`.
    ///
    /// Pure function of its inputs: the same combined secret, salt and
    /// parameters always yield the same key.
    pub fn derive(combined: &SecretString, salt: &Salt, params: &KdfParams) -> Result<Self> {
        params.validate()?;

        let mut key = [0u8; KEY_LEN];
        match params.algorithm {
            KdfAlgorithm::Pbkdf2HmacSha256 => {
                trace!(iterations = params.iterations, "deriving key with PBKDF2-HMAC-SHA256");
                pbkdf2_hmac::<Sha256>(
                    combined.expose_secret().as_bytes(),
                    salt.as_bytes(),
                    params.iterations,
                    &mut key,
                );
            }
        }

        let derived = Self {
            key: SecretSlice::new(key.into()),
        };

        // Zeroize the stack copy of the key material
        key.zeroize();

        Ok(derived)
    }

    /// Raw key bytes, always [`KEY_LEN`] long.
    pub fn key(&self) -> &SecretSlice<u8> {
        &self.key
    }

    /// URL-safe base64 of the raw key (44 characters, padded).
    ///
    /// Only for explicit debugging output.
    pub fn encoded(&self) -> SecretString {
        SecretString::from(URL_SAFE.encode(self.key.expose_secret()))
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}
