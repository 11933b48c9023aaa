//! Authenticated sealing of the backup code.
//!
//! A sealed blob is the bincode encoding of a [`BlobHeader`] followed by the
//! AES-256-GCM ciphertext (tag included). The encoded header is bound to the
//! ciphertext as associated data, so the recorded KDF parameters, timestamp
//! and nonce cannot be altered without failing authentication.

use aes_gcm::{
    Aes256Gcm, Key,
    aead::{Aead, KeyInit, Payload},
};
use base64::{Engine, engine::general_purpose::URL_SAFE};
use bincode::{Decode, Encode};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;
use zeroize::Zeroize;

use crate::config::KdfParams;
use crate::crypt::DerivedKey;
use crate::error::{Error, Result};

/// Current blob format version.
pub const BLOB_VERSION: u8 = 1;

/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;

/// Largest encoded blob, enforced both when sealing and when decoding.
pub const MAX_BLOB_LEN: usize = 64 * 1024;

fn bincode_config() -> impl bincode::config::Config {
    bincode::config::standard()
}

fn bincode_decode_config() -> impl bincode::config::Config {
    bincode::config::standard().with_limit::<MAX_BLOB_LEN>()
}

fn cipher(key: &DerivedKey) -> Aes256Gcm {
    // DerivedKey always holds exactly KEY_LEN bytes
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.key().expose_secret()))
}

/// Metadata stored in front of the ciphertext.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct BlobHeader {
    /// Format version, currently always [`BLOB_VERSION`]
    pub version: u8,
    /// Parameters the key was derived with
    pub kdf: KdfParams,
    /// Seconds since the Unix epoch at sealing time
    pub created_at: u64,
    /// Random per-blob nonce
    pub nonce: [u8; NONCE_LEN],
}

impl BlobHeader {
    /// Encoded header, authenticated as associated data.
    fn to_aad(&self) -> Result<Vec<u8>> {
        Ok(bincode::encode_to_vec(self, bincode_config())?)
    }
}

/// The backup code encrypted and authenticated under a [`DerivedKey`].
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct SealedBlob {
    header: BlobHeader,
    ciphertext: Vec<u8>,
}

impl SealedBlob {
    /// Encrypts `backup_code` under `key`.
    ///
    /// `kdf` must be the parameters `key` was derived with; they are recorded
    /// in the header so retrieval can repeat the same derivation.
    pub fn seal(key: &DerivedKey, kdf: KdfParams, backup_code: &SecretString) -> Result<Self> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let header = BlobHeader {
            version: BLOB_VERSION,
            kdf,
            created_at: unix_now(),
            nonce,
        };
        let aad = header.to_aad()?;

        let ciphertext = cipher(key)
            .encrypt(
                (&header.nonce).into(),
                Payload {
                    msg: backup_code.expose_secret().as_bytes(),
                    aad: &aad,
                },
            )
            .map_err(|_| Error::Encryption)?;

        let blob = Self { header, ciphertext };
        let encoded_len = blob.to_bytes()?.len();

        debug!(
            ciphertext_len = blob.ciphertext.len(),
            encoded_len,
            iterations = kdf.iterations,
            "sealed backup code"
        );

        Ok(blob)
    }

    /// Verifies the tag and decrypts.
    ///
    /// A wrong key and a damaged blob both yield [`Error::AuthenticationFailure`].
    pub fn unseal(&self, key: &DerivedKey) -> Result<SecretString> {
        let aad = self.header.to_aad()?;
        let plaintext = cipher(key)
            .decrypt(
                (&self.header.nonce).into(),
                Payload {
                    msg: &self.ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| Error::AuthenticationFailure)?;

        match String::from_utf8(plaintext) {
            Ok(code) => Ok(SecretString::from(code)),
            Err(e) => {
                let mut bytes = e.into_bytes();
                bytes.zeroize();
                Err(Error::InvalidBackupCode)
            }
        }
    }

    pub fn header(&self) -> &BlobHeader {
        &self.header
    }

    pub fn kdf(&self) -> &KdfParams {
        &self.header.kdf
    }

    pub fn created_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.header.created_at)
    }

    /// Encodes the blob, refusing anything [`Self::from_bytes`] would not read back.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = bincode::encode_to_vec(self, bincode_config())?;
        if bytes.len() > MAX_BLOB_LEN {
            return Err(Error::BackupCodeTooLarge {
                len: bytes.len(),
                max: MAX_BLOB_LEN,
            });
        }
        Ok(bytes)
    }

    /// Parses an encoded blob.
    ///
    /// Anything that is not a well-formed, canonically encoded blob of a known
    /// version is reported as [`Error::AuthenticationFailure`], the same as a
    /// failed tag check.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_BLOB_LEN {
            return Err(Error::AuthenticationFailure);
        }
        let (header, header_len): (BlobHeader, usize) =
            bincode::decode_from_slice(bytes, bincode_decode_config())
                .map_err(|_| Error::AuthenticationFailure)?;

        // The header is re-encoded as associated data, so it must round-trip exactly
        if header.to_aad()?.as_slice() != &bytes[..header_len] {
            return Err(Error::AuthenticationFailure);
        }
        if header.version != BLOB_VERSION || header.kdf.validate().is_err() {
            return Err(Error::AuthenticationFailure);
        }

        let (ciphertext, body_len): (Vec<u8>, usize) =
            bincode::decode_from_slice(&bytes[header_len..], bincode_decode_config())
                .map_err(|_| Error::AuthenticationFailure)?;
        if header_len + body_len != bytes.len() {
            return Err(Error::AuthenticationFailure);
        }

        Ok(Self { header, ciphertext })
    }

    /// URL-safe base64 of [`Self::to_bytes`], for embedding the blob as a literal.
    pub fn to_base64(&self) -> Result<String> {
        Ok(URL_SAFE.encode(self.to_bytes()?))
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE
            .decode(encoded.trim())
            .map_err(|_| Error::AuthenticationFailure)?;
        Self::from_bytes(&bytes)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::{Fragments, Salt};

    const FAST: KdfParams = KdfParams::pbkdf2_sha256(1_000);

    fn key_for(parts: &[&str]) -> DerivedKey {
        let combined = Fragments::new(parts.iter().copied()).combined();
        DerivedKey::derive(&combined, &Salt::from([42u8; 32]), &FAST).unwrap()
    }

    fn code(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[test]
    fn test_seal_unseal() {
        let key = key_for(&["secret1", "secret2", "secret3"]);
        let blob = SealedBlob::seal(&key, FAST, &code("BACKUPCODE-123456")).unwrap();
        let recovered = blob.unseal(&key).unwrap();
        assert_eq!(recovered.expose_secret(), "BACKUPCODE-123456");
        assert_eq!(blob.kdf(), &FAST);
        assert_eq!(blob.header().version, BLOB_VERSION);
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let key = key_for(&["secret1", "secret2", "secret3"]);
        let blob = SealedBlob::seal(&key, FAST, &code("BACKUPCODE-123456")).unwrap();
        let wrong = key_for(&["secret1", "secret2", "wrong"]);
        assert!(matches!(blob.unseal(&wrong), Err(Error::AuthenticationFailure)));
    }

    #[test]
    fn test_unicode_and_empty_codes() {
        let key = key_for(&["ключ", "鍵", "🔑"]);
        for value in ["", "naïve-código-✓"] {
            let blob = SealedBlob::seal(&key, FAST, &code(value)).unwrap();
            assert_eq!(blob.unseal(&key).unwrap().expose_secret(), value);
        }
    }

    #[test]
    fn test_nonce_is_fresh_per_seal() {
        let key = key_for(&["a", "b", "c"]);
        let first = SealedBlob::seal(&key, FAST, &code("same")).unwrap();
        let second = SealedBlob::seal(&key, FAST, &code("same")).unwrap();
        assert_ne!(first.header().nonce, second.header().nonce);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_bytes_round_trip_then_unseal() {
        let key = key_for(&["secret1", "secret2", "secret3"]);
        let blob = SealedBlob::seal(&key, FAST, &code("BACKUPCODE-123456")).unwrap();
        let parsed = SealedBlob::from_bytes(&blob.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, blob);
        assert_eq!(parsed.unseal(&key).unwrap().expose_secret(), "BACKUPCODE-123456");
    }

    #[test]
    fn test_every_flipped_byte_is_detected() {
        let key = key_for(&["secret1", "secret2", "secret3"]);
        let bytes = SealedBlob::seal(&key, FAST, &code("BACKUPCODE-123456"))
            .unwrap()
            .to_bytes()
            .unwrap();

        for i in 0..bytes.len() {
            let mut tampered = bytes.clone();
            tampered[i] ^= 0x01;
            let outcome = SealedBlob::from_bytes(&tampered).and_then(|blob| blob.unseal(&key));
            assert!(
                matches!(outcome, Err(Error::AuthenticationFailure)),
                "flipping byte {i} was not detected"
            );
        }
    }

    #[test]
    fn test_truncated_and_extended_blobs_rejected() {
        let key = key_for(&["x", "y", "z"]);
        let bytes = SealedBlob::seal(&key, FAST, &code("code"))
            .unwrap()
            .to_bytes()
            .unwrap();

        assert!(matches!(
            SealedBlob::from_bytes(&bytes[..bytes.len() - 1]),
            Err(Error::AuthenticationFailure)
        ));
        assert!(matches!(SealedBlob::from_bytes(&[]), Err(Error::AuthenticationFailure)));

        let mut extended = bytes.clone();
        extended.push(0);
        assert!(matches!(
            SealedBlob::from_bytes(&extended),
            Err(Error::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let key = key_for(&["x", "y", "z"]);
        let mut blob = SealedBlob::seal(&key, FAST, &code("code")).unwrap();
        blob.header.version = 2;
        let bytes = blob.to_bytes().unwrap();
        assert!(matches!(
            SealedBlob::from_bytes(&bytes),
            Err(Error::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_base64_literal() {
        let key = key_for(&["secret1", "secret2", "secret3"]);
        let blob = SealedBlob::seal(&key, FAST, &code("BACKUPCODE-123456")).unwrap();
        let literal = blob.to_base64().unwrap();
        assert!(
            literal
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '='))
        );

        let parsed = SealedBlob::from_base64(&format!("{literal}\n")).unwrap();
        assert_eq!(parsed.unseal(&key).unwrap().expose_secret(), "BACKUPCODE-123456");
        assert!(matches!(
            SealedBlob::from_base64("not base64!"),
            Err(Error::AuthenticationFailure)
        ));
    }

    /// Length of the longest backup code whose sealed blob still fits.
    fn longest_code(key: &DerivedKey) -> usize {
        // ciphertext lengths from 251 to 65535 share a 3-byte length prefix
        let sample_len = 1_000;
        let blob = SealedBlob::seal(key, FAST, &code(&"A".repeat(sample_len))).unwrap();
        let overhead = blob.to_bytes().unwrap().len() - sample_len;
        MAX_BLOB_LEN - overhead
    }

    #[test]
    fn test_size_limit_boundary() {
        let key = key_for(&["a", "b", "c"]);
        let max = longest_code(&key);

        let fits = SealedBlob::seal(&key, FAST, &code(&"A".repeat(max))).unwrap();
        let bytes = fits.to_bytes().unwrap();
        assert_eq!(bytes.len(), MAX_BLOB_LEN);
        let parsed = SealedBlob::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.unseal(&key).unwrap().expose_secret().len(), max);

        match SealedBlob::seal(&key, FAST, &code(&"A".repeat(max + 1))) {
            Err(Error::BackupCodeTooLarge { len, max: limit }) => {
                assert_eq!(len, MAX_BLOB_LEN + 1);
                assert_eq!(limit, MAX_BLOB_LEN);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            SealedBlob::seal(&key, FAST, &code(&"A".repeat(70_000))),
            Err(Error::BackupCodeTooLarge { .. })
        ));
    }

    #[test]
    fn test_created_at_recorded() {
        let key = key_for(&["a"]);
        let before = SystemTime::now() - Duration::from_secs(1);
        let blob = SealedBlob::seal(&key, FAST, &code("c")).unwrap();
        assert!(blob.created_at() >= before);
    }
}
