//! Field-level encryption for titles and urls.
//!
//! The sync service never sees bookmark content in the clear: titles and
//! urls cross the wire as AES-256-GCM ciphertext, base64-encoded so it can
//! ride inside JSON string fields. The output layout is
//! `base64(nonce (12 bytes) || ciphertext || tag (16 bytes))`.

use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const FIELD_KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
const TAG_SIZE: usize = 16;

/// Result type for cipher operations.
pub type CipherResult<T> = Result<T, CipherError>;

/// Errors from field encryption or decryption.
#[derive(Debug, Error)]
pub enum CipherError {
    /// Encryption failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Decryption failed (malformed or tampered ciphertext, wrong key).
    #[error("decryption failed: {message}")]
    DecryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// A key of the wrong size was supplied.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// Key derivation failed.
    #[error("key derivation failed: {message}")]
    KeyDerivationFailed {
        /// Description of the failure.
        message: String,
    },
}

impl CipherError {
    fn encryption(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    fn decryption(message: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            message: message.into(),
        }
    }
}

/// Encrypts and decrypts individual wire fields.
///
/// Implementations must be deterministic about *correctness*, not output:
/// encrypting the same plaintext twice may yield different ciphertexts.
pub trait FieldCipher: Send + Sync {
    /// Encrypts a field value for the wire.
    fn encrypt(&self, plaintext: &str) -> CipherResult<String>;

    /// Decrypts a field value from the wire.
    fn decrypt(&self, ciphertext: &str) -> CipherResult<String>;
}

/// Key material for field encryption.
///
/// The key is zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FieldKey {
    bytes: [u8; FIELD_KEY_SIZE],
}

impl FieldKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; FIELD_KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error unless the slice is exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CipherResult<Self> {
        if bytes.len() != FIELD_KEY_SIZE {
            return Err(CipherError::InvalidKeySize {
                expected: FIELD_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut key_bytes = [0u8; FIELD_KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Derives a key from an account secret using HKDF-SHA256.
    ///
    /// The secret is expected to carry high entropy already (a randomly
    /// generated account key, not a user-chosen password).
    pub fn derive_from_secret(secret: &[u8], salt: &[u8]) -> CipherResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(salt), secret);
        let mut bytes = [0u8; FIELD_KEY_SIZE];
        hk.expand(b"marksync-field-key-v1", &mut bytes)
            .map_err(|_| CipherError::KeyDerivationFailed {
                message: "HKDF expand failed".into(),
            })?;
        Ok(Self { bytes })
    }

    /// Returns the raw key bytes.
    ///
    /// # Security
    ///
    /// Don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; FIELD_KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// AES-256-GCM field cipher.
pub struct AesGcmFieldCipher {
    cipher: Aes256Gcm,
}

impl AesGcmFieldCipher {
    /// Creates a cipher with the given key.
    #[must_use]
    pub fn new(key: FieldKey) -> Self {
        // Infallible: FieldKey is always exactly the AES-256 key size.
        let key_array = GenericArray::from_slice(key.as_bytes());
        Self {
            cipher: Aes256Gcm::new(key_array),
        }
    }
}

impl FieldCipher for AesGcmFieldCipher {
    fn encrypt(&self, plaintext: &str) -> CipherResult<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::encryption("encryption error"))?;

        let mut raw = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        raw.extend_from_slice(&nonce_bytes);
        raw.extend(ciphertext);
        Ok(BASE64.encode(raw))
    }

    fn decrypt(&self, ciphertext: &str) -> CipherResult<String> {
        let raw = BASE64
            .decode(ciphertext)
            .map_err(|_| CipherError::decryption("not valid base64"))?;
        if raw.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CipherError::decryption("ciphertext too short"));
        }
        let nonce = Nonce::from_slice(&raw[..NONCE_SIZE]);
        let plaintext = self
            .cipher
            .decrypt(nonce, &raw[NONCE_SIZE..])
            .map_err(|_| CipherError::decryption("decryption error"))?;
        String::from_utf8(plaintext).map_err(|_| CipherError::decryption("not valid UTF-8"))
    }
}

impl std::fmt::Debug for AesGcmFieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmFieldCipher")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> AesGcmFieldCipher {
        AesGcmFieldCipher::new(FieldKey::from_bytes(&[7u8; FIELD_KEY_SIZE]).unwrap())
    }

    #[test]
    fn roundtrip() {
        let c = cipher();
        let ct = c.encrypt("Example Bookmark").unwrap();
        assert_ne!(ct, "Example Bookmark");
        assert_eq!(c.decrypt(&ct).unwrap(), "Example Bookmark");
    }

    #[test]
    fn nonces_vary() {
        let c = cipher();
        assert_ne!(c.encrypt("same").unwrap(), c.encrypt("same").unwrap());
    }

    #[test]
    fn wrong_key_fails() {
        let c1 = cipher();
        let c2 = AesGcmFieldCipher::new(FieldKey::from_bytes(&[8u8; FIELD_KEY_SIZE]).unwrap());
        let ct = c1.encrypt("secret").unwrap();
        assert!(matches!(
            c2.decrypt(&ct),
            Err(CipherError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn malformed_ciphertext_fails() {
        let c = cipher();
        assert!(c.decrypt("!!! not base64 !!!").is_err());
        assert!(c.decrypt(&BASE64.encode([0u8; 4])).is_err());
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let c = cipher();
        let ct = c.encrypt("").unwrap();
        assert_eq!(c.decrypt(&ct).unwrap(), "");
    }

    #[test]
    fn key_size_is_checked() {
        assert!(FieldKey::from_bytes(&[0u8; 16]).is_err());
        assert!(FieldKey::from_bytes(&[0u8; FIELD_KEY_SIZE]).is_ok());
    }

    #[test]
    fn derivation_is_deterministic() {
        let k1 = FieldKey::derive_from_secret(b"account-secret", b"salt").unwrap();
        let k2 = FieldKey::derive_from_secret(b"account-secret", b"salt").unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());

        let k3 = FieldKey::derive_from_secret(b"account-secret", b"other").unwrap();
        assert_ne!(k1.as_bytes(), k3.as_bytes());
    }

    #[test]
    fn debug_redacts_key() {
        let key = FieldKey::generate();
        assert!(format!("{key:?}").contains("REDACTED"));
    }
}
