//! Secret handling for credentials stored in administrative configuration.
//!
//! The administrative store keeps the SQS secret key encrypted. The resolver
//! decrypts it through an injected [`SecretDecryptor`]; values sourced from
//! deployment configuration are used as-is.

use crate::error::ConfigurationError;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Length of the AES-GCM authentication tag appended to each ciphertext
const TAG_LEN: usize = 16;

/// Length of the AES-GCM nonce
const NONCE_LEN: usize = 12;

/// Secret string value that is wiped from memory on drop.
///
/// Never printed by `Debug`; call [`SecretString::expose_secret`] only at the
/// point of use.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the plaintext value
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Decrypts values held encrypted in administrative configuration
#[cfg_attr(test, mockall::automock)]
pub trait SecretDecryptor: Send + Sync {
    /// Decrypt a stored ciphertext. `key` names the configuration entry and is
    /// only used for error reporting.
    fn decrypt(&self, key: &str, ciphertext: &str) -> Result<SecretString, ConfigurationError>;
}

/// AES-256-GCM cipher for administrative secrets.
///
/// Ciphertexts are stored as `hex(iv):hex(tag):hex(ciphertext)`.
pub struct AesGcmSecretCipher {
    key: Zeroizing<[u8; 32]>,
}

impl AesGcmSecretCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    /// Create a cipher from a 64 character hex encoded key
    pub fn from_hex(hex_key: &str) -> Result<Self, ConfigurationError> {
        let bytes = Zeroizing::new(hex::decode(hex_key.trim()).map_err(|e| {
            ConfigurationError::Parsing {
                key: "encryption.key".to_string(),
                message: e.to_string(),
            }
        })?);

        if bytes.len() != 32 {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "encryption key must be 32 bytes (64 hex characters), got {} bytes",
                    bytes.len()
                ),
            });
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        let cipher = Self::new(key);
        key.zeroize();
        Ok(cipher)
    }

    /// Encrypt a plaintext secret into its stored form
    pub fn encrypt(&self, plaintext: &str) -> Result<String, ConfigurationError> {
        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("encryption failed: {}", e),
            })?;

        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce.as_slice()),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }

    fn cipher(&self) -> Result<Aes256Gcm, ConfigurationError> {
        Aes256Gcm::new_from_slice(self.key.as_slice()).map_err(|e| ConfigurationError::Invalid {
            message: format!("failed to create cipher: {}", e),
        })
    }
}

impl fmt::Debug for AesGcmSecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmSecretCipher")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl SecretDecryptor for AesGcmSecretCipher {
    fn decrypt(&self, key: &str, ciphertext: &str) -> Result<SecretString, ConfigurationError> {
        let failure = |message: String| ConfigurationError::Decryption {
            key: key.to_string(),
            message,
        };

        let parts: Vec<&str> = ciphertext.trim().splitn(3, ':').collect();
        if parts.len() != 3 {
            return Err(failure(
                "expected format iv:tag:ciphertext".to_string(),
            ));
        }

        let iv = hex::decode(parts[0]).map_err(|e| failure(format!("invalid iv: {}", e)))?;
        let tag = hex::decode(parts[1]).map_err(|e| failure(format!("invalid tag: {}", e)))?;
        let mut sealed =
            hex::decode(parts[2]).map_err(|e| failure(format!("invalid ciphertext: {}", e)))?;

        if iv.len() != NONCE_LEN {
            return Err(failure(format!(
                "invalid iv length: expected {}, got {}",
                NONCE_LEN,
                iv.len()
            )));
        }

        sealed.extend_from_slice(&tag);
        let plaintext = Zeroizing::new(
            self.cipher()?
                .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
                .map_err(|_| failure("authentication tag mismatch".to_string()))?,
        );

        let value = String::from_utf8(plaintext.to_vec())
            .map_err(|_| failure("plaintext is not valid UTF-8".to_string()))?;
        Ok(SecretString::new(value))
    }
}

#[cfg(test)]
#[path = "secret_tests.rs"]
mod tests;
