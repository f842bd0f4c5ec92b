//! ARRAYMETA - Fragment Encryption
//! AES-256-GCM sealing of fragment payloads and of the array key check.
//!
//! Sealed layout: `[nonce: 12 bytes][ciphertext + tag]`.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{ArrayMetaError, Result};

const NONCE_LEN: usize = 12;
const AES_256_KEY_LEN: usize = 32;

/// Encryption scheme an array was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionType {
    NoEncryption,
    Aes256Gcm,
}

/// Symmetric key material supplied when opening or consolidating an array.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    kind: EncryptionType,
    bytes: Vec<u8>,
}

impl EncryptionKey {
    pub fn new(kind: EncryptionType, bytes: &[u8]) -> Result<Self> {
        match kind {
            EncryptionType::Aes256Gcm if bytes.len() != AES_256_KEY_LEN => {
                Err(ArrayMetaError::InvalidArgument(format!(
                    "AES-256-GCM key must be {} bytes, got {}",
                    AES_256_KEY_LEN,
                    bytes.len()
                )))
            }
            EncryptionType::NoEncryption if !bytes.is_empty() => Err(
                ArrayMetaError::InvalidArgument("unencrypted key must be empty".into()),
            ),
            _ => Ok(Self {
                kind,
                bytes: bytes.to_vec(),
            }),
        }
    }

    /// Shorthand for a 32-byte AES-256-GCM key.
    pub fn aes256_gcm(bytes: &[u8]) -> Result<Self> {
        Self::new(EncryptionType::Aes256Gcm, bytes)
    }

    pub fn kind(&self) -> EncryptionType {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// Never print key bytes.
impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("kind", &self.kind)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// AES-256-GCM cipher bound to one array key.
pub struct FragmentCipher {
    cipher: Aes256Gcm,
}

impl FragmentCipher {
    pub fn new(key: &EncryptionKey) -> Result<Self> {
        if key.kind != EncryptionType::Aes256Gcm {
            return Err(ArrayMetaError::InvalidArgument(format!(
                "cannot build a cipher from a {:?} key",
                key.kind
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&key.bytes)
            .map_err(|_| ArrayMetaError::InvalidArgument("invalid AES-256 key length".into()))?;
        Ok(Self { cipher })
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| ArrayMetaError::Authentication("encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt and authenticate a buffer produced by [`seal`](Self::seal).
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(ArrayMetaError::Corruption(format!(
                "sealed payload of {} bytes is shorter than its nonce",
                sealed.len()
            )));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ArrayMetaError::Authentication("invalid encryption key".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8; 32] = b"0123456789abcdeF0123456789abcdeF";

    #[test]
    fn test_seal_open() {
        let cipher = FragmentCipher::new(&EncryptionKey::aes256_gcm(KEY).unwrap()).unwrap();
        let sealed = cipher.seal(b"metadata payload").unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"metadata payload");
        assert_eq!(cipher.open(&sealed).unwrap(), b"metadata payload");
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let right = FragmentCipher::new(&EncryptionKey::aes256_gcm(KEY).unwrap()).unwrap();
        let wrong =
            FragmentCipher::new(&EncryptionKey::aes256_gcm(&[7u8; 32]).unwrap()).unwrap();
        let sealed = right.seal(b"secret").unwrap();
        assert!(matches!(
            wrong.open(&sealed),
            Err(ArrayMetaError::Authentication(_))
        ));
    }

    #[test]
    fn test_key_length_validated() {
        assert!(EncryptionKey::aes256_gcm(b"short").is_err());
        assert!(EncryptionKey::new(EncryptionType::NoEncryption, KEY).is_err());
        assert!(EncryptionKey::new(EncryptionType::NoEncryption, &[]).is_ok());
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = EncryptionKey::aes256_gcm(KEY).unwrap();
        let shown = format!("{:?}", key);
        assert!(!shown.contains("0123456789"));
        assert!(shown.contains("len: 32"));
    }
}
