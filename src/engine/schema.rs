//! ARRAYMETA - Array Header
//! The minimal on-disk record of an array that the metadata layer needs:
//! whether it exists, and which encryption scheme its fragments use.
//!
//! ## Layout
//! ```text
//! <array>/
//!   __array_header     bincode(ArrayHeader)
//!   __meta/            metadata fragments
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ArrayMetaError, Result};
use crate::types::Timestamp;

use super::crypto::{EncryptionKey, EncryptionType, FragmentCipher};
use super::fragment::write_atomic;

pub const ARRAY_HEADER_FILE: &str = "__array_header";
pub const METADATA_DIR: &str = "__meta";

const FORMAT_VERSION: u32 = 1;
const KEY_CHECK_PLAINTEXT: &[u8] = b"arraymeta key check v1";

/// Persistent header written once when an array is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayHeader {
    pub format_version: u32,
    pub encryption: EncryptionType,
    /// `KEY_CHECK_PLAINTEXT` sealed with the array key, if encrypted.
    pub key_check: Option<Vec<u8>>,
    pub created_at: Timestamp,
}

impl ArrayHeader {
    /// Create the array directory layout and persist a new header.
    pub fn create(
        array_dir: &Path,
        key: Option<&EncryptionKey>,
        created_at: Timestamp,
        sync: bool,
    ) -> Result<Self> {
        let header_path = header_path(array_dir);
        if header_path.exists() {
            return Err(ArrayMetaError::InvalidState(format!(
                "array already exists at {:?}",
                array_dir
            )));
        }
        fs::create_dir_all(array_dir.join(METADATA_DIR))?;

        let (encryption, key_check) = match key {
            Some(key) if key.kind() == EncryptionType::Aes256Gcm => {
                let cipher = FragmentCipher::new(key)?;
                (
                    EncryptionType::Aes256Gcm,
                    Some(cipher.seal(KEY_CHECK_PLAINTEXT)?),
                )
            }
            _ => (EncryptionType::NoEncryption, None),
        };

        let header = Self {
            format_version: FORMAT_VERSION,
            encryption,
            key_check,
            created_at,
        };
        write_atomic(&header_path, &bincode::serialize(&header)?, sync)?;
        Ok(header)
    }

    /// Load the header of an existing array.
    pub fn load(array_dir: &Path) -> Result<Self> {
        let bytes = match fs::read(header_path(array_dir)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArrayMetaError::InvalidState(format!(
                    "array does not exist at {:?}",
                    array_dir
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let header: Self = bincode::deserialize(&bytes)?;
        if header.format_version != FORMAT_VERSION {
            return Err(ArrayMetaError::Corruption(format!(
                "unsupported array format version {}",
                header.format_version
            )));
        }
        Ok(header)
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption == EncryptionType::Aes256Gcm
    }

    /// Check supplied key material against this array and build the
    /// fragment cipher for it.
    pub fn cipher_for(&self, key: Option<&EncryptionKey>) -> Result<Option<FragmentCipher>> {
        let supplied = key.filter(|k| k.kind() != EncryptionType::NoEncryption);
        match (self.encryption, supplied) {
            (EncryptionType::NoEncryption, None) => Ok(None),
            (EncryptionType::NoEncryption, Some(_)) => Err(ArrayMetaError::Authentication(
                "array is not encrypted but an encryption key was given".into(),
            )),
            (EncryptionType::Aes256Gcm, None) => Err(ArrayMetaError::Authentication(
                "array is encrypted; an encryption key is required".into(),
            )),
            (EncryptionType::Aes256Gcm, Some(key)) => {
                let cipher = FragmentCipher::new(key)?;
                let check = self.key_check.as_deref().ok_or_else(|| {
                    ArrayMetaError::Corruption("encrypted array header lacks a key check".into())
                })?;
                if cipher.open(check)? != KEY_CHECK_PLAINTEXT {
                    return Err(ArrayMetaError::Authentication(
                        "invalid encryption key".into(),
                    ));
                }
                Ok(Some(cipher))
            }
        }
    }
}

pub fn header_path(array_dir: &Path) -> PathBuf {
    array_dir.join(ARRAY_HEADER_FILE)
}

pub fn metadata_dir(array_dir: &Path) -> PathBuf {
    array_dir.join(METADATA_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8; 32] = b"0123456789abcdeF0123456789abcdeF";

    #[test]
    fn test_create_and_load_plain() {
        let dir = tempfile::tempdir().unwrap();
        let array = dir.path().join("plain");
        ArrayHeader::create(&array, None, 42, false).unwrap();

        let header = ArrayHeader::load(&array).unwrap();
        assert!(!header.is_encrypted());
        assert_eq!(header.created_at, 42);
        assert!(metadata_dir(&array).is_dir());
        assert!(header.cipher_for(None).unwrap().is_none());
    }

    #[test]
    fn test_create_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let array = dir.path().join("dup");
        ArrayHeader::create(&array, None, 1, false).unwrap();
        assert!(matches!(
            ArrayHeader::create(&array, None, 2, false),
            Err(ArrayMetaError::InvalidState(_))
        ));
    }

    #[test]
    fn test_missing_array() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ArrayHeader::load(&dir.path().join("nope")),
            Err(ArrayMetaError::InvalidState(_))
        ));
    }

    #[test]
    fn test_key_checks() {
        let dir = tempfile::tempdir().unwrap();
        let key = EncryptionKey::aes256_gcm(KEY).unwrap();
        let wrong = EncryptionKey::aes256_gcm(&[1u8; 32]).unwrap();

        let enc = dir.path().join("enc");
        let header = ArrayHeader::create(&enc, Some(&key), 1, false).unwrap();
        assert!(header.is_encrypted());
        assert!(header.cipher_for(Some(&key)).unwrap().is_some());
        assert!(matches!(
            header.cipher_for(None),
            Err(ArrayMetaError::Authentication(_))
        ));
        assert!(matches!(
            header.cipher_for(Some(&wrong)),
            Err(ArrayMetaError::Authentication(_))
        ));

        let plain = dir.path().join("plain");
        let header = ArrayHeader::create(&plain, None, 1, false).unwrap();
        assert!(matches!(
            header.cipher_for(Some(&key)),
            Err(ArrayMetaError::Authentication(_))
        ));
    }

    #[test]
    fn test_garbage_header_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let array = dir.path().join("bad");
        fs::create_dir_all(&array).unwrap();
        fs::write(header_path(&array), b"\x01").unwrap();
        assert!(matches!(
            ArrayHeader::load(&array),
            Err(ArrayMetaError::Corruption(_))
        ));
    }
}
