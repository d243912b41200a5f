//! Encryption key material and the key-check surface of the generic-tile
//! format. Payload ciphering itself lives in the external filter pipeline;
//! the core validates that readers present the key a tile was written under.

use sha2::{Digest, Sha256};
use tessera_error::{tessera_bail, TesseraResult};

/// The cipher family a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EncryptionType {
    /// No encryption.
    NoEncryption = 0,
    /// AES-256-GCM key material.
    Aes256Gcm = 1,
}

/// An encryption key handed to store/load operations.
#[derive(Clone)]
pub struct EncryptionKey {
    encryption_type: EncryptionType,
    key: Vec<u8>,
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("EncryptionKey")
            .field("encryption_type", &self.encryption_type)
            .finish_non_exhaustive()
    }
}

impl EncryptionKey {
    /// The no-encryption key.
    pub fn no_encryption() -> Self {
        Self {
            encryption_type: EncryptionType::NoEncryption,
            key: Vec::new(),
        }
    }

    /// An AES-256-GCM key. `key` must be exactly 32 bytes.
    pub fn aes_256_gcm(key: &[u8]) -> TesseraResult<Self> {
        if key.len() != 32 {
            tessera_bail!(InvalidArgument: "AES-256-GCM keys are 32 bytes, got {}", key.len());
        }
        Ok(Self {
            encryption_type: EncryptionType::Aes256Gcm,
            key: key.to_vec(),
        })
    }

    /// The cipher family of this key.
    pub fn encryption_type(&self) -> EncryptionType {
        self.encryption_type
    }

    /// A 4-byte check value persisted in tile headers so a reader presenting
    /// the wrong key fails with `Decrypt` instead of garbage.
    pub fn check_value(&self) -> [u8; 4] {
        match self.encryption_type {
            EncryptionType::NoEncryption => [0; 4],
            EncryptionType::Aes256Gcm => {
                let digest = Sha256::digest(&self.key);
                [digest[0], digest[1], digest[2], digest[3]]
            }
        }
    }
}

impl Default for EncryptionKey {
    fn default() -> Self {
        Self::no_encryption()
    }
}
