//! Encryption at rest using AES-256-GCM
//!
//! The local store is sealed as one blob: a random 96-bit nonce followed by
//! the AES-256-GCM ciphertext. The 256-bit key is derived from the master
//! key with Argon2id.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use argon2::Argon2;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Result, SecretsError};

/// Nonce size for AES-256-GCM (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Key size for AES-256 (256 bits)
pub const KEY_SIZE: usize = 32;

const SALT_SIZE: usize = 16;

/// Salt used by [`SaltPolicy::Fixed`]. Changing it makes existing stores unreadable.
const FIXED_SALT: &[u8] = b"harbor-local-secret-store";

/// Where the key-derivation salt comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaltPolicy {
    /// One constant salt for every installation
    #[default]
    Fixed,
    /// Random per-installation salt stored in `<store>.salt`
    Sidecar,
}

impl SaltPolicy {
    /// Path of the sidecar salt file for a store
    pub fn sidecar_path(store_path: &Path) -> PathBuf {
        let mut name = store_path.as_os_str().to_owned();
        name.push(".salt");
        PathBuf::from(name)
    }

    /// Salt bytes for the store at `store_path`.
    ///
    /// With `Sidecar` a fresh salt is generated and written when none exists.
    pub fn load_or_create(&self, store_path: &Path) -> Result<Vec<u8>> {
        match self {
            Self::Fixed => Ok(FIXED_SALT.to_vec()),
            Self::Sidecar => {
                let salt_path = Self::sidecar_path(store_path);
                if salt_path.exists() {
                    let salt = std::fs::read(&salt_path)?;
                    if salt.len() < SALT_SIZE {
                        return Err(SecretsError::encryption(format!(
                            "Salt file {} is too short",
                            salt_path.display()
                        )));
                    }
                    return Ok(salt);
                }

                let mut salt = vec![0u8; SALT_SIZE];
                rand::thread_rng().fill_bytes(&mut salt);
                if let Some(parent) = salt_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&salt_path, &salt)?;
                info!(path = ?salt_path, "Generated new secret store salt");
                Ok(salt)
            }
        }
    }
}

/// Symmetric key derived from the master key
#[derive(Clone)]
pub struct MasterKey([u8; KEY_SIZE]);

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

impl MasterKey {
    /// Derive a key from a master secret and salt with Argon2id
    pub fn derive(master: &str, salt: &[u8]) -> Result<Self> {
        if master.is_empty() {
            return Err(SecretsError::encryption("Master key must not be empty"));
        }
        let mut key = [0u8; KEY_SIZE];
        Argon2::default()
            .hash_password_into(master.as_bytes(), salt, &mut key)
            .map_err(|e| SecretsError::encryption(format!("Key derivation failed: {e}")))?;
        Ok(Self(key))
    }

    /// Use raw key bytes directly
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Encrypt a plaintext into `nonce || ciphertext`
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&self.0)
            .map_err(|e| SecretsError::encryption(format!("Failed to create cipher: {e}")))?;

        // Generate random nonce
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| SecretsError::encryption(format!("Encryption failed: {e}")))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt a blob produced by [`MasterKey::seal`]
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() <= NONCE_SIZE {
            return Err(SecretsError::encryption("Encrypted blob is truncated"));
        }

        let cipher = Aes256Gcm::new_from_slice(&self.0)
            .map_err(|e| SecretsError::encryption(format!("Failed to create cipher: {e}")))?;

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| SecretsError::encryption(format!("Decryption failed: {e}")))
    }
}
