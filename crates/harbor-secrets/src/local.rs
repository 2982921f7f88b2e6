//! Local encrypted secret store
//!
//! All secrets and their metadata live in one JSON document that is sealed
//! with [`MasterKey`] and written to a single file. Operations work on an
//! in-memory mirror; every put and delete re-encrypts the whole document and
//! replaces the file through a temporary file and rename.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::backend::{BackendStatus, SecretBackend};
use crate::crypto::{MasterKey, SaltPolicy};
use crate::error::{Result, SecretsError, validate_key};
use crate::types::{SecretMetadata, SecretSource};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    secrets: BTreeMap<String, String>,
    #[serde(default)]
    metadata: BTreeMap<String, SecretMetadata>,
}

#[derive(Debug)]
struct StoreState {
    document: StoreDocument,
    /// Cleared when the file on disk could not be decrypted
    readable: bool,
    load_error: Option<String>,
}

/// Secret store persisted as one encrypted file
pub struct LocalSecretStore {
    path: PathBuf,
    key: MasterKey,
    state: Mutex<StoreState>,
}

impl std::fmt::Debug for LocalSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSecretStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LocalSecretStore {
    /// Open (or prepare to create) the store at `path`.
    ///
    /// A file that exists but cannot be decrypted does not fail the open:
    /// the store comes up unreadable, reads return nothing and writes are
    /// refused so the file is never overwritten with an empty document.
    pub fn open(path: impl Into<PathBuf>, master_key: &str, salt_policy: SaltPolicy) -> Result<Self> {
        let path = path.into();
        let salt = salt_policy.load_or_create(&path)?;
        let key = MasterKey::derive(master_key, &salt)?;
        Ok(Self::with_key(path, key))
    }

    /// Open with an already derived key
    pub fn with_key(path: impl Into<PathBuf>, key: MasterKey) -> Self {
        let path = path.into();
        let state = match load_document(&path, &key) {
            Ok(document) => {
                debug!(path = ?path, secrets = document.secrets.len(), "Local secret store loaded");
                StoreState {
                    document,
                    readable: true,
                    load_error: None,
                }
            }
            Err(e) => {
                error!(path = ?path, error = %e, "Local secret store is unreadable; writes disabled");
                StoreState {
                    document: StoreDocument::default(),
                    readable: false,
                    load_error: Some(e.to_string()),
                }
            }
        };

        Self {
            path,
            key,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_readable(&self) -> bool {
        self.state.lock().readable
    }

    /// Read a secret.
    ///
    /// Returns `None` once the secret's expiry has passed; the entry itself
    /// stays until it is overwritten or deleted. Access statistics are
    /// updated in memory and persisted with the next write.
    pub fn get_secret(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock();
        let StoreDocument { secrets, metadata } = &mut state.document;

        let value = secrets.get(key)?;
        if let Some(meta) = metadata.get_mut(key) {
            if meta.is_expired_at(Utc::now()) {
                debug!(key, "Local secret expired");
                return None;
            }
            meta.touch();
        }
        Some(value.clone())
    }

    /// Store a secret, optionally expiring after `ttl`.
    ///
    /// Re-putting an existing key bumps its version.
    pub fn put_secret(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        validate_key(key)?;
        let mut state = self.state.lock();
        self.ensure_writable(&state)?;

        let now = Utc::now();
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| now + ttl);

        let previous = state.document.metadata.get(key).cloned();
        let meta = match previous {
            Some(mut meta) => {
                meta.version += 1;
                meta.updated_at = now;
                meta.expires_at = expires_at;
                meta
            }
            None => SecretMetadata {
                expires_at,
                encrypted: true,
                ..SecretMetadata::new(key, SecretSource::Local)
            },
        };

        // The mirror only changes once the file has been written
        let mut next = state.document.clone();
        next.secrets.insert(key.to_string(), value.to_string());
        next.metadata.insert(key.to_string(), meta);
        self.persist(&next)?;
        state.document = next;
        debug!(key, "Local secret stored");
        Ok(())
    }

    /// Delete a secret; `Ok(false)` when it did not exist
    pub fn delete_secret(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock();
        self.ensure_writable(&state)?;

        if !state.document.secrets.contains_key(key) {
            return Ok(false);
        }

        let mut next = state.document.clone();
        next.secrets.remove(key);
        next.metadata.remove(key);
        self.persist(&next)?;
        state.document = next;
        debug!(key, "Local secret deleted");
        Ok(true)
    }

    /// Keys of live (non-expired) secrets under `prefix`, sorted
    pub fn list_secrets(&self, prefix: &str) -> Vec<String> {
        let state = self.state.lock();
        let now = Utc::now();
        state
            .document
            .secrets
            .keys()
            .filter(|key| key.starts_with(prefix))
            .filter(|key| {
                !state
                    .document
                    .metadata
                    .get(*key)
                    .is_some_and(|meta| meta.is_expired_at(now))
            })
            .cloned()
            .collect()
    }

    pub fn get_metadata(&self, key: &str) -> Option<SecretMetadata> {
        self.state.lock().document.metadata.get(key).cloned()
    }

    fn ensure_writable(&self, state: &StoreState) -> Result<()> {
        if state.readable {
            Ok(())
        } else {
            Err(SecretsError::backend_unavailable(
                "local",
                format!(
                    "store at {} could not be decrypted: {}",
                    self.path.display(),
                    state.load_error.as_deref().unwrap_or("unknown error")
                ),
            ))
        }
    }

    fn persist(&self, document: &StoreDocument) -> Result<()> {
        let plaintext = serde_json::to_vec(document)?;
        let blob = self.key.seal(&plaintext)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        std::fs::write(&tmp_path, &blob)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn load_document(path: &Path, key: &MasterKey) -> Result<StoreDocument> {
    if !path.exists() {
        info!(path = ?path, "Local secret store does not exist yet; starting empty");
        return Ok(StoreDocument::default());
    }
    let blob = std::fs::read(path)?;
    let plaintext = key.open(&blob)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

#[async_trait]
impl SecretBackend for LocalSecretStore {
    fn kind(&self) -> SecretSource {
        SecretSource::Local
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get_secret(key))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.put_secret(key, value, None)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.delete_secret(key)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self.list_secrets(prefix))
    }

    async fn metadata(&self, key: &str) -> Result<Option<SecretMetadata>> {
        Ok(self.get_metadata(key))
    }

    async fn status(&self) -> BackendStatus {
        let state = self.state.lock();
        BackendStatus {
            backend: SecretSource::Local,
            available: state.readable,
            writable: state.readable,
            detail: Some(match &state.load_error {
                Some(e) => format!("{}: {e}", self.path.display()),
                None => format!("{} ({} secrets)", self.path.display(), state.document.secrets.len()),
            }),
        }
    }
}
