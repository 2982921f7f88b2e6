//! Backend trait shared by Vault, the local store and the environment.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::types::{SecretMetadata, SecretSource};

/// Reachability summary for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub backend: SecretSource,
    pub available: bool,
    pub writable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A secret storage mechanism.
///
/// Implementations must not log secret values.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Which layer of the chain this backend is
    fn kind(&self) -> SecretSource;

    /// Fetch a value; `Ok(None)` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key; `Ok(false)` when it did not exist
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Keys under `prefix` (empty for all)
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn metadata(&self, _key: &str) -> Result<Option<SecretMetadata>> {
        Ok(None)
    }

    async fn status(&self) -> BackendStatus {
        BackendStatus {
            backend: self.kind(),
            available: true,
            writable: true,
            detail: None,
        }
    }
}
