//! Secrets management for Harbor
//!
//! Secrets are looked up through a prioritized fallback chain:
//!
//! 1. In-memory TTL cache
//! 2. HashiCorp Vault (KV v2 over HTTP)
//! 3. Local AES-256-GCM encrypted store
//! 4. Process environment (`SECRET_<KEY>`)
//!
//! A higher layer failing is logged and reported in [`SecretResolution`],
//! then the next layer is tried. Writes go to Vault or the local store, and
//! a background task rotates scheduled secrets.

pub mod backend;
pub mod crypto;
pub mod env;
pub mod error;
pub mod local;
pub mod manager;
pub mod rotation;
pub mod settings;
pub mod types;
pub mod vault;

pub use backend::{BackendStatus, SecretBackend};
pub use crypto::{MasterKey, SaltPolicy};
pub use env::{EnvSecrets, env_var_name};
pub use error::{Result, SecretsError};
pub use local::LocalSecretStore;
pub use manager::{SecretsManager, SecretsManagerBuilder, SecretsStatus};
pub use rotation::{RotationReport, ScheduledRotation, generate_secret_value};
pub use settings::SecretsSettings;
pub use types::{BackendFailure, BackendSelection, SecretMetadata, SecretResolution, SecretSource};
pub use vault::{TokenStatus, VaultBackend, VaultConfig, VaultHealth};
