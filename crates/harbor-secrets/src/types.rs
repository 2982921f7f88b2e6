//! Shared secret types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SecretsError;

/// Backend a secret came from or was written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretSource {
    Vault,
    Local,
    Env,
}

impl fmt::Display for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vault => write!(f, "vault"),
            Self::Local => write!(f, "local"),
            Self::Env => write!(f, "env"),
        }
    }
}

/// Which backend(s) a write, delete or listing targets.
///
/// For writes `Auto` means Vault first, then the local store. For deletes
/// and listings it means every configured writable backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSelection {
    #[default]
    Auto,
    Vault,
    Local,
}

impl FromStr for BackendSelection {
    type Err = SecretsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" | "all" => Ok(Self::Auto),
            "vault" => Ok(Self::Vault),
            "local" => Ok(Self::Local),
            other => Err(SecretsError::backend_unavailable(other, "unknown backend")),
        }
    }
}

/// Metadata about a stored secret. Never carries the value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecretMetadata {
    pub key: String,
    /// Starts at 1, incremented on every successful put
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_count: u64,
    pub source: SecretSource,
    pub encrypted: bool,
}

impl SecretMetadata {
    pub fn new(key: impl Into<String>, source: SecretSource) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            version: 1,
            created_at: now,
            updated_at: now,
            expires_at: None,
            last_accessed: None,
            access_count: 0,
            source,
            encrypted: false,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Record a read
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed = Some(Utc::now());
    }
}

/// A backend that failed during a lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendFailure {
    pub backend: SecretSource,
    pub error: String,
}

/// Outcome of a fallback-chain lookup.
///
/// `value` is `None` when every layer missed. `failures` lists the layers
/// that errored on the way, so "absent" and "unreachable" can be told apart.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SecretResolution {
    #[serde(skip)]
    pub value: Option<String>,
    pub source: Option<SecretSource>,
    pub cached: bool,
    pub failures: Vec<BackendFailure>,
}

impl SecretResolution {
    pub fn is_found(&self) -> bool {
        self.value.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_metadata_expiry() {
        let mut meta = SecretMetadata::new("token", SecretSource::Local);
        let now = Utc::now();
        assert!(!meta.is_expired_at(now));

        meta.expires_at = Some(now - Duration::seconds(1));
        assert!(meta.is_expired_at(now));
    }

    #[test]
    fn test_touch_counts_reads() {
        let mut meta = SecretMetadata::new("token", SecretSource::Local);
        meta.touch();
        meta.touch();
        assert_eq!(meta.access_count, 2);
        assert!(meta.last_accessed.is_some());
    }

    #[test]
    fn test_selection_parsing() {
        assert_eq!("ALL".parse::<BackendSelection>().unwrap(), BackendSelection::Auto);
        assert_eq!("vault".parse::<BackendSelection>().unwrap(), BackendSelection::Vault);
        assert!("s3".parse::<BackendSelection>().is_err());
    }

    #[test]
    fn test_resolution_never_serializes_value() {
        let resolution = SecretResolution {
            value: Some("hunter2".into()),
            source: Some(SecretSource::Env),
            ..Default::default()
        };
        let json = serde_json::to_string(&resolution).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("\"env\""));
    }
}
