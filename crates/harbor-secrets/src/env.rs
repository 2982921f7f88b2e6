//! Environment variable fallback.
//!
//! The last layer of the chain. Read-only: `database/password` is looked up
//! as `SECRET_DATABASE_PASSWORD`.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::backend::{BackendStatus, SecretBackend};
use crate::error::{Result, SecretsError};
use crate::types::SecretSource;

/// Default prefix of secret environment variables
pub const DEFAULT_SECRET_ENV_PREFIX: &str = "SECRET_";

/// Environment variable name for a secret key with the default prefix
pub fn env_var_name(key: &str) -> String {
    env_var_name_with_prefix(DEFAULT_SECRET_ENV_PREFIX, key)
}

pub fn env_var_name_with_prefix(prefix: &str, key: &str) -> String {
    format!("{prefix}{}", key.to_uppercase().replace('/', "_"))
}

#[derive(Debug, Clone)]
enum Lookup {
    Process,
    Fixed(HashMap<String, String>),
}

/// Read-only secret backend over environment variables
#[derive(Debug, Clone)]
pub struct EnvSecrets {
    prefix: String,
    lookup: Lookup,
}

impl Default for EnvSecrets {
    fn default() -> Self {
        Self::from_process(DEFAULT_SECRET_ENV_PREFIX)
    }
}

impl EnvSecrets {
    /// Read from the process environment
    pub fn from_process(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            lookup: Lookup::Process,
        }
    }

    /// Read from a fixed set of variables instead of the process environment
    pub fn from_vars(
        prefix: impl Into<String>,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            lookup: Lookup::Fixed(vars.into_iter().collect()),
        }
    }

    pub fn var_name(&self, key: &str) -> String {
        env_var_name_with_prefix(&self.prefix, key)
    }

    fn read(&self, name: &str) -> Option<String> {
        match &self.lookup {
            Lookup::Process => std::env::var(name).ok(),
            Lookup::Fixed(vars) => vars.get(name).cloned(),
        }
    }

    fn names(&self) -> Vec<String> {
        match &self.lookup {
            Lookup::Process => std::env::vars_os()
                .filter_map(|(name, _)| name.into_string().ok())
                .collect(),
            Lookup::Fixed(vars) => vars.keys().cloned().collect(),
        }
    }

    fn read_only(&self) -> SecretsError {
        SecretsError::backend_unavailable("env", "environment backend is read-only")
    }
}

#[async_trait]
impl SecretBackend for EnvSecrets {
    fn kind(&self) -> SecretSource {
        SecretSource::Env
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read(&self.var_name(key)))
    }

    async fn put(&self, _key: &str, _value: &str) -> Result<()> {
        Err(self.read_only())
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Err(self.read_only())
    }

    /// Lowercased variable names after the prefix. The `/` to `_` mapping
    /// is lossy, so these are not always the original key names.
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .names()
            .into_iter()
            .filter_map(|name| name.strip_prefix(&self.prefix).map(str::to_lowercase))
            .filter(|key| !key.is_empty() && key.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn status(&self) -> BackendStatus {
        BackendStatus {
            backend: SecretSource::Env,
            available: true,
            writable: false,
            detail: Some(format!("{}*", self.prefix)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> EnvSecrets {
        EnvSecrets::from_vars(
            DEFAULT_SECRET_ENV_PREFIX,
            [
                ("SECRET_DATABASE_PASSWORD".to_string(), "from-env".to_string()),
                ("SECRET_API_KEY".to_string(), "k".to_string()),
                ("PATH".to_string(), "/usr/bin".to_string()),
            ],
        )
    }

    #[test]
    fn test_var_name() {
        assert_eq!(env_var_name("database/password"), "SECRET_DATABASE_PASSWORD");
        assert_eq!(env_var_name("api_key"), "SECRET_API_KEY");
    }

    #[tokio::test]
    async fn test_get() {
        let env = backend();
        assert_eq!(
            env.get("database/password").await.unwrap().as_deref(),
            Some("from-env")
        );
        assert_eq!(env.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_is_read_only() {
        let env = backend();
        assert!(matches!(
            env.put("k", "v").await,
            Err(SecretsError::BackendUnavailable { .. })
        ));
        assert!(env.delete("k").await.is_err());
        assert!(!env.status().await.writable);
    }

    #[tokio::test]
    async fn test_list() {
        let env = backend();
        assert_eq!(
            env.list("").await.unwrap(),
            vec!["api_key", "database_password"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_listing_skips_non_utf8_variables() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        // SAFETY: the names are unique to this test
        unsafe {
            std::env::set_var("SECRETTEST_BAD", OsStr::from_bytes(b"\xff\xfe"));
            std::env::set_var("SECRETTEST_GOOD", "ok");
        }

        let backend = EnvSecrets::from_process("SECRETTEST_");
        assert_eq!(backend.list("").await.unwrap(), vec!["bad", "good"]);
        assert_eq!(backend.get("good").await.unwrap().as_deref(), Some("ok"));
        assert_eq!(backend.get("bad").await.unwrap(), None);
    }
}
