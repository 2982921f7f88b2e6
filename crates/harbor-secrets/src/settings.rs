//! Settings for constructing a [`SecretsManager`](crate::SecretsManager).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::crypto::SaltPolicy;
use crate::env::DEFAULT_SECRET_ENV_PREFIX;
use crate::rotation::{DEFAULT_ROTATION_INTERVAL, DEFAULT_SCAN_INTERVAL};
use crate::vault::VaultConfig;

/// Default location of the local encrypted store
pub const DEFAULT_SECRETS_PATH: &str = "instance/secrets.enc";

/// Default lifetime of cached secret values
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Backend and cache settings for secrets
#[derive(Clone)]
pub struct SecretsSettings {
    pub vault_addr: Option<String>,
    pub vault_token: Option<String>,
    pub role_id: Option<String>,
    pub secret_id: Option<String>,
    pub namespace: Option<String>,
    pub mount: String,
    pub secrets_path: PathBuf,
    /// Without a master key the local store is not configured
    pub master_key: Option<String>,
    pub salt_policy: SaltPolicy,
    pub cache_ttl: Duration,
    pub rotation_interval: Duration,
    pub rotation_scan_interval: Duration,
    pub env_prefix: String,
}

impl Default for SecretsSettings {
    fn default() -> Self {
        Self {
            vault_addr: None,
            vault_token: None,
            role_id: None,
            secret_id: None,
            namespace: None,
            mount: "secret".to_string(),
            secrets_path: PathBuf::from(DEFAULT_SECRETS_PATH),
            master_key: None,
            salt_policy: SaltPolicy::Fixed,
            cache_ttl: DEFAULT_CACHE_TTL,
            rotation_interval: DEFAULT_ROTATION_INTERVAL,
            rotation_scan_interval: DEFAULT_SCAN_INTERVAL,
            env_prefix: DEFAULT_SECRET_ENV_PREFIX.to_string(),
        }
    }
}

impl fmt::Debug for SecretsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("SecretsSettings")
            .field("vault_addr", &self.vault_addr)
            .field("vault_token", &redact(&self.vault_token))
            .field("role_id", &self.role_id)
            .field("secret_id", &redact(&self.secret_id))
            .field("namespace", &self.namespace)
            .field("mount", &self.mount)
            .field("secrets_path", &self.secrets_path)
            .field("master_key", &redact(&self.master_key))
            .field("salt_policy", &self.salt_policy)
            .field("cache_ttl", &self.cache_ttl)
            .field("rotation_interval", &self.rotation_interval)
            .field("rotation_scan_interval", &self.rotation_scan_interval)
            .field("env_prefix", &self.env_prefix)
            .finish()
    }
}

impl SecretsSettings {
    /// Read settings from the process environment.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `VAULT_ADDR` | `vault_addr` |
    /// | `VAULT_TOKEN` | `vault_token` |
    /// | `VAULT_ROLE_ID`, `VAULT_SECRET_ID` | AppRole credentials |
    /// | `VAULT_NAMESPACE` | `namespace` |
    /// | `VAULT_MOUNT` | `mount` |
    /// | `HARBOR_MASTER_KEY` | `master_key` |
    /// | `HARBOR_SECRETS_PATH` | `secrets_path` |
    /// | `HARBOR_SECRETS_SALT` | `salt_policy` (`fixed` or `sidecar`) |
    /// | `HARBOR_SECRETS_CACHE_TTL` | `cache_ttl` in seconds |
    /// | `HARBOR_SECRETS_ROTATION_INTERVAL` | `rotation_interval` in seconds |
    /// | `HARBOR_SECRETS_ENV_PREFIX` | `env_prefix` |
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut settings = Self::default();

        settings.vault_addr = get("VAULT_ADDR");
        settings.vault_token = get("VAULT_TOKEN");
        settings.role_id = get("VAULT_ROLE_ID");
        settings.secret_id = get("VAULT_SECRET_ID");
        settings.namespace = get("VAULT_NAMESPACE");
        settings.master_key = get("HARBOR_MASTER_KEY");

        if let Some(mount) = get("VAULT_MOUNT") {
            settings.mount = mount;
        }
        if let Some(path) = get("HARBOR_SECRETS_PATH") {
            settings.secrets_path = PathBuf::from(path);
        }
        if let Some(prefix) = get("HARBOR_SECRETS_ENV_PREFIX") {
            settings.env_prefix = prefix;
        }
        if let Some(policy) = get("HARBOR_SECRETS_SALT") {
            match policy.to_ascii_lowercase().as_str() {
                "fixed" => settings.salt_policy = SaltPolicy::Fixed,
                "sidecar" => settings.salt_policy = SaltPolicy::Sidecar,
                other => warn!(value = other, "Ignoring unknown HARBOR_SECRETS_SALT"),
            }
        }
        if let Some(ttl) = parse_secs(&get, "HARBOR_SECRETS_CACHE_TTL") {
            settings.cache_ttl = ttl;
        }
        if let Some(interval) = parse_secs(&get, "HARBOR_SECRETS_ROTATION_INTERVAL") {
            settings.rotation_interval = interval;
        }

        settings
    }

    /// Vault connection settings, when an address is configured
    pub fn vault_config(&self) -> Option<VaultConfig> {
        let address = self.vault_addr.as_ref()?;
        let mut config = VaultConfig::new(address.clone()).with_mount(self.mount.clone());
        config.token = self.vault_token.clone();
        config.role_id = self.role_id.clone();
        config.secret_id = self.secret_id.clone();
        config.namespace = self.namespace.clone();
        Some(config)
    }
}

fn parse_secs(get: &impl Fn(&str) -> Option<String>, name: &str) -> Option<Duration> {
    let raw = get(name)?;
    match u64::from_str(raw.trim()) {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring non-numeric duration");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = SecretsSettings::from_lookup(lookup(&[]));
        assert!(settings.vault_config().is_none());
        assert!(settings.master_key.is_none());
        assert_eq!(settings.secrets_path, PathBuf::from("instance/secrets.enc"));
        assert_eq!(settings.cache_ttl, Duration::from_secs(300));
        assert_eq!(settings.env_prefix, "SECRET_");
    }

    #[test]
    fn test_vault_and_local_from_env() {
        let settings = SecretsSettings::from_lookup(lookup(&[
            ("VAULT_ADDR", "http://vault:8200"),
            ("VAULT_ROLE_ID", "role"),
            ("VAULT_SECRET_ID", "secret"),
            ("VAULT_NAMESPACE", "team-a"),
            ("HARBOR_MASTER_KEY", "master"),
            ("HARBOR_SECRETS_SALT", "sidecar"),
            ("HARBOR_SECRETS_CACHE_TTL", "30"),
        ]));

        let vault = settings.vault_config().unwrap();
        assert_eq!(vault.address, "http://vault:8200");
        assert!(vault.has_approle());
        assert_eq!(vault.namespace.as_deref(), Some("team-a"));
        assert_eq!(vault.mount, "secret");
        assert_eq!(settings.salt_policy, SaltPolicy::Sidecar);
        assert_eq!(settings.cache_ttl, Duration::from_secs(30));
    }

    #[test]
    fn test_bad_values_fall_back() {
        let settings = SecretsSettings::from_lookup(lookup(&[
            ("HARBOR_SECRETS_CACHE_TTL", "five minutes"),
            ("HARBOR_SECRETS_SALT", "pepper"),
            ("VAULT_TOKEN", "  "),
        ]));
        assert_eq!(settings.cache_ttl, DEFAULT_CACHE_TTL);
        assert_eq!(settings.salt_policy, SaltPolicy::Fixed);
        assert!(settings.vault_token.is_none());
    }

    #[test]
    fn test_debug_redacts() {
        let settings = SecretsSettings::from_lookup(lookup(&[
            ("VAULT_TOKEN", "root-token"),
            ("HARBOR_MASTER_KEY", "very-secret-master"),
        ]));
        let debug = format!("{settings:?}");
        assert!(!debug.contains("root-token"));
        assert!(!debug.contains("very-secret-master"));
    }
}
