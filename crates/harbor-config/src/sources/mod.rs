//! Configuration sources
//!
//! This module provides the origins of configuration data:
//! - File: YAML, JSON and `.env` files on disk
//! - Runtime: in-memory overrides written through `ConfigManager::set`
//! - Environment: `HARBOR_*` variables folded on top of everything else

mod env;
mod file;

pub use env::{DEFAULT_ENV_PREFIX, EnvOverrides, coerce_scalar};
pub use file::{LoadedFile, SourceFormat, is_config_file, parse_file, parse_str};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::ConfigError;
use crate::merger::set_path;

/// Name of the synthetic source that holds runtime overrides
pub const RUNTIME_SOURCE: &str = "runtime";

/// Priority of the runtime source: above every file, below the environment
pub const RUNTIME_PRIORITY: i32 = 1000;

/// One named, prioritized layer of configuration.
///
/// A source whose last load failed keeps `is_valid = false` and the error
/// message for status reporting; the merger skips it.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub name: String,
    pub path: Option<PathBuf>,
    pub priority: i32,
    pub data: Map<String, Value>,
    pub is_valid: bool,
    pub error: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl ConfigSource {
    /// Create a source without backing file
    pub fn in_memory(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            path: None,
            priority,
            data: Map::new(),
            is_valid: true,
            error: None,
            last_modified: None,
        }
    }

    /// Create a file source and parse it immediately.
    ///
    /// Parse failures are recorded on the source instead of being returned.
    pub fn from_file(name: impl Into<String>, path: impl Into<PathBuf>, priority: i32) -> Self {
        let mut source = Self {
            path: Some(path.into()),
            ..Self::in_memory(name, priority)
        };
        let _ = source.reload();
        source
    }

    /// Re-read the backing file, if any.
    ///
    /// On failure the previous data is kept but the source is marked invalid.
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        match parse_file(&path) {
            Ok(loaded) => {
                debug!(source = %self.name, path = ?path, keys = loaded.data.len(), "Config source loaded");
                self.data = loaded.data;
                self.last_modified = loaded.modified;
                self.is_valid = true;
                self.error = None;
                Ok(())
            }
            Err(e) => {
                warn!(source = %self.name, path = ?path, error = %e, "Config source failed to load");
                self.is_valid = false;
                self.error = Some(e.to_string());
                Err(ConfigError::source_load(&self.name, e.to_string()))
            }
        }
    }

    /// Whether this source is backed by the given file
    pub fn is_backed_by(&self, path: &Path) -> bool {
        match &self.path {
            Some(own) => own == path || same_file(own, path),
            None => false,
        }
    }

    /// Write a value at a dot path into this source's data
    pub fn set(&mut self, path: &str, value: Value) {
        set_path(&mut self.data, path, value);
        self.last_modified = Some(Utc::now());
    }

    /// Number of top-level keys
    pub fn key_count(&self) -> usize {
        self.data.len()
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_invalid_file_is_kept_with_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "app: [unclosed").unwrap();

        let source = ConfigSource::from_file("broken", &path, 100);
        assert!(!source.is_valid);
        assert!(source.error.as_deref().unwrap().contains("YAML"));
    }

    #[test]
    fn test_missing_file_is_valid_and_empty() {
        let source = ConfigSource::from_file("local", "/nonexistent/local.yaml", 300);
        assert!(source.is_valid);
        assert_eq!(source.key_count(), 0);
        assert!(source.last_modified.is_none());
    }

    #[test]
    fn test_reload_recovers_after_fix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.json");
        std::fs::write(&path, "{ not json").unwrap();

        let mut source = ConfigSource::from_file("app", &path, 100);
        assert!(!source.is_valid);

        std::fs::write(&path, r#"{"app": {"name": "fixed"}}"#).unwrap();
        source.reload().unwrap();
        assert!(source.is_valid);
        assert!(source.error.is_none());
        assert_eq!(source.data["app"], json!({ "name": "fixed" }));
        assert!(source.last_modified.is_some());
    }

    #[test]
    fn test_set_writes_nested_value() {
        let mut source = ConfigSource::in_memory(RUNTIME_SOURCE, RUNTIME_PRIORITY);
        source.set("features.beta", json!(true));
        assert_eq!(source.data["features"], json!({ "beta": true }));
    }
}
