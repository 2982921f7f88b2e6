//! File-based configuration sources
//!
//! Parses YAML, JSON and `.env` files into a nested mapping. The format is
//! picked from the file extension.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

use super::env::coerce_scalar;
use crate::ConfigError;
use crate::merger::set_path;

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Yaml,
    Json,
    Env,
}

impl SourceFormat {
    /// Detect the format from a file name.
    ///
    /// `.env` and `.env.*` dotfiles are treated as env files.
    pub fn from_path(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        if file_name == ".env" || file_name.starts_with(".env.") {
            return Some(Self::Env);
        }

        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            "env" => Some(Self::Env),
            _ => None,
        }
    }
}

/// Whether a path has a recognised config extension
pub fn is_config_file(path: &Path) -> bool {
    SourceFormat::from_path(path).is_some()
}

/// Parsed file plus its modification time
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub data: Map<String, Value>,
    pub modified: Option<DateTime<Utc>>,
}

/// Read and parse a configuration file.
///
/// A file that does not exist yields an empty mapping so optional layers
/// such as `local.yaml` can appear later.
pub fn parse_file(path: &Path) -> Result<LoadedFile, ConfigError> {
    let format = SourceFormat::from_path(path).ok_or_else(|| {
        ConfigError::parse(format!("Unsupported config format: {}", path.display()))
    })?;

    if !path.exists() {
        debug!("Config file does not exist: {:?}", path);
        return Ok(LoadedFile {
            data: Map::new(),
            modified: None,
        });
    }

    let content = std::fs::read_to_string(path)?;
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from);

    Ok(LoadedFile {
        data: parse_str(format, &content)?,
        modified,
    })
}

/// Parse configuration text in the given format
pub fn parse_str(format: SourceFormat, content: &str) -> Result<Map<String, Value>, ConfigError> {
    match format {
        SourceFormat::Yaml => {
            if content.trim().is_empty() {
                return Ok(Map::new());
            }
            let value: Value = serde_yaml::from_str(content)
                .map_err(|e| ConfigError::parse(format!("YAML parse error: {e}")))?;
            into_mapping(value)
        }
        SourceFormat::Json => {
            if content.trim().is_empty() {
                return Ok(Map::new());
            }
            let value: Value = serde_json::from_str(content)
                .map_err(|e| ConfigError::parse(format!("JSON parse error: {e}")))?;
            into_mapping(value)
        }
        SourceFormat::Env => parse_env(content),
    }
}

fn into_mapping(value: Value) -> Result<Map<String, Value>, ConfigError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(ConfigError::parse(format!(
            "Top-level config must be a mapping, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "mapping",
    }
}

fn parse_env(content: &str) -> Result<Map<String, Value>, ConfigError> {
    let mut data = Map::new();
    for item in dotenvy::from_read_iter(content.as_bytes()) {
        let (key, raw) = item.map_err(|e| ConfigError::parse(format!(".env parse error: {e}")))?;
        set_path(&mut data, &env_key_to_path(&key), coerce_scalar(&raw));
    }
    Ok(data)
}

/// `database.pool_size` nests on dots only; `DATABASE_HOST` nests on underscores.
fn env_key_to_path(key: &str) -> String {
    let lower = key.to_lowercase();
    if lower.contains('.') {
        lower
    } else {
        lower.replace('_', ".")
    }
}
