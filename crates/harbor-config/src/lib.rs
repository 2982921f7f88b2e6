//! Hierarchical configuration management for Harbor
//!
//! This crate provides the configuration half of the Harbor core:
//! - Loads prioritized sources (YAML, JSON and `.env` files)
//! - Deep-merges them with environment overrides on top
//! - Validates the result against a typed schema with defaults
//! - Hot-reloads when a watched file changes
//! - Accepts runtime overrides through a synthetic highest-priority source
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        ConfigManager                             │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌───────────┐  │
//! │  │  app.yaml  │  │ <env>.yaml │  │ local.yaml │  │  runtime  │  │
//! │  └─────┬──────┘  └─────┬──────┘  └─────┬──────┘  └─────┬─────┘  │
//! │        └───────────────┴───────┬───────┴───────────────┘        │
//! │                                │      ◄── HARBOR_* overrides     │
//! │                          ┌─────▼─────┐                           │
//! │                          │  Merger   │──► Schema ──► ArcSwap     │
//! │                          └─────▲─────┘                           │
//! │                                │                                 │
//! │               FileChangeWatcher ─► reload queue ─► worker        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod events;
pub mod manager;
pub mod merger;
pub mod schema;
pub mod sources;
pub mod watcher;

// Re-export main types
pub use events::{ReloadOutcome, ReloadRecord, ReloadTrigger};
pub use manager::{
    ConfigManager, ConfigManagerOptions, ConfigStatus, ExportFormat, FailedReloadPolicy,
    ReloadCallback, SourceStatus, create_default_configs,
};
pub use merger::{REDACTED, is_sensitive_key};
pub use schema::{FieldError, Settings, ValidationError};
pub use sources::{ConfigSource, EnvOverrides, SourceFormat};
pub use watcher::FileChangeWatcher;

/// Error types for configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Unknown config source: {0}")]
    UnknownSource(String),

    #[error("Failed to load source '{source_name}': {message}")]
    SourceLoad {
        source_name: String,
        message: String,
    },
}

impl ConfigError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn watcher(msg: impl Into<String>) -> Self {
        Self::Watcher(msg.into())
    }

    pub fn serialize(msg: impl Into<String>) -> Self {
        Self::Serialize(msg.into())
    }

    pub fn source_load(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceLoad {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Returns the validation details when this is a schema failure
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(v) => Some(v),
            _ => None,
        }
    }
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
