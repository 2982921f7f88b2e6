//! Reload triggers and outcomes

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// What caused a reload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "detail")]
pub enum ReloadTrigger {
    /// Initial load or explicit call without a path
    Manual,
    /// A watched file changed
    File(PathBuf),
    /// A runtime override was written
    Runtime(String),
}

impl std::fmt::Display for ReloadTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::File(path) => write!(f, "file:{}", path.display()),
            Self::Runtime(key) => write!(f, "runtime:{key}"),
        }
    }
}

/// Result of a reload attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadOutcome {
    Applied,
    /// Merge ran but validation rejected it
    Rejected,
}

impl std::fmt::Display for ReloadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Record of the most recent reload, kept for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct ReloadRecord {
    pub trigger: ReloadTrigger,
    pub outcome: ReloadOutcome,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReloadRecord {
    pub fn applied(trigger: ReloadTrigger) -> Self {
        Self {
            trigger,
            outcome: ReloadOutcome::Applied,
            at: Utc::now(),
            error: None,
        }
    }

    pub fn rejected(trigger: ReloadTrigger, error: impl Into<String>) -> Self {
        Self {
            trigger,
            outcome: ReloadOutcome::Rejected,
            at: Utc::now(),
            error: Some(error.into()),
        }
    }
}
