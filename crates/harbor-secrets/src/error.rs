//! Error types for secrets operations.

use thiserror::Error;

/// Result type for secrets operations.
pub type Result<T> = std::result::Result<T, SecretsError>;

/// Errors that can occur while reading, writing or rotating secrets.
///
/// Messages never contain secret values.
#[derive(Error, Debug)]
pub enum SecretsError {
    /// The backend is not configured or cannot currently serve requests.
    #[error("Secret backend '{backend}' unavailable: {message}")]
    BackendUnavailable { backend: String, message: String },

    /// Login or token renewal was rejected.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Transport failure or unexpected HTTP status from a remote backend.
    #[error("HTTP request failed: {message}")]
    Http { status: Option<u16>, message: String },

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Rotation failed for secret '{key}': {reason}")]
    Rotation { key: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid secret key: {key} - {reason}")]
    InvalidKey { key: String, reason: String },
}

impl SecretsError {
    pub fn backend_unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    pub fn http(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn encryption(message: impl Into<String>) -> Self {
        Self::Encryption(message.into())
    }

    pub fn rotation(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rotation {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// HTTP status code, when the failure came with one
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SecretsError {
    fn from(e: reqwest::Error) -> Self {
        // Drop the URL: request paths carry secret key names.
        let status = e.status().map(|s| s.as_u16());
        Self::http(status, e.without_url().to_string())
    }
}

/// Validate a secret key name.
///
/// Keys are non-empty slash-separated paths without empty, `.` or `..`
/// segments.
pub fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(SecretsError::invalid_key(key, "must not be empty"));
    }
    if key.starts_with('/') || key.ends_with('/') {
        return Err(SecretsError::invalid_key(key, "must not start or end with '/'"));
    }
    if key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        return Err(SecretsError::invalid_key(key, "contains an empty or relative path segment"));
    }
    if key.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(SecretsError::invalid_key(key, "must not contain whitespace or control characters"));
    }
    Ok(())
}
