//! Typed configuration schema
//!
//! The merged mapping is deserialized into [`Settings`], which supplies
//! defaults for every known section and keeps unknown keys untouched (at the
//! top level and inside each section) so newer config files keep working
//! with older binaries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Minimum accepted length for `security.secret_key`
pub const MIN_SECRET_KEY_LEN: usize = 32;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Validated, typed view of the merged configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub email: EmailSettings,
    #[serde(default)]
    pub uploads: UploadSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Feature flags by name
    #[serde(default = "default_features")]
    pub features: BTreeMap<String, bool>,
    /// Top-level keys the schema does not know about
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_app_version")]
    pub version: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_app_name() -> String {
    "Harbor".into()
}
fn default_app_version() -> String {
    "1.0.0".into()
}
fn default_environment() -> String {
    "development".into()
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    5000
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
            environment: default_environment(),
            debug: false,
            host: default_host(),
            port: default_port(),
            extra: Map::new(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct SecuritySettings {
    /// Required; no default
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default = "default_session_timeout")]
    pub session_timeout_minutes: u32,
    #[serde(default = "default_password_min_length")]
    pub password_min_length: u32,
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,
    #[serde(default = "default_true")]
    pub csrf_enabled: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_session_timeout() -> u32 {
    60
}
fn default_password_min_length() -> u32 {
    8
}
fn default_max_login_attempts() -> u32 {
    5
}
fn default_true() -> bool {
    true
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            secret_key: None,
            session_timeout_minutes: default_session_timeout(),
            password_min_length: default_password_min_length(),
            max_login_attempts: default_max_login_attempts(),
            csrf_enabled: true,
            extra: Map::new(),
        }
    }
}

impl fmt::Debug for SecuritySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecuritySettings")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("session_timeout_minutes", &self.session_timeout_minutes)
            .field("password_min_length", &self.password_min_length)
            .field("max_login_attempts", &self.max_login_attempts)
            .field("csrf_enabled", &self.csrf_enabled)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout_secs: u64,
    #[serde(default)]
    pub echo: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_database_url() -> String {
    "sqlite:///instance/app.db".into()
}
fn default_pool_size() -> u32 {
    10
}
fn default_pool_timeout() -> u64 {
    30
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_size: default_pool_size(),
            pool_timeout_secs: default_pool_timeout(),
            echo: false,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailSettings {
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default = "default_true")]
    pub use_tls: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_sender")]
    pub default_sender: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_smtp_host() -> String {
    "localhost".into()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_sender() -> String {
    "noreply@localhost".into()
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            use_tls: true,
            username: None,
            password: None,
            default_sender: default_sender(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadSettings {
    #[serde(default = "default_max_file_size")]
    pub max_file_size_mb: u32,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_max_file_size() -> u32 {
    16
}
fn default_allowed_extensions() -> Vec<String> {
    ["pdf", "png", "jpg", "jpeg", "docx", "xlsx"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_upload_dir() -> String {
    "uploads".into()
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size(),
            allowed_extensions: default_allowed_extensions(),
            upload_dir: default_upload_dir(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
            extra: Map::new(),
        }
    }
}

fn default_features() -> BTreeMap<String, bool> {
    [
        ("registration", true),
        ("email_notifications", true),
        ("audit_logging", true),
        ("maintenance_mode", false),
    ]
    .into_iter()
    .map(|(name, on)| (name.to_string(), on))
    .collect()
}

/// A single offending field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Schema validation failure listing every offending field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuration validation failed: ")?;
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", e.field, e.message)?;
        }
        Ok(())
    }
}

impl ValidationError {
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(|e| e.field.as_str())
    }
}

impl Settings {
    /// Schema defaults as a mapping (no secret key)
    pub fn defaults() -> Map<String, Value> {
        let settings = Settings {
            app: AppSettings::default(),
            security: SecuritySettings::default(),
            database: DatabaseSettings::default(),
            email: EmailSettings::default(),
            uploads: UploadSettings::default(),
            logging: LoggingSettings::default(),
            features: default_features(),
            extra: Map::new(),
        };
        settings.to_map()
    }

    /// Deserialize and check the merged mapping.
    ///
    /// Every problem found is reported, not just the first.
    pub fn validate(merged: &Map<String, Value>) -> Result<Settings, ValidationError> {
        let mut errors = Vec::new();

        // Type errors are reported per section so one bad section does not
        // hide problems in the others.
        for section in ["app", "security", "database", "email", "uploads", "logging", "features"] {
            if let Some(value) = merged.get(section)
                && let Err(e) = check_section(section, value)
            {
                errors.push(FieldError::new(section, e));
            }
        }
        if !errors.is_empty() {
            return Err(ValidationError { errors });
        }

        let settings: Settings = serde_json::from_value(Value::Object(merged.clone()))
            .map_err(|e| ValidationError {
                errors: vec![FieldError::new("<root>", e.to_string())],
            })?;

        settings.check(&mut errors);
        if errors.is_empty() {
            Ok(settings)
        } else {
            Err(ValidationError { errors })
        }
    }

    fn check(&self, errors: &mut Vec<FieldError>) {
        match self.security.secret_key.as_deref() {
            None => errors.push(FieldError::new("security.secret_key", "is required")),
            Some(key) if key.chars().count() < MIN_SECRET_KEY_LEN => errors.push(FieldError::new(
                "security.secret_key",
                format!("must be at least {MIN_SECRET_KEY_LEN} characters"),
            )),
            Some(_) => {}
        }
        if self.app.port == 0 {
            errors.push(FieldError::new("app.port", "must be > 0"));
        }
        if self.app.name.trim().is_empty() {
            errors.push(FieldError::new("app.name", "must not be empty"));
        }
        if self.security.password_min_length < 6 {
            errors.push(FieldError::new("security.password_min_length", "must be >= 6"));
        }
        if self.security.session_timeout_minutes == 0 {
            errors.push(FieldError::new("security.session_timeout_minutes", "must be > 0"));
        }
        if self.database.url.trim().is_empty() {
            errors.push(FieldError::new("database.url", "must not be empty"));
        }
        if self.database.pool_size == 0 {
            errors.push(FieldError::new("database.pool_size", "must be > 0"));
        }
        if self.email.smtp_port == 0 {
            errors.push(FieldError::new("email.smtp_port", "must be > 0"));
        }
        if self.uploads.max_file_size_mb == 0 {
            errors.push(FieldError::new("uploads.max_file_size_mb", "must be > 0"));
        }
        let level = self.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            errors.push(FieldError::new(
                "logging.level",
                format!("must be one of {LOG_LEVELS:?}"),
            ));
        }
    }

    /// Serialize back to a mapping, defaults filled in
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn is_feature_enabled(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }
}

fn check_section(section: &str, value: &Value) -> Result<(), String> {
    let result = match section {
        "app" => serde_json::from_value::<AppSettings>(value.clone()).map(|_| ()),
        "security" => serde_json::from_value::<SecuritySettings>(value.clone()).map(|_| ()),
        "database" => serde_json::from_value::<DatabaseSettings>(value.clone()).map(|_| ()),
        "email" => serde_json::from_value::<EmailSettings>(value.clone()).map(|_| ()),
        "uploads" => serde_json::from_value::<UploadSettings>(value.clone()).map(|_| ()),
        "logging" => serde_json::from_value::<LoggingSettings>(value.clone()).map(|_| ()),
        "features" => serde_json::from_value::<BTreeMap<String, bool>>(value.clone()).map(|_| ()),
        _ => Ok(()),
    };
    result.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let settings = Settings::validate(&map(json!({ "security": { "secret_key": KEY } }))).unwrap();

        assert_eq!(settings.app.port, 5000);
        assert_eq!(settings.database.pool_size, 10);
        assert_eq!(settings.logging.level, "info");
        assert!(settings.is_feature_enabled("registration"));
        assert!(!settings.is_feature_enabled("unknown"));
    }

    #[test]
    fn test_unknown_keys_are_preserved() {
        let merged = map(json!({
            "security": { "secret_key": KEY, "hsts": true },
            "port": 8080,
            "reports": { "page_size": 25 }
        }));

        let settings = Settings::validate(&merged).unwrap();
        let out = settings.to_map();

        assert_eq!(out["port"], 8080);
        assert_eq!(out["reports"], json!({ "page_size": 25 }));
        assert_eq!(out["security"]["hsts"], json!(true));
        assert_eq!(out["app"]["name"], "Harbor");
    }

    #[test]
    fn test_missing_secret_key() {
        let err = Settings::validate(&Map::new()).unwrap_err();
        assert_eq!(err.fields().collect::<Vec<_>>(), vec!["security.secret_key"]);
    }

    #[test]
    fn test_every_offending_field_is_listed() {
        let merged = map(json!({
            "security": { "secret_key": "short" },
            "database": { "pool_size": 0 },
            "logging": { "level": "loud" }
        }));

        let err = Settings::validate(&merged).unwrap_err();
        let fields: Vec<&str> = err.fields().collect();
        assert_eq!(
            fields,
            vec!["security.secret_key", "database.pool_size", "logging.level"]
        );
        assert!(err.to_string().contains("at least 32"));
    }

    #[test]
    fn test_type_errors_reported_per_section() {
        let merged = map(json!({
            "app": { "port": "not-a-port" },
            "database": { "pool_size": "many" }
        }));

        let err = Settings::validate(&merged).unwrap_err();
        let fields: Vec<&str> = err.fields().collect();
        assert_eq!(fields, vec!["app", "database"]);
    }

    #[test]
    fn test_secret_key_not_in_debug_output() {
        let settings = Settings::validate(&map(json!({ "security": { "secret_key": KEY } }))).unwrap();
        let debug = format!("{settings:?}");
        assert!(!debug.contains(KEY));
    }

    #[test]
    fn test_defaults_mapping_has_all_sections() {
        let defaults = Settings::defaults();
        for section in ["app", "security", "database", "email", "uploads", "logging", "features"] {
            assert!(defaults.contains_key(section), "{section}");
        }
    }
}
