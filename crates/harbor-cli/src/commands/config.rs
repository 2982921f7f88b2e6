use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use harbor_config::merger::set_path;
use harbor_config::sources::{coerce_scalar, parse_file};
use harbor_config::{
    ConfigError, ConfigManager, ConfigManagerOptions, ExportFormat, create_default_configs,
};
use serde_json::{Map, Value};
use tracing::warn;

use crate::cli::OutputFormat;
use crate::observability::apply_logging_level;
use crate::output::{display_scalar, print_success, print_table, print_value, print_warning, yes_no};

/// Load the standard layers without failing on validation errors, so the
/// inspection commands still work against a broken configuration.
pub fn open(config_dir: &Path, environment: &str) -> Arc<ConfigManager> {
    let manager = ConfigManager::new(ConfigManagerOptions::default()).with_config_dir(config_dir);
    manager.add_standard_sources(environment);
    manager.load_environment_variables();
    if let Err(e) = manager.reload_configuration(None) {
        warn!(error = %e, "Configuration loaded with errors");
    }
    Arc::new(manager)
}

pub fn status(manager: &ConfigManager, format: OutputFormat) -> Result<()> {
    let status = manager.get_status();
    if !matches!(format, OutputFormat::Table) {
        return print_value(&status, format);
    }

    let dir = status
        .config_dir
        .as_deref()
        .map(|d| d.display().to_string())
        .unwrap_or_else(|| "(none)".to_string());
    println!("{}: {}", "Config dir".cyan(), dir);
    println!("{}: {}", "Valid".cyan(), yes_no(status.settings_valid));
    println!("{}: {}", "Env overrides".cyan(), status.env_overrides);
    if let Some(last) = &status.last_reload {
        println!(
            "{}: {} ({}) at {}",
            "Last reload".cyan(),
            last.outcome,
            last.trigger,
            last.at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        if let Some(error) = &last.error {
            println!("  {}", error.red());
        }
    }

    let rows = status.sources.iter().map(|s| {
        [
            s.name.clone(),
            s.priority.to_string(),
            s.path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
            s.keys.to_string(),
            match &s.error {
                Some(e) => format!("{} {e}", yes_no(false)),
                None => yes_no(s.is_valid),
            },
        ]
    });
    print_table(["Source", "Priority", "Path", "Keys", "Valid"], rows);
    Ok(())
}

pub fn get(manager: &ConfigManager, key: &str, default: Option<&str>, format: OutputFormat) -> Result<()> {
    let value = match manager.lookup(key) {
        Some(value) => value,
        None => match default {
            Some(raw) => coerce_scalar(raw),
            None => anyhow::bail!("Key not found: {key}"),
        },
    };
    match (&value, format) {
        (Value::Object(_) | Value::Array(_), _) | (_, OutputFormat::Json | OutputFormat::Yaml) => {
            print_value(&value, format)
        }
        _ => {
            println!("{}", display_scalar(&value));
            Ok(())
        }
    }
}

/// Write `key` into `local.yaml` and check the result validates
pub fn set(manager: &ConfigManager, key: &str, raw: &str) -> Result<()> {
    let dir = manager
        .config_dir()
        .context("No config directory configured")?;
    let local = dir.join("local.yaml");

    let mut data = parse_file(&local)
        .with_context(|| format!("Failed to read {}", local.display()))?
        .data;
    let value = coerce_scalar(raw);
    set_path(&mut data, key, value.clone());

    std::fs::create_dir_all(dir)?;
    let yaml = serde_yaml::to_string(&Value::Object(data))?;
    std::fs::write(&local, yaml).with_context(|| format!("Failed to write {}", local.display()))?;

    match manager.reload_configuration(Some(&local)) {
        Ok(()) => {
            print_success(&format!("Set {key} = {} in {}", display_scalar(&value), local.display()));
            Ok(())
        }
        Err(ConfigError::Validation(e)) => {
            print_warning(&format!("Written, but the configuration no longer validates: {e}"));
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub fn export(
    manager: &ConfigManager,
    format: OutputFormat,
    include_sensitive: bool,
    output: Option<&Path>,
) -> Result<()> {
    let export_format = match format {
        OutputFormat::Json => ExportFormat::Json,
        _ => ExportFormat::Yaml,
    };
    let text = manager.export_config(export_format, include_sensitive)?;
    match output {
        Some(path) => {
            std::fs::write(path, &text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            print_success(&format!("Exported configuration to {}", path.display()));
        }
        None => print!("{text}"),
    }
    if include_sensitive {
        print_warning("Export includes sensitive values");
    }
    Ok(())
}

pub fn validate(manager: &ConfigManager) -> Result<()> {
    let merged = manager.merge_configurations();
    match manager.validate_configuration(&merged) {
        Ok(settings) => {
            print_success(&format!(
                "Configuration is valid ({} environment)",
                settings.app.environment
            ));
            Ok(())
        }
        Err(e) => {
            let rows = e
                .errors
                .iter()
                .map(|f| [f.field.clone(), f.message.clone()]);
            print_table(["Field", "Problem"], rows);
            anyhow::bail!("Configuration is invalid ({} problems)", e.errors.len())
        }
    }
}

pub fn search(manager: &ConfigManager, query: &str, format: OutputFormat) -> Result<()> {
    let hits = manager.search(query);
    if !matches!(format, OutputFormat::Table) {
        let map: Map<String, Value> = hits.into_iter().collect();
        return print_value(&map, format);
    }
    let rows = hits.iter().map(|(path, value)| [path.clone(), display_scalar(value)]);
    print_table(["Key", "Value"], rows);
    Ok(())
}

pub fn defaults(manager: &ConfigManager, format: OutputFormat) -> Result<()> {
    let defaults = Value::Object(manager.default_configuration());
    match format {
        OutputFormat::Json => print_value(&defaults, format),
        _ => print_value(&defaults, OutputFormat::Yaml),
    }
}

pub fn init(config_dir: &Path, environment: &str) -> Result<()> {
    let written = create_default_configs(config_dir, environment)?;
    if written.is_empty() {
        println!("Nothing to do: configuration files already exist in {}", config_dir.display());
    }
    for path in written {
        print_success(&format!("Created {}", path.display()));
    }
    Ok(())
}

/// Watch until Ctrl-C, applying `logging.level` on every reload
pub async fn watch(manager: Arc<ConfigManager>) -> Result<()> {
    if let Some(settings) = manager.settings() {
        apply_logging_level(&settings.logging.level);
    }

    manager.register_reload_callback(Arc::new(|merged: &Map<String, Value>| -> anyhow::Result<()> {
        if let Some(Value::String(level)) = merged.get("logging").and_then(|l| l.get("level")) {
            apply_logging_level(level);
        }
        println!(
            "{} configuration reloaded ({} top-level keys)",
            "↻".cyan(),
            merged.len()
        );
        Ok(())
    }));

    manager.start_file_watching()?;
    let status = manager.get_status();
    for dir in &status.watched_dirs {
        println!("{} {}", "Watching".cyan(), dir.display());
    }
    println!("Press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    manager.stop_file_watching();
    print_success("Stopped watching");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_persists_to_local_yaml() {
        let dir = TempDir::new().unwrap();
        create_default_configs(dir.path(), "development").unwrap();
        let manager = open(dir.path(), "development");

        set(&manager, "database.pool_size", "25").unwrap();

        let local = parse_file(&dir.path().join("local.yaml")).unwrap().data;
        assert_eq!(local["database"]["pool_size"], serde_json::json!(25));
        assert_eq!(manager.lookup("database.pool_size"), Some(serde_json::json!(25)));
    }

    #[test]
    fn test_open_tolerates_invalid_configuration() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("app.yaml"), "app:\n  name: demo\n").unwrap();

        let manager = open(dir.path(), "production");
        assert!(manager.settings().is_none());
        assert!(validate(&manager).is_err());
        assert_eq!(manager.lookup("app.name"), Some(serde_json::json!("demo")));
    }
}
