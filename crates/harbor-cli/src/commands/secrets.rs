use std::io::{self, Read};

use anyhow::{Context, Result};
use colored::Colorize;
use harbor_secrets::{BackendSelection, SecretsManager, SecretsSettings};

use crate::cli::OutputFormat;
use crate::output::{mask, print_success, print_table, print_value, print_warning, yes_no};

pub fn open() -> Result<SecretsManager> {
    let settings = SecretsSettings::from_env();
    SecretsManager::from_settings(&settings).context("Failed to initialise secret backends")
}

pub async fn status(manager: &SecretsManager, format: OutputFormat) -> Result<()> {
    let status = manager.get_status().await;
    if !matches!(format, OutputFormat::Table) {
        return print_value(&status, format);
    }

    let rows = status.backends.iter().map(|b| {
        [
            b.backend.to_string(),
            yes_no(b.available),
            yes_no(b.writable),
            b.detail.clone().unwrap_or_default(),
        ]
    });
    print_table(["Backend", "Available", "Writable", "Detail"], rows);
    println!(
        "{}: {} entries, ttl {}s",
        "Cache".cyan(),
        status.cache_entries,
        status.cache_ttl_secs
    );
    Ok(())
}

pub async fn get(manager: &SecretsManager, key: &str, reveal: bool, format: OutputFormat) -> Result<()> {
    let resolution = manager.resolve_secret(key, true).await?;
    for failure in &resolution.failures {
        print_warning(&format!("{} backend failed: {}", failure.backend, failure.error));
    }

    let Some(value) = resolution.value.as_deref() else {
        anyhow::bail!("Secret not found: {key}");
    };
    let shown = if reveal { value.to_string() } else { mask(value) };
    let source = resolution
        .source
        .map(|s| s.to_string())
        .unwrap_or_default();

    match format {
        OutputFormat::Table => println!("{shown} {}", format!("({source})").dimmed()),
        _ => print_value(
            &serde_json::json!({ "key": key, "value": shown, "source": source }),
            format,
        )?,
    }
    Ok(())
}

pub async fn put(
    manager: &SecretsManager,
    key: &str,
    value: Option<&str>,
    backend: BackendSelection,
) -> Result<()> {
    let value = match value {
        Some(v) => v.to_string(),
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read from stdin")?;
            buf.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if value.is_empty() {
        anyhow::bail!("Refusing to store an empty secret");
    }

    let source = manager.put_secret(key, &value, backend).await?;
    print_success(&format!("Stored {key} in {source}"));
    Ok(())
}

pub async fn delete(manager: &SecretsManager, key: &str, backend: BackendSelection) -> Result<()> {
    let deleted = manager.delete_secret(key, backend).await?;
    if deleted.is_empty() {
        print_warning(&format!("{key} was not present"));
    } else {
        let from: Vec<String> = deleted.iter().map(|s| s.to_string()).collect();
        print_success(&format!("Deleted {key} from {}", from.join(", ")));
    }
    Ok(())
}

pub async fn list(manager: &SecretsManager, backend: BackendSelection, format: OutputFormat) -> Result<()> {
    let keys = manager.list_secrets(backend).await?;
    match format {
        OutputFormat::Table => print_table(["Key"], keys.into_iter().map(|k| [k])),
        _ => print_value(&keys, format)?,
    }
    Ok(())
}

pub async fn rotate(manager: &SecretsManager, key: &str, reveal: bool) -> Result<()> {
    let value = manager.rotate_secret(key).await?;
    let shown = if reveal { value } else { mask(&value) };
    print_success(&format!("Rotated {key}: {shown}"));
    Ok(())
}

pub fn clear_cache(manager: &SecretsManager) {
    let count = manager.clear_cache();
    print_success(&format!("Cleared {count} cached secrets"));
}
