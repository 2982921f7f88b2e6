use crate::cli::OutputFormat;
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;

/// Print a serializable value as JSON or YAML. `Table` falls back to
/// key/value rows for flat objects and pretty JSON otherwise.
pub fn print_value<T: Serialize>(value: &T, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        OutputFormat::Table => {
            let json = serde_json::to_value(value)?;
            match &json {
                Value::Object(map) if map.values().all(|v| !v.is_object() && !v.is_array()) => {
                    let rows = map.iter().map(|(k, v)| [k.clone(), display_scalar(v)]);
                    print_table(["Key", "Value"], rows);
                }
                _ => println!("{}", serde_json::to_string_pretty(&json)?),
            }
        }
    }
    Ok(())
}

pub fn print_table<const N: usize>(
    header: [&str; N],
    rows: impl IntoIterator<Item = [String; N]>,
) {
    let mut builder = Builder::default();
    builder.push_record(header);
    let mut empty = true;
    for row in rows {
        empty = false;
        builder.push_record(row);
    }
    if empty {
        println!("{}", "(none)".dimmed());
        return;
    }
    println!("{}", builder.build().with(Style::rounded()));
}

/// Scalar rendering without JSON quotes around strings
pub fn display_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "!".yellow(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn yes_no(flag: bool) -> String {
    if flag {
        "yes".green().to_string()
    } else {
        "no".red().to_string()
    }
}

/// First and last two characters of a secret, the rest masked
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 6 {
        return "*".repeat(chars.len().max(4));
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 4))
}
