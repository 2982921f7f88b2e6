//! Configuration merging with priority ordering
//!
//! Priority order (lowest to highest):
//! 1. File sources, ordered by their numeric priority
//!    (`app.yaml` 100, `<environment>.yaml` 200, `local.yaml` 300)
//! 2. Runtime overrides written through `ConfigManager::set` (1000)
//! 3. Environment variables - `HARBOR_*` pattern, always last

use serde_json::{Map, Value};

use crate::sources::{ConfigSource, EnvOverrides};

/// Marker written in place of sensitive values on export
pub const REDACTED: &str = "***REDACTED***";

const SENSITIVE_MARKERS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "private_key",
    "privatekey",
    "credential",
];

/// Fold all valid sources and the environment layer into one mapping.
///
/// `sources` may be in any order; they are applied lowest priority first so
/// the result does not depend on registration order. Sources with equal
/// priority are applied by name to keep the fold deterministic.
pub fn merge_sources(sources: &[ConfigSource], env: &EnvOverrides) -> Map<String, Value> {
    let mut ordered: Vec<&ConfigSource> = sources.iter().filter(|s| s.is_valid).collect();
    ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));

    let mut merged = Value::Object(Map::new());
    for source in ordered {
        deep_merge(&mut merged, Value::Object(source.data.clone()));
    }
    deep_merge(&mut merged, Value::Object(env.to_map()));

    match merged {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Deep merge two JSON values (right takes precedence for conflicts)
pub fn deep_merge(left: &mut Value, right: Value) {
    match (left, right) {
        (Value::Object(left_map), Value::Object(right_map)) => {
            for (key, right_value) in right_map {
                if let Some(left_value) = left_map.get_mut(&key) {
                    deep_merge(left_value, right_value);
                } else {
                    left_map.insert(key, right_value);
                }
            }
        }
        (left, right) => {
            *left = right;
        }
    }
}

/// Walk a mapping by dot-separated segments.
///
/// Returns `None` on a missing segment or when an intermediate value is not
/// a mapping.
pub fn get_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = root.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Write `value` at a dot-separated path, creating intermediate mappings.
///
/// A non-mapping value in the way of the path is replaced by a mapping.
pub fn set_path(root: &mut Map<String, Value>, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = root;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(map) = entry else {
            return;
        };
        current = map;
    }
    current.insert(last.to_string(), value);
}

/// Check if a key name marks a sensitive value
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Replace the value of every sensitive key with [`REDACTED`], at any depth.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| {
                    let v = if is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact(v)
                    };
                    (key.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

/// Flatten a mapping into `(dot.path, leaf)` pairs, depth first.
pub fn flatten(root: &Map<String, Value>) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    for (key, value) in root {
        flatten_into(key.clone(), value, &mut out);
    }
    out
}

fn flatten_into(prefix: String, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, v) in map {
                flatten_into(format!("{prefix}.{key}"), v, out);
            }
        }
        other => out.push((prefix, other.clone())),
    }
}
