//! Environment variable overrides
//!
//! `HARBOR_DATABASE_POOL_SIZE=20` becomes the patch `database.pool.size = 20`.
//! The mapping is purely mechanical: an underscore always separates path
//! segments, so keys that contain underscores themselves cannot be reached
//! through the environment.

use serde_json::{Map, Number, Value};

use crate::merger::set_path;

/// Default prefix for configuration environment variables
pub const DEFAULT_ENV_PREFIX: &str = "HARBOR_";

/// Ordered list of typed `(dot.path, value)` patches taken from the environment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvOverrides {
    patches: Vec<(String, Value)>,
}

impl EnvOverrides {
    /// Scan the process environment. Variables whose name or value is not
    /// valid UTF-8 are skipped.
    pub fn from_process(prefix: &str) -> Self {
        Self::from_pairs(
            prefix,
            std::env::vars_os()
                .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?))),
        )
    }

    /// Build overrides from arbitrary `(name, value)` pairs.
    ///
    /// Patches are sorted by path so the result does not depend on the
    /// iteration order of the environment.
    pub fn from_pairs(prefix: &str, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut patches: Vec<(String, Value)> = vars
            .into_iter()
            .filter_map(|(name, raw)| {
                let rest = name.strip_prefix(prefix)?;
                let path = env_name_to_path(rest)?;
                Some((path, coerce_scalar(&raw)))
            })
            .collect();
        patches.sort_by(|a, b| a.0.cmp(&b.0));
        Self { patches }
    }

    pub fn patches(&self) -> &[(String, Value)] {
        &self.patches
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Apply all patches to an empty mapping
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for (path, value) in &self.patches {
            set_path(&mut map, path, value.clone());
        }
        map
    }
}

fn env_name_to_path(rest: &str) -> Option<String> {
    let segments: Vec<String> = rest
        .split('_')
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .collect();
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("."))
    }
}

/// Coerce a raw string into bool, integer, float or string
pub fn coerce_scalar(raw: &str) -> Value {
    let trimmed = raw.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" => return Value::Bool(true),
        "false" | "no" | "off" => return Value::Bool(false),
        _ => {}
    }

    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    }

    if let Ok(float) = trimmed.parse::<f64>()
        && let Some(number) = Number::from_f64(float)
        && float.is_finite()
    {
        return Value::Number(number);
    }

    Value::String(raw.to_string())
}
