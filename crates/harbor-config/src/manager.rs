//! Configuration Manager
//!
//! Central coordinator for configuration from multiple sources.
//! Handles loading, merging, validation, hot reload and change callbacks.
//!
//! Writers (reloads and runtime `set`) are serialised by one mutex over the
//! source list. Readers never take it: the merged mapping and the typed
//! settings are published through `ArcSwap`, so `get` always sees one
//! complete snapshot.

use arc_swap::{ArcSwap, ArcSwapOption};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use rand::RngCore;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::ConfigError;
use crate::events::{ReloadRecord, ReloadTrigger};
use crate::merger::{self, flatten, get_path, redact};
use crate::schema::{Settings, ValidationError};
use crate::sources::{
    ConfigSource, DEFAULT_ENV_PREFIX, EnvOverrides, RUNTIME_PRIORITY, RUNTIME_SOURCE,
};
use crate::watcher::{DEBOUNCE_WINDOW, FileChangeWatcher};

/// Priority of the base `app.yaml` layer
pub const BASE_PRIORITY: i32 = 100;
/// Priority of the `<environment>.yaml` layer
pub const ENVIRONMENT_PRIORITY: i32 = 200;
/// Priority of the optional `local.yaml` layer
pub const LOCAL_PRIORITY: i32 = 300;

/// Called with the new merged mapping after every successful reload
pub type ReloadCallback = Arc<dyn Fn(&Map<String, Value>) -> anyhow::Result<()> + Send + Sync>;

/// What to publish when a reload fails validation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedReloadPolicy {
    /// Publish the merged mapping anyway; typed settings keep the last good value
    #[default]
    KeepAttempted,
    /// Leave both the merged mapping and the settings at the last good value
    RetainLastGood,
}

/// Output format for [`ConfigManager::export_config`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Yaml,
    Json,
}

impl FromStr for ExportFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::serialize(format!("Unsupported export format: {other}"))),
        }
    }
}

/// Tunables for a [`ConfigManager`]
#[derive(Debug, Clone)]
pub struct ConfigManagerOptions {
    /// Prefix of environment variables folded into the configuration
    pub env_prefix: String,
    /// Quiet period before a changed file is reloaded
    pub debounce: Duration,
    pub failed_reload_policy: FailedReloadPolicy,
}

impl Default for ConfigManagerOptions {
    fn default() -> Self {
        Self {
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            debounce: DEBOUNCE_WINDOW,
            failed_reload_policy: FailedReloadPolicy::default(),
        }
    }
}

/// Status of one registered source
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub path: Option<PathBuf>,
    pub priority: i32,
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub keys: usize,
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
}

/// Snapshot of the manager state for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct ConfigStatus {
    pub config_dir: Option<PathBuf>,
    /// Sources in descending priority
    pub sources: Vec<SourceStatus>,
    pub env_overrides: usize,
    pub watching: bool,
    pub watched_dirs: Vec<PathBuf>,
    pub callbacks: usize,
    pub settings_valid: bool,
    pub failed_reload_policy: FailedReloadPolicy,
    pub last_reload: Option<ReloadRecord>,
}

#[derive(Default)]
struct ManagerState {
    /// Kept sorted by descending priority
    sources: Vec<ConfigSource>,
    env: EnvOverrides,
    last_reload: Option<ReloadRecord>,
    /// Bumped on every published reload
    generation: u64,
}

impl ManagerState {
    fn insert(&mut self, source: ConfigSource) {
        self.sources.retain(|s| s.name != source.name);
        self.sources.push(source);
        self.sources
            .sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
    }
}

/// Which sources to re-read before merging
enum ReloadScope<'a> {
    All,
    Changed(&'a Path),
    MergeOnly,
}

/// Central configuration manager
pub struct ConfigManager {
    options: ConfigManagerOptions,
    config_dir: Option<PathBuf>,
    state: Mutex<ManagerState>,
    merged: ArcSwap<Map<String, Value>>,
    settings: ArcSwapOption<Settings>,
    callbacks: RwLock<Vec<ReloadCallback>>,
    /// Generation last handed to callbacks. Reentrant so a callback may
    /// itself call `set`.
    delivered: ReentrantMutex<Cell<u64>>,
    watcher: Mutex<Option<FileChangeWatcher>>,
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("config_dir", &self.config_dir)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new(ConfigManagerOptions::default())
    }
}

impl ConfigManager {
    /// Create an empty manager with no sources
    pub fn new(options: ConfigManagerOptions) -> Self {
        Self {
            options,
            config_dir: None,
            state: Mutex::new(ManagerState::default()),
            merged: ArcSwap::from_pointee(Map::new()),
            settings: ArcSwapOption::empty(),
            callbacks: RwLock::new(Vec::new()),
            delivered: ReentrantMutex::new(Cell::new(0)),
            watcher: Mutex::new(None),
        }
    }

    /// Set the directory watched in addition to the source files' parents
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    /// Build the standard layer stack under `config_dir` and load it.
    ///
    /// Registers `app.yaml` (100), `<environment>.yaml` (200) and
    /// `local.yaml` (300), reads `HARBOR_*` variables from the process
    /// environment and performs the initial reload. Missing files are
    /// empty layers, so `local.yaml` can be created later and picked up by
    /// the watcher.
    pub fn bootstrap(
        config_dir: impl Into<PathBuf>,
        environment: &str,
        options: ConfigManagerOptions,
    ) -> Result<Arc<Self>, ConfigError> {
        let config_dir = config_dir.into();
        let manager = Self::new(options).with_config_dir(&config_dir);
        manager.add_standard_sources(environment);

        let count = manager.load_environment_variables();
        debug!(count, "Loaded environment overrides");

        manager.reload_configuration(None)?;
        info!(config_dir = ?config_dir, environment, "Configuration loaded");
        Ok(Arc::new(manager))
    }

    /// Register `app.yaml`, `<environment>.yaml` and `local.yaml` from the
    /// config directory. Parse failures are logged; the sources stay
    /// registered as invalid.
    pub fn add_standard_sources(&self, environment: &str) {
        let Some(dir) = self.config_dir.clone() else {
            warn!("No config directory set; standard sources not registered");
            return;
        };
        let layers = [
            ("default".to_string(), dir.join("app.yaml"), BASE_PRIORITY),
            (
                environment.to_string(),
                dir.join(format!("{environment}.yaml")),
                ENVIRONMENT_PRIORITY,
            ),
            ("local".to_string(), dir.join("local.yaml"), LOCAL_PRIORITY),
        ];
        for (name, path, priority) in layers {
            if let Err(e) = self.add_source(name, path, priority) {
                warn!("{e}");
            }
        }
    }

    /// Register a file source, replacing any source with the same name.
    ///
    /// The file is parsed immediately. A parse failure is returned but the
    /// source stays registered as invalid and is skipped by merges until a
    /// later reload succeeds. The published configuration is not touched
    /// until the next reload.
    pub fn add_source(
        &self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        priority: i32,
    ) -> Result<(), ConfigError> {
        let source = ConfigSource::from_file(name, path, priority);
        let outcome = match &source.error {
            Some(message) => Err(ConfigError::source_load(&source.name, message.clone())),
            None => Ok(()),
        };
        info!(source = %source.name, path = ?source.path, priority, "Registered config source");
        self.state.lock().insert(source);
        outcome
    }

    /// Read prefixed variables from the process environment.
    ///
    /// Returns the number of overrides found. Takes effect on the next reload.
    pub fn load_environment_variables(&self) -> usize {
        let env = EnvOverrides::from_process(&self.options.env_prefix);
        let count = env.len();
        self.state.lock().env = env;
        count
    }

    /// Replace the environment layer with explicit `(name, value)` pairs
    pub fn load_environment_from(&self, vars: impl IntoIterator<Item = (String, String)>) -> usize {
        let env = EnvOverrides::from_pairs(&self.options.env_prefix, vars);
        let count = env.len();
        self.state.lock().env = env;
        count
    }

    /// The environment overrides currently in effect
    pub fn environment_overrides(&self) -> EnvOverrides {
        self.state.lock().env.clone()
    }

    /// Merge current sources without validating or publishing
    pub fn merge_configurations(&self) -> Map<String, Value> {
        let state = self.state.lock();
        merger::merge_sources(&state.sources, &state.env)
    }

    /// Validate a merged mapping against the schema
    pub fn validate_configuration(&self, merged: &Map<String, Value>) -> Result<Settings, ValidationError> {
        Settings::validate(merged)
    }

    /// Re-read sources, merge, validate and publish.
    ///
    /// With `Some(path)` only the sources backed by that file are re-read; a
    /// path no source is backed by is ignored. With `None` every file source
    /// is re-read.
    ///
    /// On validation failure the error is returned, callbacks are not
    /// invoked and the typed settings keep their last good value. Whether
    /// the rejected mapping is still published depends on
    /// [`FailedReloadPolicy`].
    pub fn reload_configuration(&self, changed: Option<&Path>) -> Result<(), ConfigError> {
        match changed {
            Some(path) => self.reload(ReloadTrigger::File(path.to_path_buf()), ReloadScope::Changed(path)),
            None => self.reload(ReloadTrigger::Manual, ReloadScope::All),
        }
    }

    fn reload(&self, trigger: ReloadTrigger, scope: ReloadScope<'_>) -> Result<(), ConfigError> {
        let mut state = self.state.lock();

        match scope {
            ReloadScope::All => {
                for source in state.sources.iter_mut() {
                    let _ = source.reload();
                }
            }
            ReloadScope::Changed(path) => {
                let mut matched = false;
                for source in state.sources.iter_mut().filter(|s| s.is_backed_by(path)) {
                    matched = true;
                    let _ = source.reload();
                }
                if !matched {
                    debug!(path = ?path, "Change to untracked file ignored");
                    return Ok(());
                }
            }
            ReloadScope::MergeOnly => {}
        }

        let merged = merger::merge_sources(&state.sources, &state.env);
        match Settings::validate(&merged) {
            Ok(settings) => {
                let published = Arc::new(settings.to_map());
                self.merged.store(Arc::clone(&published));
                self.settings.store(Some(Arc::new(settings)));
                state.last_reload = Some(ReloadRecord::applied(trigger.clone()));
                state.generation += 1;
                let generation = state.generation;
                drop(state);

                info!(trigger = %trigger, "Configuration reloaded");
                self.notify_callbacks(generation, &published);
                Ok(())
            }
            Err(validation) => {
                error!(trigger = %trigger, error = %validation, "Configuration rejected");
                if self.options.failed_reload_policy == FailedReloadPolicy::KeepAttempted {
                    self.merged.store(Arc::new(merged));
                }
                state.last_reload = Some(ReloadRecord::rejected(trigger, validation.to_string()));
                Err(ConfigError::Validation(validation))
            }
        }
    }

    /// Deliver one published mapping. Delivery is serialised and a mapping
    /// older than one already delivered is dropped, so subscribers never
    /// end up on a stale snapshot when reloads race.
    fn notify_callbacks(&self, generation: u64, merged: &Map<String, Value>) {
        let delivered = self.delivered.lock();
        if delivered.get() >= generation {
            debug!(generation, "Newer configuration already delivered");
            return;
        }
        delivered.set(generation);

        let callbacks = self.callbacks.read().clone();
        for (index, callback) in callbacks.iter().enumerate() {
            // A callback reloaded again on this thread
            if delivered.get() > generation {
                debug!(generation, "Superseded during delivery");
                break;
            }
            match catch_unwind(AssertUnwindSafe(|| callback(merged))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(callback = index, "Reload callback failed: {e:#}"),
                Err(_) => error!(callback = index, "Reload callback panicked"),
            }
        }
    }

    /// Value at `path`, or `default` when absent
    pub fn get(&self, path: &str, default: Value) -> Value {
        self.lookup(path).unwrap_or(default)
    }

    /// Value at `path`, if present
    pub fn lookup(&self, path: &str) -> Option<Value> {
        get_path(&self.merged.load(), path).cloned()
    }

    /// Value at `path` deserialized into `T`
    pub fn get_typed<T: serde::de::DeserializeOwned>(&self, path: &str) -> Option<T> {
        self.lookup(path)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Write a runtime override and reload.
    ///
    /// Writes into the source named `source_name` (default `runtime`). The
    /// runtime source is created at priority 1000 when absent; any other
    /// name must already be registered. Overrides live in memory only;
    /// writing into a file-backed source is lost when that file is next
    /// re-read.
    pub fn set(&self, path: &str, value: Value, source_name: Option<&str>) -> Result<(), ConfigError> {
        let name = source_name.unwrap_or(RUNTIME_SOURCE);
        {
            let mut state = self.state.lock();
            match state.sources.iter_mut().find(|s| s.name == name) {
                Some(source) => source.set(path, value),
                None if name != RUNTIME_SOURCE => {
                    return Err(ConfigError::UnknownSource(name.to_string()));
                }
                None => {
                    let mut source = ConfigSource::in_memory(name, RUNTIME_PRIORITY);
                    source.set(path, value);
                    state.insert(source);
                }
            }
        }
        debug!(path, source = name, "Runtime override written");
        self.reload(ReloadTrigger::Runtime(path.to_string()), ReloadScope::MergeOnly)
    }

    /// Register a callback run after each successful reload
    pub fn register_reload_callback(&self, callback: ReloadCallback) {
        self.callbacks.write().push(callback);
    }

    /// Start watching the config directory and every source file's parent.
    ///
    /// Idempotent. The watcher holds only a weak reference to the manager.
    pub fn start_file_watching(self: &Arc<Self>) -> Result<(), ConfigError> {
        let mut slot = self.watcher.lock();
        if slot.is_some() {
            debug!("File watching already active");
            return Ok(());
        }

        let mut dirs: Vec<PathBuf> = self.config_dir.iter().cloned().collect();
        for source in &self.state.lock().sources {
            if let Some(parent) = source.path.as_deref().and_then(Path::parent)
                && !dirs.iter().any(|d| d == parent)
            {
                dirs.push(parent.to_path_buf());
            }
        }

        let manager: Weak<Self> = Arc::downgrade(self);
        let watcher = FileChangeWatcher::start(dirs, self.options.debounce, move |path| {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            if let Err(e) = manager.reload_configuration(Some(path)) {
                error!(path = ?path, "Hot reload failed: {e}");
            }
        })?;

        *slot = Some(watcher);
        Ok(())
    }

    /// Stop the watcher and join its worker. Idempotent.
    pub fn stop_file_watching(&self) {
        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            watcher.stop();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.lock().is_some()
    }

    /// Serialize the published configuration
    pub fn export_config(&self, format: ExportFormat, include_sensitive: bool) -> Result<String, ConfigError> {
        let value = Value::Object((**self.merged.load()).clone());
        let value = if include_sensitive { value } else { redact(&value) };

        match format {
            ExportFormat::Json => serde_json::to_string_pretty(&value)
                .map_err(|e| ConfigError::serialize(e.to_string())),
            ExportFormat::Yaml => {
                serde_yaml::to_string(&value).map_err(|e| ConfigError::serialize(e.to_string()))
            }
        }
    }

    /// Flattened `(dot.path, value)` pairs whose path or scalar value
    /// contains `query`.
    ///
    /// Case-insensitive. Sensitive values are redacted before matching, so
    /// they can only be found by path.
    pub fn search(&self, query: &str) -> Vec<(String, Value)> {
        let needle = query.to_lowercase();
        let redacted = match redact(&Value::Object((**self.merged.load()).clone())) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        flatten(&redacted)
            .into_iter()
            .filter(|(path, value)| {
                path.to_lowercase().contains(&needle)
                    || scalar_text(value).is_some_and(|text| text.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Schema defaults, without any source applied
    pub fn default_configuration(&self) -> Map<String, Value> {
        Settings::defaults()
    }

    /// The published merged mapping
    pub fn merged(&self) -> Arc<Map<String, Value>> {
        self.merged.load_full()
    }

    /// The last successfully validated settings
    pub fn settings(&self) -> Option<Arc<Settings>> {
        self.settings.load_full()
    }

    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    pub fn get_status(&self) -> ConfigStatus {
        let (sources, env_overrides, last_reload) = {
            let state = self.state.lock();
            let sources = state
                .sources
                .iter()
                .map(|s| SourceStatus {
                    name: s.name.clone(),
                    path: s.path.clone(),
                    priority: s.priority,
                    is_valid: s.is_valid,
                    error: s.error.clone(),
                    keys: s.key_count(),
                    last_modified: s.last_modified,
                })
                .collect();
            (sources, state.env.len(), state.last_reload.clone())
        };

        let watched_dirs = self
            .watcher
            .lock()
            .as_ref()
            .map(|w| w.watched_dirs().to_vec());

        ConfigStatus {
            config_dir: self.config_dir.clone(),
            sources,
            env_overrides,
            watching: watched_dirs.is_some(),
            watched_dirs: watched_dirs.unwrap_or_default(),
            callbacks: self.callbacks.read().len(),
            settings_valid: self.settings.load().is_some(),
            failed_reload_policy: self.options.failed_reload_policy,
            last_reload,
        }
    }
}

impl Drop for ConfigManager {
    fn drop(&mut self) {
        self.stop_file_watching();
    }
}

/// Write starter config files into `config_dir` if they do not exist.
///
/// Creates `app.yaml` (schema defaults plus a freshly generated secret key)
/// and `<environment>.yaml`. Existing files are never overwritten. Returns
/// the paths actually written.
pub fn create_default_configs(config_dir: &Path, environment: &str) -> Result<Vec<PathBuf>, ConfigError> {
    std::fs::create_dir_all(config_dir)?;
    let mut written = Vec::new();

    let app_path = config_dir.join("app.yaml");
    if !app_path.exists() {
        let mut defaults = Settings::defaults();
        merger::set_path(&mut defaults, "security.secret_key", json!(generate_secret_key()));
        let body = serde_yaml::to_string(&defaults).map_err(|e| ConfigError::serialize(e.to_string()))?;
        std::fs::write(&app_path, format!("# Base configuration\n{body}"))?;
        written.push(app_path);
    }

    let env_path = config_dir.join(format!("{environment}.yaml"));
    if !env_path.exists() {
        let development = environment == "development";
        let overrides = json!({
            "app": { "environment": environment, "debug": development },
            "logging": { "level": if development { "debug" } else { "info" } },
        });
        let body = serde_yaml::to_string(&overrides).map_err(|e| ConfigError::serialize(e.to_string()))?;
        std::fs::write(&env_path, format!("# Overrides for the {environment} environment\n{body}"))?;
        written.push(env_path);
    }

    for path in &written {
        info!(path = ?path, "Created default config file");
    }
    Ok(written)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn generate_secret_key() -> String {
    let mut bytes = [0u8; 48];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
