//! Secrets manager: fallback chain, cache, writes and rotation

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendStatus, SecretBackend};
use crate::env::EnvSecrets;
use crate::error::{Result, SecretsError, validate_key};
use crate::local::LocalSecretStore;
use crate::rotation::{
    DEFAULT_ROTATION_INTERVAL, DEFAULT_SCAN_INTERVAL, RotationReport, ScheduledRotation,
    generate_secret_value,
};
use crate::settings::{DEFAULT_CACHE_TTL, SecretsSettings};
use crate::types::{BackendFailure, BackendSelection, SecretMetadata, SecretResolution, SecretSource};
use crate::vault::VaultBackend;

/// How long `stop_rotation` waits for the task before aborting it
const ROTATION_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct CacheEntry {
    value: String,
    source: SecretSource,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct ManagerState {
    cache: HashMap<String, CacheEntry>,
    schedule: BTreeMap<String, ScheduledRotation>,
}

struct RotationTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Snapshot for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct SecretsStatus {
    pub backends: Vec<BackendStatus>,
    pub cache_entries: usize,
    pub cache_ttl_secs: u64,
    pub scheduled: Vec<ScheduledRotation>,
    pub rotation_running: bool,
}

/// Builder for [`SecretsManager`]
#[derive(Default)]
pub struct SecretsManagerBuilder {
    vault: Option<Arc<dyn SecretBackend>>,
    local: Option<Arc<dyn SecretBackend>>,
    env: Option<Arc<dyn SecretBackend>>,
    cache_ttl: Option<Duration>,
    rotation_interval: Option<Duration>,
    scan_interval: Option<Duration>,
}

impl SecretsManagerBuilder {
    pub fn vault(mut self, backend: Arc<dyn SecretBackend>) -> Self {
        self.vault = Some(backend);
        self
    }

    pub fn local(mut self, backend: Arc<dyn SecretBackend>) -> Self {
        self.local = Some(backend);
        self
    }

    pub fn env(mut self, backend: Arc<dyn SecretBackend>) -> Self {
        self.env = Some(backend);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Default interval for [`SecretsManager::schedule_rotation`]
    pub fn rotation_interval(mut self, interval: Duration) -> Self {
        self.rotation_interval = Some(interval);
        self
    }

    pub fn scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = Some(interval);
        self
    }

    pub fn build(self) -> SecretsManager {
        SecretsManager {
            vault: self.vault,
            local: self.local,
            env: self.env,
            cache_ttl: self.cache_ttl.unwrap_or(DEFAULT_CACHE_TTL),
            rotation_interval: self.rotation_interval.unwrap_or(DEFAULT_ROTATION_INTERVAL),
            scan_interval: self.scan_interval.unwrap_or(DEFAULT_SCAN_INTERVAL),
            state: Mutex::new(ManagerState::default()),
            rotation: Mutex::new(None),
        }
    }
}

/// Resolves secrets through cache, Vault, the local store and the
/// environment, in that order.
///
/// Construct once and share through `Arc`. All methods take `&self`.
pub struct SecretsManager {
    vault: Option<Arc<dyn SecretBackend>>,
    local: Option<Arc<dyn SecretBackend>>,
    env: Option<Arc<dyn SecretBackend>>,
    cache_ttl: Duration,
    rotation_interval: Duration,
    scan_interval: Duration,
    state: Mutex<ManagerState>,
    rotation: Mutex<Option<RotationTask>>,
}

impl std::fmt::Debug for SecretsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsManager")
            .field("vault", &self.vault.is_some())
            .field("local", &self.local.is_some())
            .field("env", &self.env.is_some())
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}

impl SecretsManager {
    pub fn builder() -> SecretsManagerBuilder {
        SecretsManagerBuilder::default()
    }

    /// Build the backends described by `settings`.
    ///
    /// Vault is configured when an address is set, the local store when a
    /// master key is set. The environment layer is always present.
    pub fn from_settings(settings: &SecretsSettings) -> Result<Self> {
        let mut builder = Self::builder()
            .cache_ttl(settings.cache_ttl)
            .rotation_interval(settings.rotation_interval)
            .scan_interval(settings.rotation_scan_interval)
            .env(Arc::new(EnvSecrets::from_process(settings.env_prefix.clone())));

        if let Some(config) = settings.vault_config() {
            info!(address = %config.address, mount = %config.mount, "Vault secret backend configured");
            builder = builder.vault(Arc::new(VaultBackend::new(config)?));
        }

        match &settings.master_key {
            Some(master_key) => {
                let store =
                    LocalSecretStore::open(&settings.secrets_path, master_key, settings.salt_policy)?;
                builder = builder.local(Arc::new(store));
            }
            None => warn!("No master key configured; local encrypted secret store disabled"),
        }

        Ok(builder.build())
    }

    fn chain(&self) -> impl Iterator<Item = &Arc<dyn SecretBackend>> {
        [self.vault.as_ref(), self.local.as_ref(), self.env.as_ref()]
            .into_iter()
            .flatten()
    }

    fn backend(&self, source: SecretSource) -> Option<&Arc<dyn SecretBackend>> {
        match source {
            SecretSource::Vault => self.vault.as_ref(),
            SecretSource::Local => self.local.as_ref(),
            SecretSource::Env => self.env.as_ref(),
        }
    }

    /// Writable backends for a selection. An explicitly selected backend
    /// that is not configured is an error.
    fn targets(&self, selection: BackendSelection) -> Result<Vec<&Arc<dyn SecretBackend>>> {
        let explicit = |source: SecretSource| {
            self.backend(source)
                .map(|b| vec![b])
                .ok_or_else(|| SecretsError::backend_unavailable(source.to_string(), "not configured"))
        };
        match selection {
            BackendSelection::Auto => Ok([self.vault.as_ref(), self.local.as_ref()]
                .into_iter()
                .flatten()
                .collect()),
            BackendSelection::Vault => explicit(SecretSource::Vault),
            BackendSelection::Local => explicit(SecretSource::Local),
        }
    }

    fn cached(&self, key: &str) -> Option<(String, SecretSource)> {
        let mut state = self.state.lock();
        let entry = state.cache.get(key)?;
        if entry.expires_at > Instant::now() {
            return Some((entry.value.clone(), entry.source));
        }
        state.cache.remove(key);
        None
    }

    fn invalidate(&self, key: &str) {
        self.state.lock().cache.remove(key);
    }

    /// Look `key` up through the chain.
    ///
    /// Only an invalid key is an error. A backend that fails is logged,
    /// recorded in [`SecretResolution::failures`] and skipped. The first hit
    /// is cached when `use_cache` is set.
    pub async fn resolve_secret(&self, key: &str, use_cache: bool) -> Result<SecretResolution> {
        validate_key(key)?;

        if use_cache && let Some((value, source)) = self.cached(key) {
            return Ok(SecretResolution {
                value: Some(value),
                source: Some(source),
                cached: true,
                failures: Vec::new(),
            });
        }

        let mut resolution = SecretResolution::default();
        for backend in self.chain() {
            let source = backend.kind();
            match backend.get(key).await {
                Ok(Some(value)) => {
                    debug!(key, backend = %source, "Secret resolved");
                    if use_cache {
                        self.state.lock().cache.insert(
                            key.to_string(),
                            CacheEntry {
                                value: value.clone(),
                                source,
                                expires_at: Instant::now() + self.cache_ttl,
                            },
                        );
                    }
                    resolution.value = Some(value);
                    resolution.source = Some(source);
                    return Ok(resolution);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key, backend = %source, error = %e, "Secret backend failed, trying next");
                    resolution.failures.push(BackendFailure {
                        backend: source,
                        error: e.to_string(),
                    });
                }
            }
        }

        debug!(key, "Secret not found in any backend");
        Ok(resolution)
    }

    /// Value of `key`, or `None` when no backend has it
    pub async fn get_secret(&self, key: &str, use_cache: bool) -> Option<String> {
        match self.resolve_secret(key, use_cache).await {
            Ok(resolution) => resolution.value,
            Err(e) => {
                warn!(key, error = %e, "Secret lookup rejected");
                None
            }
        }
    }

    /// Metadata from the first backend that has any
    pub async fn get_metadata(&self, key: &str) -> Result<Option<SecretMetadata>> {
        validate_key(key)?;
        for backend in self.chain() {
            match backend.metadata(key).await {
                Ok(Some(meta)) => return Ok(Some(meta)),
                Ok(None) => {}
                Err(e) => warn!(key, backend = %backend.kind(), error = %e, "Metadata lookup failed"),
            }
        }
        Ok(None)
    }

    /// Store `key`. With `Auto` Vault is tried first and the local store
    /// takes the write when Vault fails or is absent. Returns the backend
    /// that accepted it.
    pub async fn put_secret(
        &self,
        key: &str,
        value: &str,
        selection: BackendSelection,
    ) -> Result<SecretSource> {
        validate_key(key)?;
        let targets = self.targets(selection)?;

        let mut last_error = None;
        for backend in targets {
            let source = backend.kind();
            match backend.put(key, value).await {
                Ok(()) => {
                    self.invalidate(key);
                    info!(key, backend = %source, "Secret stored");
                    return Ok(source);
                }
                Err(e) if selection == BackendSelection::Auto => {
                    warn!(key, backend = %source, error = %e, "Secret write failed, trying next backend");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            SecretsError::backend_unavailable("auto", "no writable secret backend configured")
        }))
    }

    /// Delete `key` from the selected backends. The cache entry is dropped
    /// whatever the outcome. Returns the backends that held the key.
    pub async fn delete_secret(
        &self,
        key: &str,
        selection: BackendSelection,
    ) -> Result<Vec<SecretSource>> {
        let outcome = self.delete_from(key, selection).await;
        self.invalidate(key);
        outcome
    }

    async fn delete_from(&self, key: &str, selection: BackendSelection) -> Result<Vec<SecretSource>> {
        validate_key(key)?;
        let targets = self.targets(selection)?;

        let mut deleted = Vec::new();
        let mut first_error = None;
        for backend in targets {
            let source = backend.kind();
            match backend.delete(key).await {
                Ok(true) => {
                    info!(key, backend = %source, "Secret deleted");
                    deleted.push(source);
                }
                Ok(false) => {}
                Err(e) if selection == BackendSelection::Auto => {
                    warn!(key, backend = %source, error = %e, "Secret delete failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        match first_error {
            Some(e) if deleted.is_empty() => Err(e),
            _ => Ok(deleted),
        }
    }

    /// Sorted union of the keys held by the selected backends
    pub async fn list_secrets(&self, selection: BackendSelection) -> Result<Vec<String>> {
        let targets = self.targets(selection)?;

        let mut keys = BTreeSet::new();
        let mut first_error = None;
        let mut any_ok = false;
        for backend in targets {
            match backend.list("").await {
                Ok(found) => {
                    any_ok = true;
                    keys.extend(found);
                }
                Err(e) if selection == BackendSelection::Auto => {
                    warn!(backend = %backend.kind(), error = %e, "Secret listing failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        match first_error {
            Some(e) if !any_ok => Err(e),
            _ => Ok(keys.into_iter().collect()),
        }
    }

    /// Register `key` for periodic rotation, replacing any existing schedule.
    ///
    /// Starts the background rotation task when it is not running yet.
    pub fn schedule_rotation(self: &Arc<Self>, key: &str, interval: Option<Duration>) -> Result<()> {
        validate_key(key)?;
        let schedule = ScheduledRotation::new(key, interval.unwrap_or(self.rotation_interval));
        info!(key, next_rotation = %schedule.next_rotation, "Secret rotation scheduled");
        self.state.lock().schedule.insert(key.to_string(), schedule);

        if !self.is_rotation_running() {
            self.start_rotation();
        }
        Ok(())
    }

    pub fn unschedule_rotation(&self, key: &str) -> bool {
        self.state.lock().schedule.remove(key).is_some()
    }

    pub fn scheduled_rotations(&self) -> Vec<ScheduledRotation> {
        self.state.lock().schedule.values().cloned().collect()
    }

    async fn write_rotated(&self, key: &str) -> Result<String> {
        let value = generate_secret_value(key);
        self.put_secret(key, &value, BackendSelection::Auto)
            .await
            .map_err(|e| SecretsError::rotation(key, e.to_string()))?;
        Ok(value)
    }

    /// Rotate `key` now and return the new value.
    ///
    /// A schedule for the key, if any, restarts from now.
    pub async fn rotate_secret(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        let value = self.write_rotated(key).await?;
        if let Some(schedule) = self.state.lock().schedule.get_mut(key) {
            schedule.rotated_at(Utc::now());
        }
        info!(key, "Secret rotated");
        Ok(value)
    }

    /// Rotate every scheduled secret that is due
    pub async fn run_rotation_scan(&self) -> RotationReport {
        self.run_rotation_scan_at(Utc::now()).await
    }

    /// Rotation scan against an explicit clock. Keys that fail stay due.
    pub async fn run_rotation_scan_at(&self, now: DateTime<Utc>) -> RotationReport {
        let due: Vec<String> = {
            let state = self.state.lock();
            state
                .schedule
                .values()
                .filter(|s| s.is_due_at(now))
                .map(|s| s.key.clone())
                .collect()
        };

        let mut report = RotationReport::default();
        for key in due {
            match self.write_rotated(&key).await {
                Ok(_) => {
                    if let Some(schedule) = self.state.lock().schedule.get_mut(&key) {
                        schedule.rotated_at(now);
                    }
                    info!(key = %key, "Scheduled secret rotated");
                    report.rotated.push(key);
                }
                Err(e) => {
                    error!(key = %key, error = %e, "Scheduled rotation failed");
                    if let Some(schedule) = self.state.lock().schedule.get_mut(&key) {
                        schedule.last_error = Some(e.to_string());
                    }
                    report.failed.push((key, e.to_string()));
                }
            }
        }
        report
    }

    /// Start the background rotation task. Returns `false` when it is
    /// already running or no tokio runtime is available.
    pub fn start_rotation(self: &Arc<Self>) -> bool {
        let mut slot = self.rotation.lock();
        if slot.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime available; secret rotation task not started");
            return false;
        };

        let (shutdown, mut stop_rx) = watch::channel(false);
        let manager = Arc::downgrade(self);
        let scan_interval = self.scan_interval;

        let handle = runtime.spawn(async move {
            info!(interval_secs = scan_interval.as_secs(), "Secret rotation task started");
            loop {
                let Some(this) = manager.upgrade() else { break };
                let report = this.run_rotation_scan().await;
                if !report.is_empty() {
                    info!(
                        rotated = report.rotated.len(),
                        failed = report.failed.len(),
                        "Rotation scan finished"
                    );
                }
                drop(this);

                tokio::select! {
                    _ = tokio::time::sleep(scan_interval) => {}
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("Secret rotation task exited");
        });

        *slot = Some(RotationTask { shutdown, handle });
        true
    }

    /// Signal the rotation task and wait for it, aborting after a timeout
    pub async fn stop_rotation(&self) {
        let Some(task) = self.rotation.lock().take() else {
            return;
        };
        let _ = task.shutdown.send(true);

        let mut handle = task.handle;
        match tokio::time::timeout(ROTATION_STOP_TIMEOUT, &mut handle).await {
            Ok(_) => info!("Secret rotation task stopped"),
            Err(_) => {
                warn!("Secret rotation task did not stop in time; aborting");
                handle.abort();
            }
        }
    }

    pub fn is_rotation_running(&self) -> bool {
        self.rotation
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Drop every cached value; returns how many were dropped
    pub fn clear_cache(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.cache.len();
        state.cache.clear();
        info!(count, "Secret cache cleared");
        count
    }

    pub async fn get_status(&self) -> SecretsStatus {
        let mut backends = Vec::new();
        for backend in self.chain() {
            backends.push(backend.status().await);
        }

        let (cache_entries, scheduled) = {
            let state = self.state.lock();
            (
                state.cache.len(),
                state.schedule.values().cloned().collect(),
            )
        };

        SecretsStatus {
            backends,
            cache_entries,
            cache_ttl_secs: self.cache_ttl.as_secs(),
            scheduled,
            rotation_running: self.is_rotation_running(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockBackend {
        kind: SecretSource,
        values: Mutex<HashMap<String, String>>,
        failing: AtomicBool,
        gets: AtomicUsize,
        puts: AtomicUsize,
    }

    impl MockBackend {
        fn new(kind: SecretSource) -> Arc<Self> {
            Arc::new(Self {
                kind,
                values: Mutex::new(HashMap::new()),
                failing: AtomicBool::new(false),
                gets: AtomicUsize::new(0),
                puts: AtomicUsize::new(0),
            })
        }

        fn with(kind: SecretSource, key: &str, value: &str) -> Arc<Self> {
            let backend = Self::new(kind);
            backend.set(key, value);
            backend
        }

        fn set(&self, key: &str, value: &str) {
            self.values.lock().insert(key.to_string(), value.to_string());
        }

        fn value(&self, key: &str) -> Option<String> {
            self.values.lock().get(key).cloned()
        }

        fn fail(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn check(&self) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                Err(SecretsError::http(Some(503), "backend down"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl SecretBackend for MockBackend {
        fn kind(&self) -> SecretSource {
            self.kind
        }

        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            Ok(self.value(key))
        }

        async fn put(&self, key: &str, value: &str) -> Result<()> {
            self.check()?;
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.set(key, value);
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            self.check()?;
            Ok(self.values.lock().remove(key).is_some())
        }

        async fn list(&self, _prefix: &str) -> Result<Vec<String>> {
            self.check()?;
            Ok(self.values.lock().keys().cloned().collect())
        }
    }

    fn env_with(key: &str, value: &str) -> Arc<EnvSecrets> {
        Arc::new(EnvSecrets::from_vars("SECRET_", [(key.to_string(), value.to_string())]))
    }

    #[tokio::test]
    async fn test_failing_vault_falls_back_to_local() {
        let vault = MockBackend::new(SecretSource::Vault);
        vault.fail(true);
        let local = MockBackend::with(SecretSource::Local, "database/password", "from-local");

        let manager = SecretsManager::builder().vault(vault).local(local).build();
        let resolution = manager.resolve_secret("database/password", true).await.unwrap();

        assert_eq!(resolution.value.as_deref(), Some("from-local"));
        assert_eq!(resolution.source, Some(SecretSource::Local));
        assert_eq!(resolution.failures.len(), 1);
        assert_eq!(resolution.failures[0].backend, SecretSource::Vault);
    }

    #[tokio::test]
    async fn test_env_is_last_resort() {
        let local = MockBackend::new(SecretSource::Local);
        let manager = SecretsManager::builder()
            .local(local)
            .env(env_with("SECRET_API_KEY", "from-env"))
            .build();

        assert_eq!(manager.get_secret("api_key", true).await.as_deref(), Some("from-env"));
        assert_eq!(manager.get_secret("other", true).await, None);
    }

    #[tokio::test]
    async fn test_absent_everywhere_is_not_an_error() {
        let manager = SecretsManager::builder()
            .local(MockBackend::new(SecretSource::Local))
            .build();
        let resolution = manager.resolve_secret("missing", true).await.unwrap();
        assert!(!resolution.is_found());
        assert!(resolution.failures.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_key_is_rejected() {
        let manager = SecretsManager::builder().build();
        assert!(matches!(
            manager.resolve_secret("../etc/passwd", true).await,
            Err(SecretsError::InvalidKey { .. })
        ));
        assert_eq!(manager.get_secret("", true).await, None);
    }

    #[tokio::test]
    async fn test_cache_hit_and_ttl() {
        let local = MockBackend::with(SecretSource::Local, "token", "v1");
        let manager = SecretsManager::builder()
            .local(local.clone())
            .cache_ttl(Duration::from_millis(100))
            .build();

        assert_eq!(manager.get_secret("token", true).await.as_deref(), Some("v1"));
        local.set("token", "v2");

        let cached = manager.resolve_secret("token", true).await.unwrap();
        assert!(cached.cached);
        assert_eq!(cached.value.as_deref(), Some("v1"));
        assert_eq!(local.gets.load(Ordering::SeqCst), 1);

        // Bypassing the cache reads through without storing
        assert_eq!(manager.get_secret("token", false).await.as_deref(), Some("v2"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(manager.get_secret("token", true).await.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_put_invalidates_cache() {
        let local = MockBackend::with(SecretSource::Local, "token", "old");
        let manager = SecretsManager::builder().local(local).build();

        assert_eq!(manager.get_secret("token", true).await.as_deref(), Some("old"));
        let source = manager
            .put_secret("token", "new", BackendSelection::Auto)
            .await
            .unwrap();

        assert_eq!(source, SecretSource::Local);
        assert_eq!(manager.get_secret("token", true).await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_auto_put_prefers_vault_then_local() {
        let vault = MockBackend::new(SecretSource::Vault);
        let local = MockBackend::new(SecretSource::Local);
        let manager = SecretsManager::builder()
            .vault(vault.clone())
            .local(local.clone())
            .build();

        assert_eq!(
            manager.put_secret("a", "1", BackendSelection::Auto).await.unwrap(),
            SecretSource::Vault
        );
        assert_eq!(vault.value("a").as_deref(), Some("1"));

        vault.fail(true);
        assert_eq!(
            manager.put_secret("b", "2", BackendSelection::Auto).await.unwrap(),
            SecretSource::Local
        );
        assert_eq!(local.value("b").as_deref(), Some("2"));

        // Explicit selection surfaces the failure
        assert!(matches!(
            manager.put_secret("c", "3", BackendSelection::Vault).await,
            Err(SecretsError::Http { .. })
        ));
    }

    #[tokio::test]
    async fn test_explicit_unconfigured_backend() {
        let manager = SecretsManager::builder()
            .local(MockBackend::new(SecretSource::Local))
            .build();
        assert!(matches!(
            manager.put_secret("k", "v", BackendSelection::Vault).await,
            Err(SecretsError::BackendUnavailable { .. })
        ));

        let empty = SecretsManager::builder().build();
        assert!(matches!(
            empty.put_secret("k", "v", BackendSelection::Auto).await,
            Err(SecretsError::BackendUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_invalidates_cache_even_on_failure() {
        let vault = MockBackend::with(SecretSource::Vault, "token", "cached");
        let manager = SecretsManager::builder().vault(vault.clone()).build();

        assert_eq!(manager.get_secret("token", true).await.as_deref(), Some("cached"));
        vault.fail(true);
        assert!(manager.delete_secret("token", BackendSelection::Auto).await.is_err());

        vault.fail(false);
        vault.set("token", "fresh");
        assert_eq!(manager.get_secret("token", true).await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_delete_from_all_backends() {
        let vault = MockBackend::with(SecretSource::Vault, "token", "a");
        let local = MockBackend::with(SecretSource::Local, "token", "b");
        let manager = SecretsManager::builder()
            .vault(vault.clone())
            .local(local.clone())
            .build();

        let deleted = manager.delete_secret("token", BackendSelection::Auto).await.unwrap();
        assert_eq!(deleted, vec![SecretSource::Vault, SecretSource::Local]);
        assert!(vault.value("token").is_none());
        assert!(local.value("token").is_none());

        let deleted = manager.delete_secret("token", BackendSelection::Local).await.unwrap();
        assert!(deleted.is_empty());
    }

    #[tokio::test]
    async fn test_list_union() {
        let vault = MockBackend::with(SecretSource::Vault, "shared", "1");
        vault.set("only_vault", "2");
        let local = MockBackend::with(SecretSource::Local, "shared", "3");
        local.set("only_local", "4");
        let manager = SecretsManager::builder().vault(vault.clone()).local(local).build();

        assert_eq!(
            manager.list_secrets(BackendSelection::Auto).await.unwrap(),
            vec!["only_local", "only_vault", "shared"]
        );

        vault.fail(true);
        assert_eq!(
            manager.list_secrets(BackendSelection::Auto).await.unwrap(),
            vec!["only_local", "shared"]
        );
        assert!(manager.list_secrets(BackendSelection::Vault).await.is_err());
    }

    #[tokio::test]
    async fn test_rotation_advances_only_on_success() {
        let local = MockBackend::with(SecretSource::Local, "database/password", "initial");
        let manager = Arc::new(SecretsManager::builder().local(local.clone()).build());
        manager
            .schedule_rotation("database/password", Some(Duration::from_secs(60)))
            .unwrap();

        let start = Utc::now();
        assert!(manager.run_rotation_scan_at(start).await.is_empty());

        // Due, but the backend is down: stays due
        local.fail(true);
        let due = start + chrono::Duration::seconds(120);
        let report = manager.run_rotation_scan_at(due).await;
        assert_eq!(report.failed.len(), 1);
        let schedule = &manager.scheduled_rotations()[0];
        assert!(schedule.is_due_at(due));
        assert!(schedule.last_error.is_some());

        local.fail(false);
        let report = manager.run_rotation_scan_at(due).await;
        assert_eq!(report.rotated, vec!["database/password"]);
        let schedule = &manager.scheduled_rotations()[0];
        assert_eq!(schedule.next_rotation, due + chrono::Duration::seconds(60));
        assert!(schedule.last_error.is_none());
        assert_ne!(local.value("database/password").as_deref(), Some("initial"));
    }

    #[tokio::test]
    async fn test_manual_rotation() {
        let local = MockBackend::with(SecretSource::Local, "stripe/api_key", "old");
        let manager = SecretsManager::builder().local(local.clone()).build();

        assert_eq!(manager.get_secret("stripe/api_key", true).await.as_deref(), Some("old"));
        let value = manager.rotate_secret("stripe/api_key").await.unwrap();

        assert!(value.starts_with("ak_"));
        assert_eq!(local.value("stripe/api_key"), Some(value.clone()));
        assert_eq!(manager.get_secret("stripe/api_key", true).await, Some(value));

        local.fail(true);
        assert!(matches!(
            manager.rotate_secret("stripe/api_key").await,
            Err(SecretsError::Rotation { .. })
        ));
    }

    #[tokio::test]
    async fn test_rotation_task_start_stop() {
        let manager = Arc::new(
            SecretsManager::builder()
                .local(MockBackend::new(SecretSource::Local))
                .scan_interval(Duration::from_secs(3600))
                .build(),
        );

        assert!(manager.start_rotation());
        assert!(!manager.start_rotation());
        assert!(manager.is_rotation_running());

        manager.stop_rotation().await;
        assert!(!manager.is_rotation_running());
    }

    #[tokio::test]
    async fn test_clear_cache_and_status() {
        let local = MockBackend::with(SecretSource::Local, "a", "1");
        local.set("b", "2");
        let manager = Arc::new(SecretsManager::builder().local(local).build());
        manager.get_secret("a", true).await;
        manager.get_secret("b", true).await;
        assert!(!manager.get_status().await.rotation_running);
        manager.schedule_rotation("a", None).unwrap();

        let status = manager.get_status().await;
        assert_eq!(status.cache_entries, 2);
        assert_eq!(status.cache_ttl_secs, 300);
        assert_eq!(status.scheduled.len(), 1);
        assert_eq!(status.backends.len(), 1);
        assert!(status.rotation_running);

        assert_eq!(manager.clear_cache(), 2);
        assert_eq!(manager.get_status().await.cache_entries, 0);
        manager.stop_rotation().await;
    }

    #[tokio::test]
    async fn test_scheduling_starts_rotation_task() {
        let manager = Arc::new(
            SecretsManager::builder()
                .local(MockBackend::new(SecretSource::Local))
                .build(),
        );
        assert!(!manager.is_rotation_running());

        manager.schedule_rotation("token", None).unwrap();
        assert!(manager.is_rotation_running());

        // Already running: scheduling another key keeps the same task
        manager.schedule_rotation("other", None).unwrap();
        assert!(!manager.start_rotation());

        manager.stop_rotation().await;
        assert!(!manager.is_rotation_running());
    }

    #[test]
    fn test_scheduling_without_runtime_keeps_schedule() {
        let manager = Arc::new(SecretsManager::builder().build());
        manager.schedule_rotation("token", None).unwrap();

        assert!(!manager.is_rotation_running());
        assert_eq!(manager.scheduled_rotations().len(), 1);
    }

    #[tokio::test]
    async fn test_worker_rotates_due_key_exactly_once() {
        let local = MockBackend::with(SecretSource::Local, "k", "initial");
        let manager = Arc::new(
            SecretsManager::builder()
                .local(local.clone())
                .scan_interval(Duration::from_millis(20))
                .build(),
        );

        manager.schedule_rotation("k", Some(Duration::ZERO)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while local.puts.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Several more scans pass without another rotation
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(local.puts.load(Ordering::SeqCst), 1);
        assert_ne!(local.value("k").as_deref(), Some("initial"));

        let schedule = &manager.scheduled_rotations()[0];
        let now = Utc::now();
        assert!(!schedule.is_due_at(now));
        assert!(schedule.next_rotation > now + chrono::Duration::days(29));
        assert!(schedule.last_rotated.is_some());

        manager.stop_rotation().await;
    }

    #[tokio::test]
    async fn test_worker_leaves_failed_key_due() {
        let local = MockBackend::new(SecretSource::Local);
        local.fail(true);
        let manager = Arc::new(
            SecretsManager::builder()
                .local(local.clone())
                .scan_interval(Duration::from_millis(20))
                .build(),
        );

        manager.schedule_rotation("k", Some(Duration::ZERO)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let schedule = &manager.scheduled_rotations()[0];
        assert!(schedule.is_due_at(Utc::now()));
        assert!(schedule.last_error.is_some());
        assert!(schedule.last_rotated.is_none());
        assert!(manager.is_rotation_running());

        manager.stop_rotation().await;
    }
}
