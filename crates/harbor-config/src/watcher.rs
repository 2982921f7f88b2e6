//! File change watching
//!
//! Filesystem events are filtered down to recognised config files and pushed
//! into one bounded reload queue. A single dedicated worker thread drains the
//! queue. A path that is already pending is not queued again; its last-seen
//! time is refreshed instead, and the worker waits until the path has been
//! quiet for the debounce window before reloading. A burst of writes to one
//! file therefore yields exactly one reload, and it reads the final contents.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::ConfigError;
use crate::sources::is_config_file;

/// Default debounce window for changes to the same file
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(1);

const QUEUE_CAPACITY: usize = 64;

/// Longest single sleep while settling, so stop requests are noticed quickly
const SETTLE_SLICE: Duration = Duration::from_millis(50);

type ReloadHandler = Arc<dyn Fn(&Path) + Send + Sync>;

enum WorkerMessage {
    Reload(PathBuf),
    Stop,
}

/// Bounded queue of paths waiting for a reload
#[derive(Clone)]
pub struct ReloadQueue {
    tx: SyncSender<WorkerMessage>,
    /// Paths queued but not yet handled, with the time of their latest event
    pending: Arc<Mutex<HashMap<PathBuf, Instant>>>,
}

impl ReloadQueue {
    /// Queue a reload for `path`.
    ///
    /// Returns `false` when the event was folded into an already pending
    /// reload or the queue is full.
    pub fn push(&self, path: PathBuf) -> bool {
        let mut pending = self.pending.lock();
        let now = Instant::now();

        if let Some(last_seen) = pending.get_mut(&path) {
            *last_seen = now;
            debug!(path = ?path, "Change coalesced into pending reload");
            return false;
        }

        match self.tx.try_send(WorkerMessage::Reload(path.clone())) {
            Ok(()) => {
                pending.insert(path, now);
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(path = ?path, "Reload queue full; dropping change event");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Number of paths waiting for a reload
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Watches config directories and feeds the reload worker
pub struct FileChangeWatcher {
    watcher: Option<RecommendedWatcher>,
    dirs: Vec<PathBuf>,
    queue: ReloadQueue,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl FileChangeWatcher {
    /// Start watching `dirs` (non-recursively).
    ///
    /// `handler` runs on the reload worker thread, once per settled path.
    /// Directories that do not exist are skipped with a warning.
    pub fn start<F>(dirs: Vec<PathBuf>, debounce: Duration, handler: F) -> Result<Self, ConfigError>
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        let mut this = Self::spawn_worker(debounce, Arc::new(handler))?;

        let queue = this.queue.clone();
        let mut watcher = recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                for path in event.paths {
                    if is_config_file(&path) {
                        debug!(path = ?path, "Config file changed");
                        queue.push(path);
                    }
                }
            }
            Err(e) => error!("File watcher error: {e}"),
        })
        .map_err(|e| ConfigError::watcher(format!("Failed to create file watcher: {e}")))?;

        for dir in dirs {
            if !dir.is_dir() {
                warn!(dir = ?dir, "Config directory does not exist; not watching it");
                continue;
            }
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|e| ConfigError::watcher(format!("Failed to watch {dir:?}: {e}")))?;
            this.dirs.push(dir);
        }

        info!(dirs = ?this.dirs, "Started watching config directories");
        this.watcher = Some(watcher);
        Ok(this)
    }

    /// Start only the reload worker, without a filesystem watcher.
    ///
    /// Changes are fed through [`FileChangeWatcher::queue`].
    pub fn detached<F>(debounce: Duration, handler: F) -> Result<Self, ConfigError>
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        Self::spawn_worker(debounce, Arc::new(handler))
    }

    fn spawn_worker(debounce: Duration, handler: ReloadHandler) -> Result<Self, ConfigError> {
        let (tx, rx) = sync_channel(QUEUE_CAPACITY);
        let pending = Arc::new(Mutex::new(HashMap::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = std::thread::Builder::new()
            .name("harbor-config-reload".into())
            .spawn({
                let pending = Arc::clone(&pending);
                let stop = Arc::clone(&stop);
                move || run_worker(rx, pending, stop, debounce, handler)
            })?;

        Ok(Self {
            watcher: None,
            dirs: Vec::new(),
            queue: ReloadQueue { tx, pending },
            stop,
            worker: Some(worker),
        })
    }

    /// The queue feeding the reload worker
    pub fn queue(&self) -> &ReloadQueue {
        &self.queue
    }

    /// Directories actually being watched
    pub fn watched_dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Stop watching and join the reload worker
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the watcher drops the callback and its queue handle.
        self.watcher.take();
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.queue.tx.try_send(WorkerMessage::Stop);

        if let Some(worker) = self.worker.take() {
            // The last owner may be dropped from inside a reload handler.
            if worker.thread().id() == std::thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                error!("Config reload worker panicked");
            }
            info!("File watcher stopped");
        }
    }
}

impl Drop for FileChangeWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    rx: Receiver<WorkerMessage>,
    pending: Arc<Mutex<HashMap<PathBuf, Instant>>>,
    stop: Arc<AtomicBool>,
    debounce: Duration,
    handler: ReloadHandler,
) {
    debug!("Config reload worker started");

    while let Ok(message) = rx.recv() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let path = match message {
            WorkerMessage::Reload(path) => path,
            WorkerMessage::Stop => break,
        };

        // Wait until the path has been quiet for a full debounce window.
        loop {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            let remaining = match pending.lock().get(&path) {
                Some(last_seen) => debounce.saturating_sub(last_seen.elapsed()),
                None => Duration::ZERO,
            };
            if remaining.is_zero() {
                break;
            }
            std::thread::sleep(remaining.min(SETTLE_SLICE));
        }

        pending.lock().remove(&path);
        handler(&path);
    }

    debug!("Config reload worker exited");
}
