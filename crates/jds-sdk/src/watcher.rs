//! External change watcher.
//!
//! Watches the directory holding the backing file (atomic writes replace the
//! file, so watching the file itself would lose track of it) and turns each
//! burst of relevant notifications into one reconcile intent. When native
//! notifications cannot be set up, or fail at runtime, it polls the file's
//! modification time and length instead.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::WatchConfig;
use crate::error::{StoreError, StoreResult};
use crate::scheduler::Command;

/// How the watcher talks back to its store.
#[derive(Clone)]
pub(crate) struct WatchSignals {
    commands: mpsc::UnboundedSender<Command>,
    self_write: Arc<AtomicBool>,
}

impl WatchSignals {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>, self_write: Arc<AtomicBool>) -> Self {
        Self {
            commands,
            self_write,
        }
    }

    /// Request a reconcile. Returns `false` once the store is gone.
    fn changed(&self) -> bool {
        if self.self_write.load(Ordering::SeqCst) {
            debug!("own write in flight, notification ignored");
            return true;
        }
        self.commands.send(Command::Reconcile).is_ok()
    }

    fn report(&self, message: String) -> bool {
        self.commands.send(Command::Report(message)).is_ok()
    }
}

/// Running watcher task. Dropping it stops watching.
pub(crate) struct ChangeWatcher {
    task: JoinHandle<()>,
}

impl ChangeWatcher {
    pub(crate) fn start(path: PathBuf, config: WatchConfig, signals: WatchSignals) -> Self {
        Self {
            task: tokio::spawn(watch(path, config, signals)),
        }
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn watch(path: PathBuf, config: WatchConfig, signals: WatchSignals) {
    if !config.force_polling {
        match NativeWatch::new(&path) {
            Ok(native) => {
                info!(path = %path.display(), "watching for external changes");
                match native.run(config.debounce(), &signals).await {
                    Ok(()) => return,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "native watcher failed, falling back to polling");
                        if !signals.report(e.to_string()) {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "native watcher unavailable, falling back to polling");
            }
        }
    }
    poll(&path, config.poll_interval(), &signals).await;
}

fn watch_error(e: notify::Error) -> StoreError {
    StoreError::Watch(e.to_string())
}

struct NativeWatch {
    // Dropping the watcher deregisters the OS watch.
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    file_name: OsString,
}

impl NativeWatch {
    fn new(path: &Path) -> StoreResult<Self> {
        let file_name = path
            .file_name()
            .ok_or_else(|| StoreError::Watch(format!("{} has no file name", path.display())))?
            .to_os_string();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, events) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = tx.send(res);
        })
        .map_err(watch_error)?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;

        Ok(Self {
            _watcher: watcher,
            events,
            file_name,
        })
    }

    fn relevant(&self, res: notify::Result<notify::Event>) -> StoreResult<bool> {
        let event = res.map_err(watch_error)?;
        if matches!(event.kind, notify::EventKind::Access(_)) {
            return Ok(false);
        }
        Ok(event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(self.file_name.as_os_str())))
    }

    /// Returns `Ok` when the store went away, `Err` when notifications broke.
    async fn run(mut self, debounce: Duration, signals: &WatchSignals) -> StoreResult<()> {
        let closed = || StoreError::Watch("notification channel closed".into());
        loop {
            let first = self.events.recv().await.ok_or_else(closed)?;
            let mut relevant = self.relevant(first)?;

            // Drain the burst.
            loop {
                match tokio::time::timeout(debounce, self.events.recv()).await {
                    Ok(Some(res)) => relevant |= self.relevant(res)?,
                    Ok(None) => return Err(closed()),
                    Err(_) => break,
                }
            }

            if relevant {
                debug!("backing file touched");
                if !signals.changed() {
                    return Ok(());
                }
            }
        }
    }
}

fn fingerprint(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

async fn poll(path: &Path, interval: Duration, signals: &WatchSignals) {
    info!(path = %path.display(), ?interval, "polling for external changes");
    let mut last = fingerprint(path);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let current = fingerprint(path);
        if current != last {
            last = current;
            if !signals.changed() {
                break;
            }
        }
    }
    debug!(path = %path.display(), "poller stopped");
}
