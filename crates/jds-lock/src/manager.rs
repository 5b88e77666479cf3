use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::LockConfig;
use crate::error::{LockError, LockResult};

/// Advisory metadata written into the marker file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Identity of the holder (see [`default_holder`]).
    pub holder: String,
    /// Process id of the holder.
    pub pid: u32,
    /// When the marker was created.
    pub acquired_at: DateTime<Utc>,
}

/// Marker path for a backing file: `<backing-path>.lock`.
pub fn lock_path_for(backing: &Path) -> PathBuf {
    let mut name = backing.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// A holder identity unique to this process and call: `<pid>-<uuid v7>`.
pub fn default_holder() -> String {
    format!("{}-{}", std::process::id(), uuid::Uuid::now_v7())
}

/// What the contents (or mtime) of a conflicting marker say about it.
enum Staleness {
    Fresh,
    Stale(Duration),
    /// Neither the record nor the mtime could be read.
    Unknown,
    /// The marker disappeared while we looked at it.
    Vanished,
}

#[derive(Default)]
struct LockState {
    handle: Option<File>,
    pinned: bool,
}

/// Exclusive-create lock on a marker file.
///
/// Acquiring while already holding the lock is a no-op. A pinned lock
/// survives [`LockManager::release`] until [`LockManager::unpin`].
pub struct LockManager {
    path: PathBuf,
    holder: String,
    config: LockConfig,
    state: Mutex<LockState>,
}

impl LockManager {
    pub fn new(path: impl Into<PathBuf>, config: LockConfig, holder: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            holder: holder.into(),
            config,
            state: Mutex::new(LockState::default()),
        }
    }

    /// Path of the marker file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Returns `true` while this manager holds the marker.
    pub fn is_held(&self) -> bool {
        self.state.lock().expect("lock state poisoned").handle.is_some()
    }

    /// Returns `true` while the lock is pinned.
    pub fn is_pinned(&self) -> bool {
        self.state.lock().expect("lock state poisoned").pinned
    }

    /// Acquire the marker, retrying until success or timeout.
    pub async fn acquire(&self) -> LockResult<()> {
        if self.is_held() {
            return Ok(());
        }

        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.try_create() {
                Ok(file) => {
                    self.state.lock().expect("lock state poisoned").handle = Some(file);
                    info!(path = %self.path.display(), attempts, "lock acquired");
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(LockError::io(&self.path, e)),
            }

            match self.staleness() {
                Staleness::Fresh => {}
                Staleness::Vanished => continue,
                Staleness::Stale(age) => {
                    warn!(path = %self.path.display(), ?age, "removing stale lock");
                    self.remove_marker()?;
                    continue;
                }
                Staleness::Unknown => {
                    warn!(path = %self.path.display(), "removing unreadable lock");
                    self.remove_marker()?;
                    continue;
                }
            }

            let waited = started.elapsed();
            if waited >= self.config.timeout() {
                warn!(path = %self.path.display(), ?waited, "lock acquisition timed out");
                return Err(LockError::Timeout {
                    path: self.path.clone(),
                    waited,
                });
            }
            tokio::time::sleep(self.config.retry_delay()).await;
        }
    }

    /// Release the marker. No-op when not held or while pinned.
    pub fn release(&self) -> LockResult<()> {
        if self.is_pinned() {
            debug!(path = %self.path.display(), "release skipped, lock is pinned");
            return Ok(());
        }
        self.force_release()
    }

    /// Release the marker even if pinned.
    pub fn force_release(&self) -> LockResult<()> {
        let handle = {
            let mut state = self.state.lock().expect("lock state poisoned");
            state.pinned = false;
            state.handle.take()
        };
        let Some(handle) = handle else {
            return Ok(());
        };
        drop(handle);

        // Someone may have taken the marker over as stale; leave theirs alone.
        if let Some(record) = Self::inspect(&self.path) {
            if record.holder != self.holder {
                warn!(
                    path = %self.path.display(),
                    holder = %record.holder,
                    "lock was taken over, not removing"
                );
                return Ok(());
            }
        }
        self.remove_marker()?;
        debug!(path = %self.path.display(), "lock released");
        Ok(())
    }

    /// Acquire and keep the lock across per-operation releases.
    pub async fn pin(&self) -> LockResult<()> {
        self.acquire().await?;
        self.state.lock().expect("lock state poisoned").pinned = true;
        Ok(())
    }

    /// Drop the pin and release.
    pub fn unpin(&self) -> LockResult<()> {
        self.force_release()
    }

    /// Read the record of whatever marker currently exists at `path`.
    pub fn inspect(path: &Path) -> Option<LockRecord> {
        let text = fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }

    fn try_create(&self) -> io::Result<File> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;

        let record = LockRecord {
            holder: self.holder.clone(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let written = serde_json::to_vec(&record)
            .map_err(io::Error::other)
            .and_then(|bytes| file.write_all(&bytes))
            .and_then(|()| file.sync_all());
        if let Err(e) = written {
            let _ = fs::remove_file(&self.path);
            return Err(e);
        }
        Ok(file)
    }

    fn staleness(&self) -> Staleness {
        let stale_after = self.config.stale_after();

        if let Some(record) = Self::inspect(&self.path) {
            let age = (Utc::now() - record.acquired_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            return if age > stale_after {
                Staleness::Stale(age)
            } else {
                Staleness::Fresh
            };
        }

        match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => {
                let age = SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or(Duration::ZERO);
                if age > stale_after {
                    Staleness::Stale(age)
                } else {
                    Staleness::Fresh
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Staleness::Vanished,
            Err(_) => Staleness::Unknown,
        }
    }

    fn remove_marker(&self) -> LockResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::io(&self.path, e)),
        }
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        if let Err(e) = self.force_release() {
            warn!(error = %e, "failed to release lock on drop");
        }
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("path", &self.path)
            .field("holder", &self.holder)
            .field("held", &self.is_held())
            .finish()
    }
}
