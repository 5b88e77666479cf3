use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Errors from lock acquisition and release.
///
/// `Clone` so one failure can be handed to every caller waiting on the same
/// operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LockError {
    /// The marker stayed held by someone else for longer than the timeout.
    #[error("timed out after {waited:?} waiting for lock {}", path.display())]
    Timeout { path: PathBuf, waited: Duration },

    /// Creating, reading, or removing the marker failed.
    #[error("lock file I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: Arc<io::Error>,
    },
}

impl LockError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(err),
        }
    }

    /// Returns `true` for [`LockError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result alias for lock operations.
pub type LockResult<T> = Result<T, LockError>;
