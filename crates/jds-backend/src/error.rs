use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Errors from backing store operations.
///
/// `Clone` because a failed write is reported to every caller whose
/// payload was folded into it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// I/O error from the underlying file.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: Arc<io::Error>,
    },

    /// The file exists but does not contain valid JSON.
    #[error("cannot parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    /// The document could not be serialized.
    #[error("serialization error: {0}")]
    Serialize(String),

    /// Failure requested through [`crate::InMemoryBackingStore::fail_next`].
    #[error("injected failure: {0}")]
    Injected(String),
}

impl BackendError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(err),
        }
    }
}

/// Result alias for backing store operations.
pub type BackendResult<T> = Result<T, BackendError>;
