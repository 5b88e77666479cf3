use thiserror::Error;

/// Errors surfaced by store operations.
///
/// `Clone` because every caller coalesced into one intent receives the same
/// failure.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(#[from] jds_backend::BackendError),

    #[error("lock error: {0}")]
    Lock(#[from] jds_lock::LockError),

    #[error("search error: {0}")]
    Search(#[from] jds_search::SearchError),

    #[error("path error: {0}")]
    Path(#[from] jds_types::PathError),

    #[error("store is closed")]
    Closed,

    #[error("watcher error: {0}")]
    Watch(String),

    #[error("config error: {0}")]
    Config(String),
}

impl StoreError {
    /// Returns `true` when the failure was a lock acquisition timeout.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::Lock(e) if e.is_timeout())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
