use std::path::Path;

use jds_types::Document;

use crate::error::BackendResult;

/// Whole-document persistence.
///
/// All implementations must satisfy these invariants:
/// - `read` returns `Ok(None)` when nothing was ever stored.
/// - `write` replaces the stored document and is durable on return.
/// - Concurrent readers see either the old or the new document, never a mix.
pub trait BackingStore: Send + Sync {
    /// Read the stored document.
    fn read(&self) -> BackendResult<Option<Document>>;

    /// Replace the stored document.
    fn write(&self, doc: &Document) -> BackendResult<()>;

    /// Location on disk, if any. Stores without a path get no lock file and
    /// no change watcher.
    fn path(&self) -> Option<&Path> {
        None
    }
}

impl<T: BackingStore + ?Sized> BackingStore for std::sync::Arc<T> {
    fn read(&self) -> BackendResult<Option<Document>> {
        (**self).read()
    }

    fn write(&self, doc: &Document) -> BackendResult<()> {
        (**self).write(doc)
    }

    fn path(&self) -> Option<&Path> {
        (**self).path()
    }
}
