use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use jds_types::Document;

use crate::error::{BackendError, BackendResult};
use crate::traits::BackingStore;

/// In-memory backing store.
///
/// Intended for tests and embedding. Counts physical reads and writes, can
/// be told to fail upcoming operations, and can be changed behind the
/// store's back with [`InMemoryBackingStore::set_external`].
pub struct InMemoryBackingStore {
    doc: RwLock<Option<Document>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    failures: RwLock<VecDeque<String>>,
}

impl InMemoryBackingStore {
    /// Create an empty store (reads return `None`).
    pub fn new() -> Self {
        Self {
            doc: RwLock::new(None),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            failures: RwLock::new(VecDeque::new()),
        }
    }

    /// Create a store that already holds `doc`.
    pub fn with_document(doc: Document) -> Self {
        let store = Self::new();
        *store.doc.write().expect("lock poisoned") = Some(doc);
        store
    }

    /// Number of successful `read` calls.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of successful `write` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// The stored document, without counting a read.
    pub fn snapshot(&self) -> Option<Document> {
        self.doc.read().expect("lock poisoned").clone()
    }

    /// Replace the stored document without counting a write, as another
    /// process would.
    pub fn set_external(&self, doc: Option<Document>) {
        *self.doc.write().expect("lock poisoned") = doc;
    }

    /// Make the next read or write fail with `message`. Calls queue up.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.failures
            .write()
            .expect("lock poisoned")
            .push_back(message.into());
    }

    fn take_failure(&self) -> BackendResult<()> {
        match self.failures.write().expect("lock poisoned").pop_front() {
            Some(message) => Err(BackendError::Injected(message)),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingStore for InMemoryBackingStore {
    fn read(&self) -> BackendResult<Option<Document>> {
        self.take_failure()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot())
    }

    fn write(&self, doc: &Document) -> BackendResult<()> {
        self.take_failure()?;
        *self.doc.write().expect("lock poisoned") = Some(doc.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryBackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackingStore")
            .field("reads", &self.read_count())
            .field("writes", &self.write_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_store_reads_none() {
        let store = InMemoryBackingStore::new();
        assert_eq!(store.read().unwrap(), None);
        assert_eq!(store.read_count(), 1);
        assert!(store.path().is_none());
    }

    #[test]
    fn write_is_counted_and_visible() {
        let store = InMemoryBackingStore::new();
        store.write(&json!({"a": 1})).unwrap();
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.read().unwrap(), Some(json!({"a": 1})));
    }

    #[test]
    fn external_changes_are_not_counted() {
        let store = InMemoryBackingStore::with_document(json!({"a": 1}));
        store.set_external(Some(json!({"a": 2})));
        assert_eq!(store.write_count(), 0);
        assert_eq!(store.snapshot(), Some(json!({"a": 2})));
    }

    #[test]
    fn injected_failures_are_consumed_in_order() {
        let store = InMemoryBackingStore::new();
        store.fail_next("first");
        store.fail_next("second");

        let err = store.write(&json!(1)).unwrap_err();
        assert_eq!(err.to_string(), "injected failure: first");
        assert!(matches!(store.read(), Err(BackendError::Injected(m)) if m == "second"));
        assert!(store.write(&json!(1)).is_ok());
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.read_count(), 0);
    }
}
