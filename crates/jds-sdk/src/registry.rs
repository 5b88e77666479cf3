use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::store::Store;

/// Open stores of a process, for orderly shutdown.
///
/// Owned by the application's composition root and passed to
/// [`Store::open_in`]. Stores leave the registry when closed;
/// [`StoreRegistry::close_all`] closes whatever is still open.
///
/// The registry keeps its stores alive; a store only points back weakly, so
/// dropping the registry drops every store nobody else holds.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    stores: Arc<Mutex<BTreeMap<u64, Store>>>,
}

/// Back-reference from a store to the registry it is in.
#[derive(Clone)]
pub(crate) struct RegistryRef {
    stores: Weak<Mutex<BTreeMap<u64, Store>>>,
}

impl RegistryRef {
    pub(crate) fn upgrade(&self) -> Option<StoreRegistry> {
        self.stores.upgrade().map(|stores| StoreRegistry { stores })
    }
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `store` until it is closed.
    pub fn register(&self, store: &Store) {
        store.set_registry(Some(RegistryRef {
            stores: Arc::downgrade(&self.stores),
        }));
        self.stores
            .lock()
            .expect("registry lock poisoned")
            .insert(store.id(), store.clone());
        debug!(store = store.id(), "store registered");
    }

    /// Stop tracking a store. Returns `true` if it was registered.
    pub fn unregister(&self, id: u64) -> bool {
        let removed = self
            .stores
            .lock()
            .expect("registry lock poisoned")
            .remove(&id);
        if let Some(store) = &removed {
            store.set_registry(None);
            debug!(store = id, "store unregistered");
        }
        removed.is_some()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.stores
            .lock()
            .expect("registry lock poisoned")
            .contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.stores.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every registered store. All stores are attempted; the first
    /// failure is returned.
    pub async fn close_all(&self) -> StoreResult<()> {
        let stores: Vec<Store> = self
            .stores
            .lock()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect();

        let mut first_error = None;
        for store in stores {
            let id = store.id();
            if let Err(e) = store.close().await {
                warn!(store = id, error = %e, "failed to close store");
                first_error.get_or_insert(e);
            }
            self.unregister(id);
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<u64> = self
            .stores
            .lock()
            .expect("registry lock poisoned")
            .keys()
            .copied()
            .collect();
        f.debug_struct("StoreRegistry").field("stores", &ids).finish()
    }
}
