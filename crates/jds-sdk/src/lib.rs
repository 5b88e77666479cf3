//! JSON document store.
//!
//! A [`Store`] owns one JSON document persisted in a single backing file and
//! shared by any number of in-process callers (and, through an advisory lock
//! file, by other processes).
//!
//! # Operation pipeline
//!
//! 1. Calls of the same class (reads, writes) arriving inside a debounce
//!    window collapse into one intent; write payloads fold in submission
//!    order.
//! 2. Detached intents run one at a time on a per-store chain.
//! 3. Each intent runs its hook phase ([`EventKind`]), may be cancelled or
//!    overridden, then locks, does the I/O, releases and notifies.
//! 4. A change watcher adopts modifications made to the file by others.
//!
//! ```no_run
//! use jds_sdk::{Store, StoreConfig};
//! use serde_json::json;
//!
//! # async fn demo() -> jds_sdk::StoreResult<()> {
//! let store = Store::open(StoreConfig::new("settings.json")).await?;
//! store.write(json!({"theme": "dark"})).await?;
//! let doc = store.read().await?;
//! store.close().await?;
//! # let _ = doc;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod store;
mod watcher;

pub use config::{StoreConfig, WatchConfig};
pub use error::{StoreError, StoreResult};
pub use registry::StoreRegistry;
pub use scheduler::{IntentClass, Phase, WriteOp};
pub use store::Store;

// Re-export the types that appear in the store's API.
pub use jds_backend::{BackingStore, InMemoryBackingStore, JsonFileStore};
pub use jds_events::{
    hook_fn, ChangeNotice, ErrorNotice, Event, EventKind, Hook, HookError, HookFailureNotice,
    HookId, Notice, Origin,
};
pub use jds_lock::LockConfig;
pub use jds_search::{Match, Matches, Query, SearchOptions};
pub use jds_types::{ChangeSet, Document, KeyChange};
