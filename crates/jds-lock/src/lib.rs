//! Advisory cross-process locking for JDS.
//!
//! Mutual exclusion is signalled by the mere existence of a marker file next
//! to the backing document (`<backing-path>.lock`), created with
//! `create_new` so exactly one process wins. The marker's content, a
//! [`LockRecord`], is only a hint used to decide whether an existing marker
//! was abandoned and may be taken over.
//!
//! # Design Rules
//!
//! 1. Existence of the marker is authoritative, its content is advisory.
//! 2. A marker older than `stale_after` is removed and acquisition retried
//!    immediately.
//! 3. Acquisition gives up with [`LockError::Timeout`] after `timeout`.
//! 4. `release` is idempotent and never removes a marker held by someone else.

pub mod config;
pub mod error;
pub mod manager;

pub use config::LockConfig;
pub use error::{LockError, LockResult};
pub use manager::{default_holder, lock_path_for, LockManager, LockRecord};
