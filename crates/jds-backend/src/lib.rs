//! Backing store adapters for JDS.
//!
//! The store keeps its document in memory and persists it through a
//! [`BackingStore`]: read the whole document, write the whole document.
//!
//! # Backends
//!
//! - [`JsonFileStore`] -- one JSON file on disk, replaced atomically on write
//! - [`InMemoryBackingStore`] -- for tests and embedding
//!
//! # Design Rules
//!
//! 1. An absent (or empty) file reads as `None`; the store substitutes its
//!    default data.
//! 2. `write` returns only after the data is durable.
//! 3. A reader never observes a half-written file.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

pub use error::{BackendError, BackendResult};
pub use file::JsonFileStore;
pub use memory::InMemoryBackingStore;
pub use traits::BackingStore;
