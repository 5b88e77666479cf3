//! Foundation types for the JSON document store (JDS).
//!
//! Every other JDS crate depends on `jds-types`. The document itself is a
//! plain [`serde_json::Value`]; this crate supplies the structural helpers the
//! rest of the store relies on whenever data is copied, combined, addressed,
//! or compared.
//!
//! # Key Items
//!
//! - [`Document`]: the JSON-shaped root value held by a store
//! - [`deep_clone`] / [`deep_merge`] / [`deep_equal`]: structural helpers
//! - [`DocPath`]: dotted/bracketed path addressing (`items[0].title`)
//! - [`ChangeSet`]: per top-level key `{old, new}` diff

pub mod diff;
pub mod document;
pub mod error;
pub mod path;

pub use diff::{diff_top_level, ChangeSet, KeyChange};
pub use document::{deep_clone, deep_equal, deep_merge, merged, Document};
pub use error::PathError;
pub use path::{DocPath, Segment, MAX_INDEX_GAP};
