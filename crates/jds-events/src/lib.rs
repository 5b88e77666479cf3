//! Event pipeline for JDS.
//!
//! Every store operation runs a pre-operation hook phase: an [`Event`] is
//! built with a cloned `before` document and a mutable `proposed` document,
//! every [`Hook`] registered for the [`EventKind`] runs in registration order,
//! and the resulting [`Outcome`] tells the caller whether to proceed, stop,
//! or return an override value. After a successful write (or an adopted
//! external change) a non-cancellable `Change` event carries the per-key diff.
//!
//! Hooks run inside a task-local [`DispatchScope`]. Operations started by a
//! hook can inspect [`current_scope`] to run re-entrantly and to honour
//! [`Event::prevent_chain`].
//!
//! Besides hooks, every change and error is published as a [`Notice`] on a
//! broadcast channel ([`EventPipeline::subscribe`]).

pub mod error;
pub mod event;
pub mod hook;
pub mod kind;
pub mod notice;
pub mod pipeline;

pub use error::HookError;
pub use event::{Event, ListenerError, Outcome};
pub use hook::{hook_fn, FnHook, Hook, HookId};
pub use kind::{EventKind, Origin};
pub use notice::{ChangeNotice, ErrorNotice, HookFailureNotice, Notice};
pub use pipeline::{current_scope, DispatchScope, Dispatched, EventPipeline};
