use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use jds_types::{ChangeSet, DocPath, Document, PathError};

use crate::kind::{EventKind, Origin};

/// What the caller should do once dispatch finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Proceed with the (possibly hook-mutated) proposed document.
    Continue,
    /// Skip the operation; callers get nothing.
    Cancelled,
    /// Skip the operation; callers get this value instead.
    Overridden(Value),
}

impl Outcome {
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// A hook that failed during dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerError {
    /// [`crate::Hook::name`] of the failing hook.
    pub hook: String,
    pub message: String,
}

/// The record handed to hooks for one operation phase.
///
/// `before` is a clone of the state the operation started from and is never
/// mutated. `proposed` is what the operation will persist (or return, for
/// reads); hooks edit it in place through the path accessors.
#[derive(Debug)]
pub struct Event {
    kind: EventKind,
    operation: String,
    timestamp: DateTime<Utc>,
    before: Document,
    proposed: Document,
    cancelled: bool,
    result: Option<Value>,
    chain: Arc<AtomicBool>,
    changes: Option<ChangeSet>,
    origin: Option<Origin>,
    error: Option<String>,
    pub(crate) listener_errors: Vec<ListenerError>,
}

impl Event {
    pub(crate) fn new(
        kind: EventKind,
        operation: impl Into<String>,
        before: Document,
        proposed: Document,
        chain: Arc<AtomicBool>,
    ) -> Self {
        Self {
            kind,
            operation: operation.into(),
            timestamp: Utc::now(),
            before,
            proposed,
            cancelled: false,
            result: None,
            chain,
            changes: None,
            origin: None,
            error: None,
            listener_errors: Vec::new(),
        }
    }

    pub(crate) fn with_change(mut self, changes: ChangeSet, origin: Origin) -> Self {
        self.changes = Some(changes);
        self.origin = Some(origin);
        self
    }

    pub(crate) fn with_error(mut self, message: String) -> Self {
        self.error = Some(message);
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Name of the operation that raised the event (`write`,
    /// `resetToDefault`, `watch`, ...).
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn before(&self) -> &Document {
        &self.before
    }

    pub fn proposed(&self) -> &Document {
        &self.proposed
    }

    pub fn proposed_mut(&mut self) -> &mut Document {
        &mut self.proposed
    }

    pub fn into_proposed(self) -> Document {
        self.proposed
    }

    /// Per-key diff, present on `Change` events.
    pub fn changes(&self) -> Option<&ChangeSet> {
        self.changes.as_ref()
    }

    /// Origin of the change, present on `Change` events.
    pub fn origin(&self) -> Option<Origin> {
        self.origin
    }

    /// Failure message, present on `Error` events.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn listener_errors(&self) -> &[ListenerError] {
        &self.listener_errors
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_chain_prevented(&self) -> bool {
        self.chain.load(Ordering::SeqCst)
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Cancel the operation. Ignored on non-cancellable kinds.
    pub fn prevent_default(&mut self) {
        if !self.kind.is_cancellable() {
            debug!(kind = %self.kind, "prevent_default ignored on non-cancellable event");
            return;
        }
        self.cancelled = true;
    }

    /// Cancel the operation and hand `value` to the caller instead.
    pub fn set_result(&mut self, value: Value) {
        if !self.kind.is_cancellable() {
            debug!(kind = %self.kind, "set_result ignored on non-cancellable event");
            return;
        }
        self.cancelled = true;
        self.result = Some(value);
    }

    /// Operations started from hook code of this dispatch skip their own
    /// hook phases.
    pub fn prevent_chain(&mut self) {
        self.chain.store(true, Ordering::SeqCst);
    }

    /// Read from the proposed document.
    pub fn get(&self, path: &str) -> Result<Option<&Value>, PathError> {
        Ok(DocPath::parse(path)?.get(&self.proposed))
    }

    /// Write into the proposed document.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), PathError> {
        DocPath::parse(path)?.set(&mut self.proposed, value)
    }

    /// Deep-merge into the proposed document.
    pub fn merge(&mut self, path: &str, value: &Value) -> Result<(), PathError> {
        DocPath::parse(path)?.merge(&mut self.proposed, value)
    }

    /// Delete from the proposed document.
    pub fn delete(&mut self, path: &str) -> Result<Option<Value>, PathError> {
        Ok(DocPath::parse(path)?.delete(&mut self.proposed))
    }

    pub fn outcome(&self) -> Outcome {
        match (&self.result, self.cancelled) {
            (Some(value), _) => Outcome::Overridden(value.clone()),
            (None, true) => Outcome::Cancelled,
            (None, false) => Outcome::Continue,
        }
    }

    /// Cancellation state, so a failing hook's cancellation can be undone.
    pub(crate) fn cancellation(&self) -> (bool, Option<Value>) {
        (self.cancelled, self.result.clone())
    }

    pub(crate) fn restore_cancellation(&mut self, state: (bool, Option<Value>)) {
        self.cancelled = state.0;
        self.result = state.1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: EventKind) -> Event {
        Event::new(
            kind,
            kind.as_str(),
            json!({"a": 1}),
            json!({"a": 1, "b": {"c": 2}}),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn default_outcome_is_continue() {
        assert_eq!(event(EventKind::Write).outcome(), Outcome::Continue);
    }

    #[test]
    fn prevent_default_cancels() {
        let mut e = event(EventKind::Write);
        e.prevent_default();
        assert!(e.is_cancelled());
        assert_eq!(e.outcome(), Outcome::Cancelled);
    }

    #[test]
    fn set_result_overrides() {
        let mut e = event(EventKind::Read);
        e.set_result(json!("X"));
        assert!(e.is_cancelled());
        assert_eq!(e.outcome(), Outcome::Overridden(json!("X")));
    }

    #[test]
    fn change_events_cannot_be_cancelled() {
        let mut e = event(EventKind::Change);
        e.prevent_default();
        e.set_result(json!(1));
        assert_eq!(e.outcome(), Outcome::Continue);
    }

    #[test]
    fn path_accessors_edit_proposed_only() {
        let mut e = event(EventKind::Write);
        assert_eq!(e.get("b.c").unwrap(), Some(&json!(2)));
        e.set("b.d", json!(3)).unwrap();
        e.merge("b", &json!({"e": 4})).unwrap();
        assert_eq!(e.delete("a").unwrap(), Some(json!(1)));

        assert_eq!(e.proposed(), &json!({"b": {"c": 2, "d": 3, "e": 4}}));
        assert_eq!(e.before(), &json!({"a": 1}));
        assert!(e.set("bad..path", json!(0)).is_err());
    }

    #[test]
    fn far_index_is_an_error_not_a_panic() {
        let mut e = event(EventKind::Write);
        assert!(matches!(
            e.set("list[18446744073709551615]", json!(1)),
            Err(PathError::IndexOutOfRange { .. })
        ));
        assert!(e.merge("b.c[99999999999]", &json!({})).is_err());
        assert_eq!(e.proposed(), &json!({"a": 1, "b": {"c": 2}}));
    }

    #[test]
    fn prevent_chain_is_shared_with_scope() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut e = Event::new(EventKind::Read, "read", json!({}), json!({}), Arc::clone(&flag));
        e.prevent_chain();
        assert!(e.is_chain_prevented());
        assert!(flag.load(Ordering::SeqCst));
    }
}
