use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use jds_types::{diff_top_level, Document};

use crate::event::{Event, ListenerError, Outcome};
use crate::hook::{Hook, HookId};
use crate::kind::{EventKind, Origin};
use crate::notice::{ChangeNotice, ErrorNotice, HookFailureNotice, Notice};

tokio::task_local! {
    static DISPATCH_SCOPE: DispatchScope;
}

/// Task-local context active while a hook runs.
///
/// Operations invoked from hook code look this up to detect re-entrancy on
/// their own store and to check whether an enclosing hook suppressed the
/// chain.
#[derive(Clone, Debug)]
pub struct DispatchScope {
    owner: u64,
    kind: EventKind,
    suppressed: Arc<AtomicBool>,
    parent: Option<Box<DispatchScope>>,
}

impl DispatchScope {
    /// Id of the pipeline (store) whose hook is running.
    pub fn owner(&self) -> u64 {
        self.owner
    }

    /// Kind of the event being dispatched.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Whether this dispatch or any enclosing one called `prevent_chain`.
    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.is_suppressed())
    }
}

/// The scope of the hook currently running on this task, if any.
pub fn current_scope() -> Option<DispatchScope> {
    DISPATCH_SCOPE.try_with(|scope| scope.clone()).ok()
}

/// Result of [`EventPipeline::dispatch`].
#[derive(Debug)]
pub struct Dispatched {
    pub event: Event,
    pub outcome: Outcome,
}

struct Registered {
    id: HookId,
    hook: Arc<dyn Hook>,
}

/// Hook registry and dispatcher for one store instance.
pub struct EventPipeline {
    owner: u64,
    next_id: AtomicU64,
    hooks: RwLock<BTreeMap<EventKind, Vec<Registered>>>,
    notices: broadcast::Sender<Notice>,
}

impl EventPipeline {
    /// Create a pipeline owned by the store with id `owner`.
    pub fn new(owner: u64, capacity: usize) -> Self {
        let (notices, _) = broadcast::channel(capacity.max(1));
        Self {
            owner,
            next_id: AtomicU64::new(1),
            hooks: RwLock::new(BTreeMap::new()),
            notices,
        }
    }

    pub fn owner(&self) -> u64 {
        self.owner
    }

    /// Register a hook for `kind`. Hooks run in registration order.
    pub fn on<H: Hook + 'static>(&self, kind: EventKind, hook: H) -> HookId {
        self.on_arc(kind, Arc::new(hook))
    }

    /// Register a shared hook for `kind`.
    pub fn on_arc(&self, kind: EventKind, hook: Arc<dyn Hook>) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(%kind, %id, name = hook.name(), "hook registered");
        self.hooks
            .write()
            .expect("hook registry poisoned")
            .entry(kind)
            .or_default()
            .push(Registered { id, hook });
        id
    }

    /// Unregister a hook. Returns `true` if it was registered for `kind`.
    pub fn off(&self, kind: EventKind, id: HookId) -> bool {
        let mut hooks = self.hooks.write().expect("hook registry poisoned");
        let Some(list) = hooks.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.id != id);
        before != list.len()
    }

    pub fn hook_count(&self, kind: EventKind) -> usize {
        self.hooks
            .read()
            .expect("hook registry poisoned")
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Subscribe to change and error notices.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Run the hooks registered for `kind` over a fresh event.
    pub async fn dispatch(
        &self,
        kind: EventKind,
        operation: &str,
        before: Document,
        proposed: Document,
    ) -> Dispatched {
        let flag = Arc::new(AtomicBool::new(false));
        let event = Event::new(kind, operation, before, proposed, Arc::clone(&flag));
        self.run(event, flag).await
    }

    async fn run(&self, mut event: Event, flag: Arc<AtomicBool>) -> Dispatched {
        // Snapshot so hooks may (un)register hooks while dispatch runs.
        let hooks: Vec<(HookId, Arc<dyn Hook>)> = self
            .hooks
            .read()
            .expect("hook registry poisoned")
            .get(&event.kind())
            .map(|list| list.iter().map(|r| (r.id, Arc::clone(&r.hook))).collect())
            .unwrap_or_default();

        let scope = DispatchScope {
            owner: self.owner,
            kind: event.kind(),
            suppressed: flag,
            parent: current_scope().map(Box::new),
        };

        for (id, hook) in hooks {
            let cancellation = event.cancellation();
            let result = DISPATCH_SCOPE
                .scope(scope.clone(), hook.call(&mut event))
                .await;
            if let Err(e) = result {
                warn!(
                    kind = %event.kind(),
                    operation = event.operation(),
                    %id,
                    hook = hook.name(),
                    error = %e,
                    "hook failed"
                );
                event.restore_cancellation(cancellation);
                let _ = self.notices.send(Notice::HookFailed(HookFailureNotice {
                    kind: event.kind(),
                    operation: event.operation().to_string(),
                    hook: hook.name().to_string(),
                    message: e.to_string(),
                    timestamp: Utc::now(),
                }));
                event.listener_errors.push(ListenerError {
                    hook: hook.name().to_string(),
                    message: e.to_string(),
                });
            }
        }

        let outcome = event.outcome();
        if !outcome.is_continue() {
            debug!(kind = %event.kind(), operation = event.operation(), ?outcome, "operation cancelled by hook");
        }
        Dispatched { event, outcome }
    }

    /// Emit the "data changed" notification for `before → after`.
    ///
    /// Returns `None` (and notifies nobody) when nothing changed. With
    /// `run_hooks == false` only the broadcast notice is sent.
    pub async fn notify_change(
        &self,
        operation: &str,
        origin: Origin,
        before: &Document,
        after: &Document,
        run_hooks: bool,
    ) -> Option<ChangeNotice> {
        let changes = diff_top_level(before, after);
        if changes.is_empty() {
            return None;
        }

        let notice = ChangeNotice {
            operation: operation.to_string(),
            origin,
            changes: changes.clone(),
            document: after.clone(),
            timestamp: Utc::now(),
        };
        debug!(operation, %origin, keys = changes.len(), "data changed");

        if run_hooks {
            let flag = Arc::new(AtomicBool::new(false));
            let event = Event::new(
                EventKind::Change,
                operation,
                before.clone(),
                after.clone(),
                Arc::clone(&flag),
            )
            .with_change(changes, origin);
            self.run(event, flag).await;
        }

        // No receivers is fine.
        let _ = self.notices.send(Notice::Changed(notice.clone()));
        Some(notice)
    }

    /// Emit an error notification.
    pub async fn notify_error(&self, operation: &str, message: String, run_hooks: bool) {
        if run_hooks {
            let flag = Arc::new(AtomicBool::new(false));
            let event = Event::new(
                EventKind::Error,
                operation,
                Document::Null,
                Document::Null,
                Arc::clone(&flag),
            )
            .with_error(message.clone());
            self.run(event, flag).await;
        }
        let _ = self.notices.send(Notice::Error(ErrorNotice {
            operation: operation.to_string(),
            message,
            timestamp: Utc::now(),
        }));
    }
}

impl std::fmt::Debug for EventPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks = self.hooks.read().expect("hook registry poisoned");
        let counts: BTreeMap<EventKind, usize> =
            hooks.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventPipeline")
            .field("owner", &self.owner)
            .field("hooks", &counts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HookError;
    use crate::hook::hook_fn;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    fn pipeline() -> EventPipeline {
        EventPipeline::new(7, 16)
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let p = pipeline();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = Arc::clone(&seen);
            p.on(
                EventKind::Write,
                hook_fn(move |_e: &mut Event| -> Result<(), HookError> {
                    seen.lock().unwrap().push(i);
                    Ok(())
                }),
            );
        }
        let d = p.dispatch(EventKind::Write, "write", json!({}), json!({})).await;
        assert_eq!(d.outcome, Outcome::Continue);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn hooks_mutate_proposed_and_later_hooks_see_it() {
        let p = pipeline();
        p.on(
            EventKind::Write,
            hook_fn(|e: &mut Event| -> Result<(), HookError> {
                e.set("stamp", json!(1))?;
                Ok(())
            }),
        );
        p.on(
            EventKind::Write,
            hook_fn(|e: &mut Event| -> Result<(), HookError> {
                let stamp = e.get("stamp")?.cloned().unwrap_or_default();
                e.set("copy", stamp)?;
                Ok(())
            }),
        );
        let d = p.dispatch(EventKind::Write, "write", json!({}), json!({"a": 1})).await;
        assert_eq!(d.event.proposed(), &json!({"a": 1, "stamp": 1, "copy": 1}));
    }

    #[tokio::test]
    async fn failing_hook_is_recorded_and_does_not_cancel() {
        let p = pipeline();
        p.on(
            EventKind::Write,
            hook_fn(|e: &mut Event| -> Result<(), HookError> {
                e.prevent_default();
                Err("boom".into())
            })
            .named("broken"),
        );
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        p.on(
            EventKind::Write,
            hook_fn(move |_e: &mut Event| -> Result<(), HookError> {
                ran2.store(true, Ordering::SeqCst);
                Ok(())
            }),
        );

        let mut rx = p.subscribe();
        let d = p.dispatch(EventKind::Write, "write", json!({}), json!({})).await;
        assert_eq!(d.outcome, Outcome::Continue);
        assert!(ran.load(Ordering::SeqCst));
        match rx.try_recv().unwrap() {
            Notice::HookFailed(n) => {
                assert_eq!(n.kind, EventKind::Write);
                assert_eq!(n.hook, "broken");
                assert_eq!(n.message, "boom");
            }
            other => panic!("expected hook failure notice, got {other:?}"),
        }
        assert_eq!(
            d.event.listener_errors(),
            &[ListenerError {
                hook: "broken".into(),
                message: "boom".into()
            }]
        );
    }

    #[tokio::test]
    async fn set_result_overrides_outcome() {
        let p = pipeline();
        p.on(
            EventKind::Write,
            hook_fn(|e: &mut Event| -> Result<(), HookError> {
                e.set_result(json!("X"));
                Ok(())
            }),
        );
        let d = p.dispatch(EventKind::Write, "write", json!({}), json!({})).await;
        assert_eq!(d.outcome, Outcome::Overridden(json!("X")));
    }

    #[tokio::test]
    async fn off_unregisters() {
        let p = pipeline();
        let id = p.on(
            EventKind::Read,
            hook_fn(|e: &mut Event| -> Result<(), HookError> {
                e.prevent_default();
                Ok(())
            }),
        );
        assert_eq!(p.hook_count(EventKind::Read), 1);
        assert!(p.off(EventKind::Read, id));
        assert!(!p.off(EventKind::Read, id));
        assert!(!p.off(EventKind::Write, id));

        let d = p.dispatch(EventKind::Read, "read", json!({}), json!({})).await;
        assert_eq!(d.outcome, Outcome::Continue);
    }

    struct ScopeProbe {
        seen: Arc<Mutex<Vec<(u64, bool)>>>,
    }

    #[async_trait]
    impl Hook for ScopeProbe {
        async fn call(&self, event: &mut Event) -> Result<(), HookError> {
            let before = current_scope().unwrap();
            event.prevent_chain();
            let after = current_scope().unwrap();
            let mut seen = self.seen.lock().unwrap();
            seen.push((before.owner(), before.is_suppressed()));
            seen.push((after.owner(), after.is_suppressed()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn scope_is_visible_to_hooks_only() {
        let p = pipeline();
        let seen = Arc::new(Mutex::new(Vec::new()));
        p.on(EventKind::Read, ScopeProbe { seen: Arc::clone(&seen) });

        assert!(current_scope().is_none());
        p.dispatch(EventKind::Read, "read", json!({}), json!({})).await;
        assert!(current_scope().is_none());
        assert_eq!(*seen.lock().unwrap(), vec![(7, false), (7, true)]);
    }

    #[tokio::test]
    async fn change_notice_skips_empty_diff() {
        let p = pipeline();
        let mut rx = p.subscribe();
        let doc = json!({"a": 1});
        assert!(p
            .notify_change("write", Origin::Internal, &doc, &doc, true)
            .await
            .is_none());
        assert!(rx.try_recv().is_err());

        let notice = p
            .notify_change("write", Origin::External, &doc, &json!({"a": 2}), true)
            .await
            .unwrap();
        assert_eq!(notice.origin, Origin::External);
        match rx.try_recv().unwrap() {
            Notice::Changed(n) => assert_eq!(n.changes.len(), 1),
            other => panic!("expected change notice, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn change_hooks_receive_diff_and_origin() {
        let p = pipeline();
        let seen = Arc::new(Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        p.on(
            EventKind::Change,
            hook_fn(move |e: &mut Event| -> Result<(), HookError> {
                *seen2.lock().unwrap() = Some((e.origin(), e.changes().cloned()));
                Ok(())
            }),
        );
        p.notify_change("watch", Origin::External, &json!({}), &json!({"k": true}), true)
            .await;
        let (origin, changes) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(origin, Some(Origin::External));
        assert!(changes.unwrap().get("k").unwrap().is_added());
    }

    #[tokio::test]
    async fn error_notice_reaches_hooks_and_channel() {
        let p = pipeline();
        let mut rx = p.subscribe();
        let seen = Arc::new(Mutex::new(String::new()));
        let seen2 = Arc::clone(&seen);
        p.on(
            EventKind::Error,
            hook_fn(move |e: &mut Event| -> Result<(), HookError> {
                *seen2.lock().unwrap() = e.error().unwrap_or_default().to_string();
                Ok(())
            }),
        );
        p.notify_error("write", "disk full".into(), true).await;
        assert_eq!(*seen.lock().unwrap(), "disk full");
        assert!(matches!(rx.try_recv().unwrap(), Notice::Error(n) if n.message == "disk full"));
    }
}
