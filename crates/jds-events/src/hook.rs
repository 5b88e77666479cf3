use std::fmt;

use async_trait::async_trait;

use crate::error::HookError;
use crate::event::Event;

/// Handle returned by [`crate::EventPipeline::on`], used to unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(pub(crate) u64);

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hook#{}", self.0)
    }
}

/// A callback run during an event phase.
///
/// Hooks run one at a time in registration order and may await. A hook
/// can start further store operations; see [`Event::prevent_chain`] for
/// suppressing their hook phases.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Name used in logs and [`crate::ListenerError`] records.
    fn name(&self) -> &str {
        "hook"
    }

    async fn call(&self, event: &mut Event) -> Result<(), HookError>;
}

/// Adapter turning a synchronous closure into a [`Hook`].
pub struct FnHook<F> {
    name: String,
    f: F,
}

impl<F> FnHook<F> {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Wrap a closure as a hook.
///
/// ```
/// use jds_events::{hook_fn, Event, HookError};
///
/// let hook = hook_fn(|event: &mut Event| -> Result<(), HookError> {
///     event.set("touched", serde_json::json!(true))?;
///     Ok(())
/// })
/// .named("touch");
/// # let _ = hook;
/// ```
pub fn hook_fn<F>(f: F) -> FnHook<F>
where
    F: Fn(&mut Event) -> Result<(), HookError> + Send + Sync,
{
    FnHook {
        name: "fn-hook".to_string(),
        f,
    }
}

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(&mut Event) -> Result<(), HookError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, event: &mut Event) -> Result<(), HookError> {
        (self.f)(event)
    }
}
