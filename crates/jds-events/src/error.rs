use jds_types::PathError;

/// Failure reported by a hook.
///
/// Hook failures never abort dispatch; they are recorded on the event as a
/// [`crate::ListenerError`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HookError {
    message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<PathError> for HookError {
    fn from(err: PathError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for HookError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HookError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
