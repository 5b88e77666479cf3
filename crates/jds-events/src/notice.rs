use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jds_types::{ChangeSet, Document};

use crate::kind::{EventKind, Origin};

/// Published after a change was persisted or adopted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotice {
    pub operation: String,
    pub origin: Origin,
    pub changes: ChangeSet,
    /// The document after the change.
    pub document: Document,
    pub timestamp: DateTime<Utc>,
}

/// Published when an operation or a reconciliation failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub operation: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Published when a hook returned an error. The operation itself went on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookFailureNotice {
    pub kind: EventKind,
    pub operation: String,
    /// [`crate::Hook::name`] of the failing hook.
    pub hook: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Items on the broadcast channel of [`crate::EventPipeline`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Notice {
    Changed(ChangeNotice),
    Error(ErrorNotice),
    HookFailed(HookFailureNotice),
}
