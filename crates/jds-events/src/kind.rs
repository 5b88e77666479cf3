use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical event phases, one per operation kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Before a read. Hooks may observe, cancel or override; edits to the
    /// proposed document are not used, the read returns what is on disk.
    Read,
    /// Merge write.
    Write,
    /// Whole-document replace, including reset to the default data.
    Replace,
    Lock,
    Unlock,
    /// Data changed, dispatched after persistence or external adoption.
    Change,
    /// An operation or reconciliation failed.
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        Self::Read,
        Self::Write,
        Self::Replace,
        Self::Lock,
        Self::Unlock,
        Self::Change,
        Self::Error,
    ];

    /// Whether hooks may cancel or override the operation.
    pub fn is_cancellable(self) -> bool {
        !matches!(self, Self::Change | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Replace => "replace",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::Change => "change",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown event kind: {s}"))
    }
}

/// Who caused a data change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// The store's own write.
    Internal,
    /// Picked up from the backing file (another process or a manual edit).
    External,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => f.write_str("internal"),
            Self::External => f.write_str("external"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellable_kinds() {
        assert!(EventKind::Write.is_cancellable());
        assert!(EventKind::Lock.is_cancellable());
        assert!(!EventKind::Change.is_cancellable());
        assert!(!EventKind::Error.is_cancellable());
    }

    #[test]
    fn names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(kind.to_string().parse::<EventKind>().unwrap(), kind);
        }
        assert!("resetToDefault".parse::<EventKind>().is_err());
    }
}
