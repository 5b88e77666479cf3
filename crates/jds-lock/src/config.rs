use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing knobs for the lock manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Age after which an existing marker is presumed abandoned.
    pub stale_after_ms: u64,
    /// Pause between attempts while the marker is held by someone else.
    pub retry_delay_ms: u64,
    /// Total time to keep trying before failing with a timeout.
    pub timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 30_000,
            retry_delay_ms: 25,
            timeout_ms: 10_000,
        }
    }
}

impl LockConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
