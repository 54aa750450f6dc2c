//! State synchronization configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for optimistic state updates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// First backoff delay after a version mismatch or transport failure
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    /// Upper bound for the exponential backoff delay
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Give up after this many attempts (retry forever when unset)
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Fail slice updates that wait longer than this for the slice lock
    #[serde(default)]
    pub lock_timeout_ms: Option<u64>,
}

fn default_initial_backoff() -> u64 { 250 }
fn default_max_backoff() -> u64 { 1000 }

impl SyncConfig {
    /// First backoff delay
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Maximum backoff delay
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Lock acquisition timeout, if any
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            max_attempts: None,
            lock_timeout_ms: None,
        }
    }
}
