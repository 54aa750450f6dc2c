//! Session client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Interval between `session-alive` pings
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval_ms: u64,
}

fn default_keep_alive_interval() -> u64 { 2000 }

impl SessionConfig {
    /// Keep-alive interval
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval_ms: default_keep_alive_interval(),
        }
    }
}
