//! Tool permission broker configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Permission broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionConfig {
    /// How long an approval request waits for the remote decision
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Completed decisions retained in agent state
    #[serde(default = "default_capacity")]
    pub completed_capacity: usize,
    /// Observed tool calls retained for correlation
    #[serde(default = "default_capacity")]
    pub tool_call_capacity: usize,
    /// Correlation lookups before giving up
    #[serde(default = "default_correlation_attempts")]
    pub correlation_attempts: u32,
    /// First delay between correlation lookups (doubles each attempt)
    #[serde(default = "default_correlation_initial_delay")]
    pub correlation_initial_delay_ms: u64,
}

fn default_timeout() -> u64 { 5 * 60 * 1000 }
fn default_capacity() -> usize { 1000 }
fn default_correlation_attempts() -> u32 { 8 }
fn default_correlation_initial_delay() -> u64 { 10 }

impl PermissionConfig {
    /// Decision timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// First correlation retry delay
    pub fn correlation_initial_delay(&self) -> Duration {
        Duration::from_millis(self.correlation_initial_delay_ms)
    }
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout(),
            completed_capacity: default_capacity(),
            tool_call_capacity: default_capacity(),
            correlation_attempts: default_correlation_attempts(),
            correlation_initial_delay_ms: default_correlation_initial_delay(),
        }
    }
}
