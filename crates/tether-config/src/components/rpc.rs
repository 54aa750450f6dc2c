//! RPC correlator configuration

use serde::{Deserialize, Serialize};

/// RPC dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// How many completed responses are kept for replayed request ids
    #[serde(default = "default_response_cache_capacity")]
    pub response_cache_capacity: usize,
}

fn default_response_cache_capacity() -> usize { 1000 }

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            response_cache_capacity: default_response_cache_capacity(),
        }
    }
}
