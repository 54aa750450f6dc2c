//! Encryption envelope configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which cipher construction the envelope uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherKind {
    /// XChaCha20-Poly1305 with a 24-byte nonce
    SecretBox,
    /// AES-256-GCM with a 12-byte nonce
    #[default]
    Aead,
}

/// Key handling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// Cipher used for new bundles
    #[serde(default)]
    pub variant: CipherKind,
    /// Number of key versions kept for decrypting older bundles
    #[serde(default = "default_key_retention")]
    pub key_retention: usize,
    /// Rotate to a fresh key on this interval (disabled when unset)
    #[serde(default)]
    pub auto_rotate_interval_secs: Option<u64>,
}

fn default_key_retention() -> usize { 5 }

impl CryptoConfig {
    /// Auto-rotation interval, if enabled
    pub fn auto_rotate_interval(&self) -> Option<Duration> {
        self.auto_rotate_interval_secs.map(Duration::from_secs)
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            variant: CipherKind::default(),
            key_retention: default_key_retention(),
            auto_rotate_interval_secs: None,
        }
    }
}
