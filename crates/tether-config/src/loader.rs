//! Loading and validating the root configuration

use crate::components::{
    CryptoConfig, LoggingConfig, PermissionConfig, RpcConfig, SessionConfig, SyncConfig,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable overriding `logging.filter`
pub const ENV_LOG: &str = "TETHER_LOG";
/// Environment variable overriding `permission.timeout_ms`
pub const ENV_PERMISSION_TIMEOUT_MS: &str = "TETHER_PERMISSION_TIMEOUT_MS";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the config file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// A value is present but unusable
    #[error("Invalid configuration: {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration for the tether core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Encryption envelope and key registry
    pub crypto: CryptoConfig,
    /// State slice update retries
    pub sync: SyncConfig,
    /// RPC correlator
    pub rpc: RpcConfig,
    /// Permission broker
    pub permission: PermissionConfig,
    /// Session client
    pub session: SessionConfig,
    /// Tracing subscriber
    pub logging: LoggingConfig,
}

impl TetherConfig {
    /// Parse a TOML document. Missing sections fall back to defaults.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: TetherConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, apply environment overrides and validate.
    ///
    /// A missing file yields the default configuration.
    pub async fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Self::default().finish();
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: TetherConfig = toml::from_str(&content)?;
        config.finish()
    }

    /// Synchronous variant of [`TetherConfig::load_from_file`]
    pub fn load_from_file_sync(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default().finish();
        }

        let content = std::fs::read_to_string(path)?;
        let config: TetherConfig = toml::from_str(&content)?;
        config.finish()
    }

    fn finish(mut self) -> ConfigResult<Self> {
        self.apply_env_overrides();
        self.validate()?;
        Ok(self)
    }

    /// Apply `TETHER_*` environment overrides.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(filter) = lookup(ENV_LOG) {
            self.logging.filter = filter;
        }

        if let Some(raw) = lookup(ENV_PERMISSION_TIMEOUT_MS) {
            match raw.parse::<u64>() {
                Ok(ms) => self.permission.timeout_ms = ms,
                Err(e) => warn!(value = %raw, error = %e, "Ignoring {}", ENV_PERMISSION_TIMEOUT_MS),
            }
        }
    }

    /// Reject values the core cannot operate with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.crypto.key_retention == 0 {
            return Err(ConfigError::Invalid {
                field: "crypto.key_retention",
                reason: "must keep at least the current key".into(),
            });
        }
        if self.crypto.auto_rotate_interval_secs == Some(0) {
            return Err(ConfigError::Invalid {
                field: "crypto.auto_rotate_interval_secs",
                reason: "must be positive".into(),
            });
        }
        if self.sync.initial_backoff_ms > self.sync.max_backoff_ms {
            return Err(ConfigError::Invalid {
                field: "sync.initial_backoff_ms",
                reason: format!(
                    "{} exceeds max_backoff_ms {}",
                    self.sync.initial_backoff_ms, self.sync.max_backoff_ms
                ),
            });
        }
        if self.sync.max_attempts == Some(0) {
            return Err(ConfigError::Invalid {
                field: "sync.max_attempts",
                reason: "must allow at least one attempt".into(),
            });
        }
        if self.permission.correlation_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "permission.correlation_attempts",
                reason: "must allow at least one attempt".into(),
            });
        }
        if self.permission.completed_capacity == 0 || self.permission.tool_call_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "permission",
                reason: "capacities must be positive".into(),
            });
        }
        if self.rpc.response_cache_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "rpc.response_cache_capacity",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::CipherKind;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn empty_document_uses_defaults() {
        let config = TetherConfig::from_toml_str("").unwrap();
        assert_eq!(config.crypto.variant, CipherKind::Aead);
        assert_eq!(config.crypto.key_retention, 5);
        assert_eq!(config.sync.initial_backoff(), Duration::from_millis(250));
        assert_eq!(config.permission.timeout(), Duration::from_secs(300));
        assert_eq!(config.rpc.response_cache_capacity, 1000);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = TetherConfig::from_toml_str(
            r#"
            [crypto]
            variant = "secret_box"

            [permission]
            timeout_ms = 1500
            "#,
        )
        .unwrap();

        assert_eq!(config.crypto.variant, CipherKind::SecretBox);
        assert_eq!(config.crypto.key_retention, 5);
        assert_eq!(config.permission.timeout(), Duration::from_millis(1500));
        assert_eq!(config.permission.correlation_attempts, 8);
    }

    #[test]
    fn rejects_inverted_backoff() {
        let err = TetherConfig::from_toml_str(
            r#"
            [sync]
            initial_backoff_ms = 5000
            max_backoff_ms = 10
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "sync.initial_backoff_ms", .. }));
    }

    #[test]
    fn rejects_zero_retention() {
        let err = TetherConfig::from_toml_str("[crypto]\nkey_retention = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "crypto.key_retention", .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            (ENV_LOG, "debug,tether_rpc=trace"),
            (ENV_PERMISSION_TIMEOUT_MS, "42"),
        ]
        .into_iter()
        .collect();

        let mut config = TetherConfig::default();
        config.apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.logging.filter, "debug,tether_rpc=trace");
        assert_eq!(config.permission.timeout_ms, 42);
    }

    #[test]
    fn bad_env_value_is_ignored() {
        let mut config = TetherConfig::default();
        config.apply_overrides_from(|key| {
            (key == ENV_PERMISSION_TIMEOUT_MS).then(|| "soon".to_string())
        });
        assert_eq!(config.permission.timeout_ms, PermissionConfig::default().timeout_ms);
    }

    #[tokio::test]
    async fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(&path, "[session]\nkeep_alive_interval_ms = 500\n").unwrap();

        let config = TetherConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.session.keep_alive_interval(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TetherConfig::load_from_file(dir.path().join("absent.toml"))
            .await
            .unwrap();
        assert_eq!(config.sync.max_backoff_ms, 1000);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(&path, "[crypto\nvariant = ").unwrap();
        assert!(matches!(
            TetherConfig::load_from_file_sync(&path),
            Err(ConfigError::TomlParse(_))
        ));
    }
}
