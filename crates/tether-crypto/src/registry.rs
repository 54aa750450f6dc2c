//! Versioned key registry with rotation, pruning and optional auto-rotation.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{CryptoError, Result};
use crate::key::SecretKey;

#[derive(Debug, Clone)]
pub struct KeyVersionEntry {
    pub version: u32,
    pub key: SecretKey,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl KeyVersionEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Serialized key material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedKey {
    pub version: u32,
    /// Base64 of the raw 32-byte key
    pub key: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRegistryState {
    /// Ordered by version, oldest first
    pub keys: Vec<ExportedKey>,
    pub current_version: Option<u32>,
}

#[derive(Debug, Default)]
struct Inner {
    keys: BTreeMap<u32, KeyVersionEntry>,
    current: Option<u32>,
}

/// Ordered set of key versions. The highest added version is current.
///
/// Rotation never invalidates older versions; only pruning does.
#[derive(Debug, Default)]
pub struct KeyVersionRegistry {
    inner: RwLock<Inner>,
}

impl KeyVersionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `key` as version 1.
    pub fn with_initial_key(key: SecretKey) -> Self {
        let registry = Self::new();
        let mut inner = registry.inner.write();
        inner.keys.insert(1, Self::entry(1, key, None));
        inner.current = Some(1);
        drop(inner);
        registry
    }

    fn entry(version: u32, key: SecretKey, expires_at: Option<DateTime<Utc>>) -> KeyVersionEntry {
        KeyVersionEntry {
            version,
            key,
            created_at: Utc::now(),
            expires_at,
        }
    }

    /// Register a key under an explicit version.
    pub fn add_key(
        &self,
        version: u32,
        key: SecretKey,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.keys.contains_key(&version) {
            return Err(CryptoError::DuplicateKeyVersion(version));
        }
        inner.keys.insert(version, Self::entry(version, key, expires_at));
        if inner.current.map_or(true, |current| version > current) {
            inner.current = Some(version);
        }
        Ok(())
    }

    /// Add a fresh random key as the new highest version and return it.
    pub fn rotate(&self) -> Result<u32> {
        self.rotate_to(SecretKey::generate())
    }

    /// Add `key` as the new highest version.
    ///
    /// Fails once the highest version is `u32::MAX`; existing keys are left alone.
    pub fn rotate_to(&self, key: SecretKey) -> Result<u32> {
        let mut inner = self.inner.write();
        let version = match inner.keys.keys().next_back() {
            None => 1,
            Some(&highest) => highest
                .checked_add(1)
                .ok_or(CryptoError::KeyVersionsExhausted(highest))?,
        };
        inner.keys.insert(version, Self::entry(version, key, None));
        inner.current = Some(version);
        info!(key_version = version, "Rotated encryption key");
        Ok(version)
    }

    pub fn get(&self, version: u32) -> Option<SecretKey> {
        self.inner.read().keys.get(&version).map(|e| e.key.clone())
    }

    pub fn entry_for(&self, version: u32) -> Option<KeyVersionEntry> {
        self.inner.read().keys.get(&version).cloned()
    }

    pub fn current_version(&self) -> Option<u32> {
        self.inner.read().current
    }

    pub fn current(&self) -> Option<(u32, SecretKey)> {
        let inner = self.inner.read();
        let version = inner.current?;
        inner.keys.get(&version).map(|e| (version, e.key.clone()))
    }

    pub fn versions(&self) -> Vec<u32> {
        self.inner.read().keys.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().keys.is_empty()
    }

    /// Drop the oldest versions until at most `limit` remain.
    ///
    /// The current version always survives. Returns the pruned versions.
    pub fn prune_to_retention_limit(&self, limit: usize) -> Vec<u32> {
        let mut inner = self.inner.write();
        let limit = limit.max(1);
        let current = inner.current;
        let mut pruned = Vec::new();

        while inner.keys.len() > limit {
            let Some(oldest) = inner.keys.keys().copied().find(|v| Some(*v) != current) else {
                break;
            };
            inner.keys.remove(&oldest);
            pruned.push(oldest);
        }

        if !pruned.is_empty() {
            debug!(?pruned, "Pruned key versions beyond retention limit");
        }
        pruned
    }

    /// Drop non-current versions whose expiry has passed.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> Vec<u32> {
        let mut inner = self.inner.write();
        let current = inner.current;
        let expired: Vec<u32> = inner
            .keys
            .values()
            .filter(|e| Some(e.version) != current && e.is_expired(now))
            .map(|e| e.version)
            .collect();
        for version in &expired {
            inner.keys.remove(version);
        }
        expired
    }

    pub fn export_state(&self) -> KeyRegistryState {
        let inner = self.inner.read();
        KeyRegistryState {
            keys: inner
                .keys
                .values()
                .map(|e| ExportedKey {
                    version: e.version,
                    key: e.key.to_base64(),
                    created_at: e.created_at,
                    expires_at: e.expires_at,
                })
                .collect(),
            current_version: inner.current,
        }
    }

    /// Build a registry from exported state.
    pub fn restore(state: &KeyRegistryState) -> Result<Self> {
        let mut keys = BTreeMap::new();
        for exported in &state.keys {
            let entry = KeyVersionEntry {
                version: exported.version,
                key: SecretKey::from_base64(&exported.key)?,
                created_at: exported.created_at,
                expires_at: exported.expires_at,
            };
            if keys.insert(exported.version, entry).is_some() {
                return Err(CryptoError::DuplicateKeyVersion(exported.version));
            }
        }

        let current = match state.current_version {
            Some(version) if !keys.contains_key(&version) => {
                return Err(CryptoError::UnknownKeyVersion(version));
            }
            Some(version) => Some(version),
            None => keys.keys().next_back().copied(),
        };

        Ok(Self {
            inner: RwLock::new(Inner { keys, current }),
        })
    }

    /// Rotate every `interval` and prune down to `retention` versions.
    ///
    /// The timer stops when the returned handle is stopped or dropped, or when
    /// the registry itself is dropped.
    pub fn start_auto_rotation(
        self: &Arc<Self>,
        interval: Duration,
        retention: usize,
    ) -> AutoRotation {
        let cancel = CancellationToken::new();
        let registry: Weak<Self> = Arc::downgrade(self);
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else { break };
                        if let Err(err) = registry.rotate() {
                            error!(error = %err, "Key auto-rotation failed");
                            break;
                        }
                        registry.prune_to_retention_limit(retention);
                        registry.prune_expired(Utc::now());
                    }
                }
            }
            debug!("Key auto-rotation stopped");
        });

        AutoRotation { cancel, handle }
    }
}

/// Running auto-rotation timer. Dropping it stops the timer.
#[derive(Debug)]
pub struct AutoRotation {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl AutoRotation {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for AutoRotation {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{CipherVariant, Envelope};
    use chrono::Duration as ChronoDuration;
    use serde_json::{json, Value};

    #[test]
    fn rotation_appends_highest_version() {
        let registry = KeyVersionRegistry::with_initial_key(SecretKey::generate());
        assert_eq!(registry.current_version(), Some(1));
        assert_eq!(registry.rotate().unwrap(), 2);
        assert_eq!(registry.rotate().unwrap(), 3);
        assert_eq!(registry.versions(), vec![1, 2, 3]);
        assert!(registry.get(1).is_some());
    }

    #[test]
    fn rotation_stops_at_the_last_version() {
        let registry = KeyVersionRegistry::new();
        let last = SecretKey::generate();
        registry.add_key(u32::MAX, last.clone(), None).unwrap();

        assert!(matches!(
            registry.rotate(),
            Err(CryptoError::KeyVersionsExhausted(u32::MAX))
        ));
        assert_eq!(registry.current_version(), Some(u32::MAX));
        assert_eq!(registry.get(u32::MAX).unwrap().to_base64(), last.to_base64());
    }

    #[test]
    fn add_key_rejects_duplicates_and_tracks_highest() {
        let registry = KeyVersionRegistry::new();
        registry.add_key(4, SecretKey::generate(), None).unwrap();
        registry.add_key(2, SecretKey::generate(), None).unwrap();
        assert_eq!(registry.current_version(), Some(4));
        assert!(matches!(
            registry.add_key(4, SecretKey::generate(), None),
            Err(CryptoError::DuplicateKeyVersion(4))
        ));
    }

    #[test]
    fn old_versions_decrypt_until_pruned() {
        let envelope = Envelope::new(CipherVariant::Aead);
        let registry = KeyVersionRegistry::with_initial_key(SecretKey::generate());
        let payload = json!({ "secret": 42 });

        let old = envelope.encrypt_versioned(&registry, None, &payload).unwrap();
        for _ in 0..3 {
            registry.rotate().unwrap();
        }
        assert_eq!(
            envelope.decrypt_with_registry::<Value>(&registry, &old, None),
            Some(payload.clone())
        );

        let pruned = registry.prune_to_retention_limit(3);
        assert_eq!(pruned, vec![1]);
        assert_eq!(envelope.decrypt_with_registry::<Value>(&registry, &old, None), None);

        let fresh = envelope.encrypt_versioned(&registry, None, &payload).unwrap();
        assert_eq!(&fresh[1..3], &4u16.to_be_bytes());
        assert_eq!(
            envelope.decrypt_with_registry::<Value>(&registry, &fresh, None),
            Some(payload)
        );
    }

    #[test]
    fn legacy_bundles_use_fallback_or_version_one() {
        let envelope = Envelope::new(CipherVariant::SecretBox);
        let v1 = SecretKey::generate();
        let registry = KeyVersionRegistry::with_initial_key(v1.clone());
        registry.rotate().unwrap();

        let by_v1 = envelope.encrypt(&v1, &"hello").unwrap();
        assert_eq!(
            envelope.decrypt_with_registry::<String>(&registry, &by_v1, None),
            Some("hello".to_string())
        );

        let other = SecretKey::generate();
        let by_other = envelope.encrypt(&other, &"world").unwrap();
        assert_eq!(envelope.decrypt_with_registry::<String>(&registry, &by_other, None), None);
        assert_eq!(
            envelope.decrypt_with_registry::<String>(&registry, &by_other, Some(&other)),
            Some("world".to_string())
        );
    }

    #[test]
    fn pruning_never_drops_current() {
        let registry = KeyVersionRegistry::new();
        registry.add_key(1, SecretKey::generate(), None).unwrap();
        registry.add_key(2, SecretKey::generate(), None).unwrap();
        registry.prune_to_retention_limit(0);
        assert_eq!(registry.versions(), vec![2]);
    }

    #[test]
    fn expired_keys_are_pruned() {
        let now = Utc::now();
        let registry = KeyVersionRegistry::new();
        registry
            .add_key(1, SecretKey::generate(), Some(now - ChronoDuration::seconds(1)))
            .unwrap();
        registry.add_key(2, SecretKey::generate(), None).unwrap();

        assert_eq!(registry.prune_expired(now), vec![1]);
        assert_eq!(registry.versions(), vec![2]);
    }

    #[test]
    fn export_and_restore() {
        let registry = KeyVersionRegistry::with_initial_key(SecretKey::generate());
        registry.rotate().unwrap();
        let state = registry.export_state();

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["currentVersion"], json!(2));
        assert_eq!(json["keys"].as_array().unwrap().len(), 2);

        let restored = KeyVersionRegistry::restore(&state).unwrap();
        assert_eq!(restored.current_version(), Some(2));
        assert_eq!(restored.get(1), registry.get(1));
        assert_eq!(restored.get(2), registry.get(2));
    }

    #[test]
    fn restore_rejects_dangling_current() {
        let mut state = KeyVersionRegistry::with_initial_key(SecretKey::generate()).export_state();
        state.current_version = Some(9);
        assert!(matches!(
            KeyVersionRegistry::restore(&state),
            Err(CryptoError::UnknownKeyVersion(9))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_rotation_rotates_and_prunes() {
        let registry = Arc::new(KeyVersionRegistry::with_initial_key(SecretKey::generate()));
        let rotation = registry.start_auto_rotation(Duration::from_secs(60), 2);

        tokio::time::sleep(Duration::from_secs(60 * 3 + 1)).await;
        assert_eq!(registry.current_version(), Some(4));
        assert_eq!(registry.versions(), vec![3, 4]);

        rotation.stop();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(registry.current_version(), Some(4));
        assert!(rotation.is_finished());
    }
}
