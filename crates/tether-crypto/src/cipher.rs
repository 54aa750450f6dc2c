//! String-in, string-out sealing for the layers above the envelope.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tether_config::CryptoConfig;
use tracing::warn;

use crate::envelope::{CipherVariant, Envelope};
use crate::error::Result;
use crate::key::SecretKey;
use crate::registry::KeyVersionRegistry;

/// Where the session key comes from.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// One key for the session; bundles are format 0.
    Fixed(SecretKey),
    /// Shared rotating registry; bundles are format 1.
    Registry(Arc<KeyVersionRegistry>),
}

/// An [`Envelope`] bound to a key source.
#[derive(Debug, Clone)]
pub struct SessionCipher {
    envelope: Envelope,
    keys: KeySource,
}

impl SessionCipher {
    pub fn new(envelope: Envelope, keys: KeySource) -> Self {
        Self { envelope, keys }
    }

    pub fn from_config(config: &CryptoConfig, keys: KeySource) -> Self {
        Self::new(Envelope::new(config.variant.into()), keys)
    }

    pub fn with_key(variant: CipherVariant, key: SecretKey) -> Self {
        Self::new(Envelope::new(variant), KeySource::Fixed(key))
    }

    pub fn with_registry(variant: CipherVariant, registry: Arc<KeyVersionRegistry>) -> Self {
        Self::new(Envelope::new(variant), KeySource::Registry(registry))
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn keys(&self) -> &KeySource {
        &self.keys
    }

    /// Encrypt `value` and encode the bundle as base64.
    pub fn seal<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        let bundle = match &self.keys {
            KeySource::Fixed(key) => self.envelope.encrypt(key, value)?,
            KeySource::Registry(registry) => self.envelope.encrypt_versioned(registry, None, value)?,
        };
        Ok(STANDARD.encode(bundle))
    }

    /// Decode and decrypt. Anything that fails comes back as `None`.
    pub fn open<T: DeserializeOwned>(&self, sealed: &str) -> Option<T> {
        let Ok(bundle) = STANDARD.decode(sealed) else {
            warn!("Dropping payload that is not valid base64");
            return None;
        };

        let opened = match &self.keys {
            KeySource::Fixed(key) => self.envelope.decrypt(key, &bundle),
            KeySource::Registry(registry) => {
                self.envelope.decrypt_with_registry(registry, &bundle, None)
            }
        };
        if opened.is_none() {
            warn!(len = bundle.len(), "Dropping payload that failed to decrypt");
        }
        opened
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tether_config::CipherKind;

    #[test]
    fn fixed_key_round_trip() {
        let cipher = SessionCipher::with_key(CipherVariant::SecretBox, SecretKey::generate());
        let sealed = cipher.seal(&json!({ "a": 1 })).unwrap();
        assert_eq!(cipher.open::<Value>(&sealed), Some(json!({ "a": 1 })));
    }

    #[test]
    fn registry_source_survives_rotation() {
        let registry = Arc::new(KeyVersionRegistry::with_initial_key(SecretKey::generate()));
        let cipher = SessionCipher::with_registry(CipherVariant::Aead, registry.clone());

        let sealed = cipher.seal("before").unwrap();
        registry.rotate().unwrap();
        assert_eq!(cipher.open::<String>(&sealed), Some("before".to_string()));
    }

    #[test]
    fn garbage_opens_to_none() {
        let cipher = SessionCipher::with_key(CipherVariant::Aead, SecretKey::generate());
        assert_eq!(cipher.open::<Value>("not base64 !!"), None);
        assert_eq!(cipher.open::<Value>(&STANDARD.encode([0u8; 40])), None);
    }

    #[test]
    fn mismatched_sessions_cannot_read_each_other() {
        let a = SessionCipher::with_key(CipherVariant::Aead, SecretKey::generate());
        let b = SessionCipher::with_key(CipherVariant::Aead, SecretKey::generate());
        let sealed = a.seal(&42).unwrap();
        assert_eq!(b.open::<i32>(&sealed), None);
    }

    #[test]
    fn variant_follows_config() {
        let config = CryptoConfig {
            variant: CipherKind::SecretBox,
            ..CryptoConfig::default()
        };
        let cipher = SessionCipher::from_config(&config, KeySource::Fixed(SecretKey::generate()));
        assert_eq!(cipher.envelope().variant(), CipherVariant::SecretBox);
    }
}
