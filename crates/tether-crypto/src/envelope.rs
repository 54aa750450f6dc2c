//! Bundle format and the two cipher variants.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tether_config::CipherKind;
use tracing::debug;

use crate::error::{CryptoError, Result};
use crate::key::SecretKey;
use crate::nonce::NonceGenerator;
use crate::registry::KeyVersionRegistry;

/// Bundle without an embedded key identity.
pub const FORMAT_LEGACY: u8 = 0;
/// Bundle carrying a big-endian u16 key version after the tag byte.
pub const FORMAT_KEYED: u8 = 1;
/// Poly1305 and GCM both produce 16-byte tags.
pub const TAG_LEN: usize = 16;

const LENGTH_PREFIX: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherVariant {
    /// XChaCha20-Poly1305, 24-byte nonce.
    SecretBox,
    /// AES-256-GCM, 12-byte nonce.
    Aead,
}

impl CipherVariant {
    pub const fn nonce_len(self) -> usize {
        match self {
            CipherVariant::SecretBox => 24,
            CipherVariant::Aead => 12,
        }
    }
}

impl From<CipherKind> for CipherVariant {
    fn from(kind: CipherKind) -> Self {
        match kind {
            CipherKind::SecretBox => CipherVariant::SecretBox,
            CipherKind::Aead => CipherVariant::Aead,
        }
    }
}

/// Parsed form of an encrypted bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub format_version: u8,
    pub key_version: Option<u16>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub auth_tag: [u8; TAG_LEN],
}

impl EncryptedEnvelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            3 + self.nonce.len() + self.ciphertext.len() + TAG_LEN,
        );
        out.push(self.format_version);
        if let Some(version) = self.key_version {
            out.extend_from_slice(&version.to_be_bytes());
        }
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.auth_tag);
        out
    }

    /// Split raw bytes into their fields. `None` for unknown tags or short input.
    pub fn parse(bytes: &[u8], variant: CipherVariant) -> Option<Self> {
        let (&format_version, rest) = bytes.split_first()?;
        let (key_version, rest) = match format_version {
            FORMAT_LEGACY => (None, rest),
            FORMAT_KEYED => {
                if rest.len() < 2 {
                    return None;
                }
                let (raw, rest) = rest.split_at(2);
                (Some(u16::from_be_bytes([raw[0], raw[1]])), rest)
            }
            _ => return None,
        };

        let nonce_len = variant.nonce_len();
        if rest.len() < nonce_len + TAG_LEN {
            return None;
        }
        let (nonce, rest) = rest.split_at(nonce_len);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

        let mut auth_tag = [0u8; TAG_LEN];
        auth_tag.copy_from_slice(tag);

        Some(Self {
            format_version,
            key_version,
            nonce: nonce.to_vec(),
            ciphertext: ciphertext.to_vec(),
            auth_tag,
        })
    }
}

/// Encrypts and decrypts structured values with one cipher variant.
#[derive(Debug, Clone)]
pub struct Envelope {
    variant: CipherVariant,
    nonces: NonceGenerator,
}

impl Envelope {
    pub fn new(variant: CipherVariant) -> Self {
        Self::with_nonce_generator(variant, NonceGenerator::new())
    }

    pub fn with_nonce_generator(variant: CipherVariant, nonces: NonceGenerator) -> Self {
        Self { variant, nonces }
    }

    pub fn variant(&self) -> CipherVariant {
        self.variant
    }

    pub fn nonce_generator(&self) -> &NonceGenerator {
        &self.nonces
    }

    /// Encrypt under a bare key. Always emits a format 0 bundle.
    pub fn encrypt<T: Serialize + ?Sized>(&self, key: &SecretKey, value: &T) -> Result<Vec<u8>> {
        self.seal(key, None, value)
    }

    /// Encrypt under `key` and stamp `key_version` into a format 1 bundle.
    pub fn encrypt_with_version<T: Serialize + ?Sized>(
        &self,
        key: &SecretKey,
        key_version: u32,
        value: &T,
    ) -> Result<Vec<u8>> {
        let embedded = u16::try_from(key_version)
            .map_err(|_| CryptoError::KeyVersionOutOfRange(key_version))?;
        self.seal(key, Some(embedded), value)
    }

    /// Encrypt with a registry key, the current one unless `version` is given.
    pub fn encrypt_versioned<T: Serialize + ?Sized>(
        &self,
        registry: &KeyVersionRegistry,
        version: Option<u32>,
        value: &T,
    ) -> Result<Vec<u8>> {
        let (version, key) = match version {
            Some(v) => (v, registry.get(v).ok_or(CryptoError::UnknownKeyVersion(v))?),
            None => registry.current().ok_or(CryptoError::NoCurrentKey)?,
        };
        self.encrypt_with_version(&key, version, value)
    }

    /// Decrypt with a caller-supplied key, whatever the bundle format.
    pub fn decrypt<T: DeserializeOwned>(&self, key: &SecretKey, bundle: &[u8]) -> Option<T> {
        let envelope = EncryptedEnvelope::parse(bundle, self.variant)?;
        self.open(key, &envelope)
    }

    /// Decrypt by the key the bundle names.
    ///
    /// Format 0 bundles use `fallback`, or registry version 1 without one.
    /// Format 1 bundles whose version was pruned yield `None`.
    pub fn decrypt_with_registry<T: DeserializeOwned>(
        &self,
        registry: &KeyVersionRegistry,
        bundle: &[u8],
        fallback: Option<&SecretKey>,
    ) -> Option<T> {
        let envelope = EncryptedEnvelope::parse(bundle, self.variant)?;
        let key = match envelope.key_version {
            Some(version) => match registry.get(u32::from(version)) {
                Some(key) => key,
                None => {
                    debug!(key_version = version, "Bundle names an unknown or pruned key");
                    return None;
                }
            },
            None => match fallback {
                Some(key) => key.clone(),
                None => registry.get(1)?,
            },
        };
        self.open(&key, &envelope)
    }

    fn seal<T: Serialize + ?Sized>(
        &self,
        key: &SecretKey,
        key_version: Option<u16>,
        value: &T,
    ) -> Result<Vec<u8>> {
        let plaintext = frame(value)?;
        let nonce = self.nonces.generate(self.variant.nonce_len())?;

        let mut sealed = match self.variant {
            CipherVariant::Aead => aead::encrypt(key, &nonce, &plaintext)?,
            CipherVariant::SecretBox => secret_box::encrypt(key, &nonce, &plaintext)?,
        };
        let tag_start = sealed.len() - TAG_LEN;
        let mut auth_tag = [0u8; TAG_LEN];
        auth_tag.copy_from_slice(&sealed[tag_start..]);
        sealed.truncate(tag_start);

        let envelope = EncryptedEnvelope {
            format_version: if key_version.is_some() { FORMAT_KEYED } else { FORMAT_LEGACY },
            key_version,
            nonce,
            ciphertext: sealed,
            auth_tag,
        };
        Ok(envelope.to_bytes())
    }

    fn open<T: DeserializeOwned>(&self, key: &SecretKey, envelope: &EncryptedEnvelope) -> Option<T> {
        let mut sealed = Vec::with_capacity(envelope.ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(&envelope.ciphertext);
        sealed.extend_from_slice(&envelope.auth_tag);

        let plaintext = match self.variant {
            CipherVariant::Aead => aead::decrypt(key, &envelope.nonce, &sealed),
            CipherVariant::SecretBox => secret_box::decrypt(key, &envelope.nonce, &sealed),
        }?;
        unframe(&plaintext)
    }
}

/// u32 big-endian length prefix followed by the JSON encoding.
fn frame<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(value)?;
    let len = u32::try_from(body.len()).map_err(|_| CryptoError::PlaintextTooLarge(body.len()))?;

    let mut framed = Vec::with_capacity(LENGTH_PREFIX + body.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&body);
    Ok(framed)
}

fn unframe<T: DeserializeOwned>(framed: &[u8]) -> Option<T> {
    if framed.len() < LENGTH_PREFIX {
        return None;
    }
    let (prefix, body) = framed.split_at(LENGTH_PREFIX);
    let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if len != body.len() {
        return None;
    }
    serde_json::from_slice(body).ok()
}

mod aead {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};

    use crate::error::{CryptoError, Result};
    use crate::key::SecretKey;

    pub(super) fn encrypt(key: &SecretKey, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Cipher)?;
        cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|_| CryptoError::Cipher)
    }

    pub(super) fn decrypt(key: &SecretKey, nonce: &[u8], sealed: &[u8]) -> Option<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).ok()?;
        cipher.decrypt(Nonce::from_slice(nonce), sealed).ok()
    }
}

mod secret_box {
    use chacha20poly1305::aead::{Aead, KeyInit};
    use chacha20poly1305::{XChaCha20Poly1305, XNonce};

    use crate::error::{CryptoError, Result};
    use crate::key::SecretKey;

    pub(super) fn encrypt(key: &SecretKey, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher =
            XChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Cipher)?;
        cipher
            .encrypt(XNonce::from_slice(nonce), plaintext)
            .map_err(|_| CryptoError::Cipher)
    }

    pub(super) fn decrypt(key: &SecretKey, nonce: &[u8], sealed: &[u8]) -> Option<Vec<u8>> {
        let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes()).ok()?;
        cipher.decrypt(XNonce::from_slice(nonce), sealed).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonce::COUNTER_LEN;
    use serde_json::{json, Value};

    const VARIANTS: [CipherVariant; 2] = [CipherVariant::SecretBox, CipherVariant::Aead];

    fn sample() -> Value {
        json!({ "tool": "Bash", "input": { "command": "ls -la" }, "n": [1, 2, 3] })
    }

    #[test]
    fn round_trip_both_variants() {
        for variant in VARIANTS {
            let envelope = Envelope::new(variant);
            let key = SecretKey::generate();
            let bundle = envelope.encrypt(&key, &sample()).unwrap();

            assert_eq!(bundle[0], FORMAT_LEGACY);
            assert_eq!(envelope.decrypt::<Value>(&key, &bundle), Some(sample()));
        }
    }

    #[test]
    fn any_flipped_byte_fails_closed() {
        for variant in VARIANTS {
            let envelope = Envelope::new(variant);
            let key = SecretKey::generate();
            let bundle = envelope.encrypt(&key, &sample()).unwrap();

            for i in 0..bundle.len() {
                let mut tampered = bundle.clone();
                tampered[i] ^= 0x01;
                assert_eq!(
                    envelope.decrypt::<Value>(&key, &tampered),
                    None,
                    "{variant:?} byte {i}"
                );
            }
        }
    }

    #[test]
    fn wrong_key_fails_closed() {
        for variant in VARIANTS {
            let envelope = Envelope::new(variant);
            let bundle = envelope.encrypt(&SecretKey::generate(), &sample()).unwrap();
            assert_eq!(envelope.decrypt::<Value>(&SecretKey::generate(), &bundle), None);
        }
    }

    #[test]
    fn garbage_and_truncation_fail_closed() {
        let envelope = Envelope::new(CipherVariant::Aead);
        let key = SecretKey::generate();
        let bundle = envelope.encrypt(&key, &sample()).unwrap();

        assert_eq!(envelope.decrypt::<Value>(&key, &[]), None);
        assert_eq!(envelope.decrypt::<Value>(&key, &[9, 9, 9]), None);
        assert_eq!(envelope.decrypt::<Value>(&key, &bundle[..bundle.len() - 1]), None);
    }

    #[test]
    fn keyed_bundle_layout() {
        let envelope = Envelope::new(CipherVariant::Aead);
        let key = SecretKey::generate();
        let bundle = envelope.encrypt_with_version(&key, 0x0102, &sample()).unwrap();

        let parsed = EncryptedEnvelope::parse(&bundle, CipherVariant::Aead).unwrap();
        assert_eq!(parsed.format_version, FORMAT_KEYED);
        assert_eq!(parsed.key_version, Some(0x0102));
        assert_eq!(&bundle[1..3], &[0x01, 0x02]);
        assert_eq!(parsed.nonce.len(), 12);
        assert_eq!(parsed.to_bytes(), bundle);
    }

    #[test]
    fn key_version_must_fit_u16() {
        let envelope = Envelope::new(CipherVariant::SecretBox);
        let err = envelope
            .encrypt_with_version(&SecretKey::generate(), 70_000, &sample())
            .unwrap_err();
        assert!(matches!(err, CryptoError::KeyVersionOutOfRange(70_000)));
    }

    #[test]
    fn embedded_counters_are_sequential() {
        let envelope = Envelope::new(CipherVariant::SecretBox);
        let key = SecretKey::generate();

        for expected in 0..100u64 {
            let bundle = envelope.encrypt(&key, &expected).unwrap();
            let parsed = EncryptedEnvelope::parse(&bundle, CipherVariant::SecretBox).unwrap();
            let counter = &parsed.nonce[parsed.nonce.len() - COUNTER_LEN..];
            assert_eq!(u64::from_be_bytes(counter.try_into().unwrap()), expected);
        }
    }

    #[test]
    fn exhausted_counter_refuses_to_encrypt() {
        let envelope = Envelope::new(CipherVariant::Aead);
        envelope.nonce_generator().counter().reset_for_tests(u64::MAX);
        let key = SecretKey::generate();

        assert!(envelope.encrypt(&key, &1).is_ok());
        assert!(matches!(envelope.encrypt(&key, &2), Err(CryptoError::NonceExhausted)));
    }

    #[test]
    fn unframe_rejects_length_mismatch() {
        let mut framed = frame(&json!("abc")).unwrap();
        framed.push(b' ');
        assert_eq!(unframe::<Value>(&framed), None);
    }
}
