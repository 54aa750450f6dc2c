//! Authenticated encryption for session payloads.
//!
//! Two cipher variants share one bundle format:
//!
//! ```text
//! format 0: [0][nonce][ciphertext][tag]
//! format 1: [1][key version u16 BE][nonce][ciphertext][tag]
//! ```
//!
//! Nonces are `nonce_len - 8` random bytes followed by an 8-byte big-endian
//! counter owned by a [`NonceCounter`]. Decryption never errors: anything that
//! fails authentication or framing comes back as `None` and callers drop it.

mod cipher;
mod envelope;
mod error;
mod key;
mod nonce;
mod registry;

pub use cipher::{KeySource, SessionCipher};
pub use envelope::{
    CipherVariant, EncryptedEnvelope, Envelope, FORMAT_KEYED, FORMAT_LEGACY, TAG_LEN,
};
pub use error::{CryptoError, Result};
pub use key::{SecretKey, KEY_LEN};
pub use nonce::{NonceCounter, NonceGenerator, COUNTER_LEN};
pub use registry::{AutoRotation, ExportedKey, KeyRegistryState, KeyVersionEntry, KeyVersionRegistry};
