//! Error types for the encryption layer

use thiserror::Error;

/// Result type alias for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors raised while encrypting or managing keys.
///
/// Decryption has no error path; it returns `None`.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The nonce counter has emitted every value it can. Fatal for this counter.
    #[error("Nonce counter exhausted, refusing to encrypt")]
    NonceExhausted,

    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(#[from] base64::DecodeError),

    #[error("No key registered for version {0}")]
    UnknownKeyVersion(u32),

    #[error("Key version {0} is already registered")]
    DuplicateKeyVersion(u32),

    #[error("Key version {0} does not fit in a keyed bundle")]
    KeyVersionOutOfRange(u32),

    #[error("Key version space exhausted, cannot rotate past {0}")]
    KeyVersionsExhausted(u32),

    #[error("Key registry has no current key")]
    NoCurrentKey,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Plaintext of {0} bytes exceeds the frame limit")]
    PlaintextTooLarge(usize),

    #[error("Cipher failure")]
    Cipher,
}
