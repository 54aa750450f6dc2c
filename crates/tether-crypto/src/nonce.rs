//! Hybrid nonce generation: random prefix plus a process-local counter.
//!
//! The counter removes the birthday bound of purely random nonces within a
//! process; the random prefix keeps nonces distinct across processes and
//! restarts.

use parking_lot::Mutex;
use rand::RngCore;
use std::sync::Arc;
use tracing::error;

use crate::error::{CryptoError, Result};

/// Width of the counter suffix in bytes.
pub const COUNTER_LEN: usize = 8;

/// Monotonic counter feeding the nonce suffix.
///
/// Values run from 0 through `u64::MAX`. After the last value has been handed
/// out the counter stays exhausted; it never wraps.
#[derive(Debug)]
pub struct NonceCounter {
    /// Next value to hand out, `None` once exhausted.
    next: Mutex<Option<u64>>,
}

impl NonceCounter {
    pub fn new() -> Self {
        Self {
            next: Mutex::new(Some(0)),
        }
    }

    /// Take the next counter value.
    pub fn next_value(&self) -> Result<u64> {
        let mut next = self.next.lock();
        match *next {
            Some(value) => {
                *next = value.checked_add(1);
                Ok(value)
            }
            None => {
                error!("Nonce counter exhausted; encryption is permanently disabled for this counter");
                Err(CryptoError::NonceExhausted)
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.next.lock().is_none()
    }

    /// Reposition the counter. Test-only.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn reset_for_tests(&self, value: u64) {
        *self.next.lock() = Some(value);
    }
}

impl Default for NonceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds nonces of any length above [`COUNTER_LEN`].
#[derive(Debug, Clone, Default)]
pub struct NonceGenerator {
    counter: Arc<NonceCounter>,
}

impl NonceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing counter, e.g. one shared by several envelopes.
    pub fn with_counter(counter: Arc<NonceCounter>) -> Self {
        Self { counter }
    }

    pub fn counter(&self) -> &Arc<NonceCounter> {
        &self.counter
    }

    /// `len - 8` random bytes followed by the big-endian counter.
    pub fn generate(&self, len: usize) -> Result<Vec<u8>> {
        debug_assert!(len > COUNTER_LEN, "nonce must be longer than the counter");
        let counter = self.counter.next_value()?;

        let mut nonce = vec![0u8; len];
        let split = len - COUNTER_LEN;
        rand::rng().fill_bytes(&mut nonce[..split]);
        nonce[split..].copy_from_slice(&counter.to_be_bytes());
        Ok(nonce)
    }
}
