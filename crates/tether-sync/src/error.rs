use tether_crypto::CryptoError;
use thiserror::Error;

use crate::mutex::LockTimeout;
use crate::store::SliceKind;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),

    #[error("Peer rejected the {slice} update")]
    Rejected { slice: SliceKind },

    #[error("Peer acknowledged {slice} version {acked}, not newer than local version {local}")]
    StaleAck { slice: SliceKind, acked: u64, local: u64 },

    #[error("Gave up on the {slice} update after {attempts} attempts")]
    RetriesExhausted { slice: SliceKind, attempts: u32 },

    #[error("Failed to seal {slice} value: {source}")]
    Seal {
        slice: SliceKind,
        #[source]
        source: CryptoError,
    },
}
