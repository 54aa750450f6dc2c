//! Serialized, versioned state synchronization with the remote peer
//!
//! [`AsyncMutex`] serializes async critical sections with FIFO fairness.
//! [`SessionStateStore`] keeps the metadata and agent-state slices consistent
//! using optimistic concurrency against the peer's version numbers.

mod backoff;
mod error;
mod mutex;
mod store;

pub use backoff::{Backoff, BackoffPolicy};
pub use error::{SyncError, SyncResult};
pub use mutex::{AsyncMutex, LockTimeout};
pub use store::{SessionStateStore, SliceKind, StateSlice};
