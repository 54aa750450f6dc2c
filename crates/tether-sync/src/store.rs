//! Versioned session state kept consistent with the remote peer.
//!
//! Each slice carries the version the peer last acknowledged. Local updates
//! send the expected version and retry on mismatch; remote pushes are applied
//! only when strictly newer, checked once without the lock and again under it.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tether_config::SyncConfig;
use tether_crypto::SessionCipher;
use tether_protocol::{
    events, request_json, AckResult, AgentState, Metadata, Transport, UpdateStateAck,
    UpdateStateRequest,
};
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::error::{SyncError, SyncResult};
use crate::mutex::AsyncMutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceKind {
    Metadata,
    AgentState,
}

impl SliceKind {
    /// Event used to push a local update of this slice.
    pub fn update_event(self) -> &'static str {
        match self {
            SliceKind::Metadata => events::UPDATE_METADATA,
            SliceKind::AgentState => events::UPDATE_STATE,
        }
    }
}

impl fmt::Display for SliceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SliceKind::Metadata => f.write_str("metadata"),
            SliceKind::AgentState => f.write_str("agent-state"),
        }
    }
}

/// A slice value and the version the peer assigned it.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSlice<T> {
    pub value: Option<T>,
    pub version: u64,
}

impl<T> Default for StateSlice<T> {
    fn default() -> Self {
        Self {
            value: None,
            version: 0,
        }
    }
}

struct SliceCell<T> {
    kind: SliceKind,
    lock: AsyncMutex,
    // Written only while `lock` is held
    state: RwLock<StateSlice<T>>,
}

impl<T: Clone> SliceCell<T> {
    fn new(kind: SliceKind, initial: StateSlice<T>) -> Self {
        Self {
            kind,
            lock: AsyncMutex::new(),
            state: RwLock::new(initial),
        }
    }

    fn snapshot(&self) -> StateSlice<T> {
        self.state.read().clone()
    }

    fn version(&self) -> u64 {
        self.state.read().version
    }
}

/// Owner of the metadata and agent-state slices for one session.
pub struct SessionStateStore {
    session_id: String,
    transport: Arc<dyn Transport>,
    cipher: SessionCipher,
    backoff: BackoffPolicy,
    lock_timeout: Option<Duration>,
    metadata: SliceCell<Metadata>,
    agent_state: SliceCell<AgentState>,
}

impl SessionStateStore {
    pub fn new(
        session_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        cipher: SessionCipher,
        config: &SyncConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            transport,
            cipher,
            backoff: BackoffPolicy::from_config(config),
            lock_timeout: config.lock_timeout(),
            metadata: SliceCell::new(SliceKind::Metadata, StateSlice::default()),
            agent_state: SliceCell::new(SliceKind::AgentState, StateSlice::default()),
        }
    }

    /// Seed the metadata slice with what the peer reported at session creation.
    pub fn with_metadata(mut self, value: Option<Metadata>, version: u64) -> Self {
        self.metadata = SliceCell::new(SliceKind::Metadata, StateSlice { value, version });
        self
    }

    /// Seed the agent-state slice with what the peer reported at session creation.
    pub fn with_agent_state(mut self, value: Option<AgentState>, version: u64) -> Self {
        self.agent_state = SliceCell::new(SliceKind::AgentState, StateSlice { value, version });
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn cipher(&self) -> &SessionCipher {
        &self.cipher
    }

    pub fn metadata(&self) -> StateSlice<Metadata> {
        self.metadata.snapshot()
    }

    pub fn agent_state(&self) -> StateSlice<AgentState> {
        self.agent_state.snapshot()
    }

    /// Derive a new metadata value and commit it to the peer.
    ///
    /// `handler` may run several times, each time against the latest known
    /// value. Returns the committed version.
    pub async fn update_metadata<F>(&self, handler: F) -> SyncResult<u64>
    where
        F: Fn(Option<&Metadata>) -> Metadata + Send + Sync,
    {
        self.update_slice(&self.metadata, handler).await
    }

    /// Derive a new agent-state value and commit it to the peer.
    pub async fn update_agent_state<F>(&self, handler: F) -> SyncResult<u64>
    where
        F: Fn(Option<&AgentState>) -> AgentState + Send + Sync,
    {
        self.update_slice(&self.agent_state, handler).await
    }

    /// Apply a pushed slice value. Returns whether it was applied.
    pub async fn apply_remote_update(
        &self,
        slice: SliceKind,
        version: u64,
        encrypted_value: &str,
    ) -> bool {
        match slice {
            SliceKind::Metadata => self.apply_remote(&self.metadata, version, encrypted_value).await,
            SliceKind::AgentState => {
                self.apply_remote(&self.agent_state, version, encrypted_value)
                    .await
            }
        }
    }

    /// Re-send each known slice value with its current version.
    ///
    /// Used after reconnecting. A single attempt per slice.
    pub async fn reconcile(&self) -> SyncResult<()> {
        self.reconcile_slice(&self.metadata).await?;
        self.reconcile_slice(&self.agent_state).await?;
        Ok(())
    }

    async fn update_slice<T, F>(&self, cell: &SliceCell<T>, handler: F) -> SyncResult<u64>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync,
        F: Fn(Option<&T>) -> T + Send + Sync,
    {
        cell.lock
            .acquire_and_run(
                || async {
                    let mut backoff = self.backoff.start();
                    loop {
                        let current = cell.snapshot();
                        let candidate = handler(current.value.as_ref());
                        let encrypted_value = self
                            .cipher
                            .seal(&candidate)
                            .map_err(|source| SyncError::Seal { slice: cell.kind, source })?;

                        let request = UpdateStateRequest {
                            sid: self.session_id.clone(),
                            expected_version: current.version,
                            encrypted_value,
                        };
                        let ack: Result<UpdateStateAck, _> =
                            request_json(self.transport.as_ref(), cell.kind.update_event(), &request)
                                .await;

                        match ack {
                            Ok(ack) => match ack.result {
                                AckResult::Success if ack.version <= current.version => {
                                    warn!(
                                        session_id = %self.session_id,
                                        slice = %cell.kind,
                                        local = current.version,
                                        version = ack.version,
                                        "Peer acknowledged a version that is not newer"
                                    );
                                    return Err(SyncError::StaleAck {
                                        slice: cell.kind,
                                        acked: ack.version,
                                        local: current.version,
                                    });
                                }
                                AckResult::Success => {
                                    let value = ack
                                        .encrypted_value
                                        .as_deref()
                                        .and_then(|v| self.cipher.open::<T>(v))
                                        .unwrap_or(candidate);
                                    *cell.state.write() = StateSlice {
                                        value: Some(value),
                                        version: ack.version,
                                    };
                                    debug!(
                                        session_id = %self.session_id,
                                        slice = %cell.kind,
                                        version = ack.version,
                                        "Committed slice update"
                                    );
                                    return Ok(ack.version);
                                }
                                AckResult::VersionMismatch => {
                                    debug!(
                                        session_id = %self.session_id,
                                        slice = %cell.kind,
                                        expected = current.version,
                                        version = ack.version,
                                        "Version mismatch, adopting peer state"
                                    );
                                    self.adopt_peer(cell, &ack);
                                }
                                AckResult::Error => {
                                    warn!(
                                        session_id = %self.session_id,
                                        slice = %cell.kind,
                                        "Peer rejected slice update"
                                    );
                                    return Err(SyncError::Rejected { slice: cell.kind });
                                }
                            },
                            Err(err) => {
                                warn!(
                                    session_id = %self.session_id,
                                    slice = %cell.kind,
                                    error = %err,
                                    "Slice update failed in transport, retrying"
                                );
                            }
                        }

                        if !backoff.wait().await {
                            return Err(SyncError::RetriesExhausted {
                                slice: cell.kind,
                                attempts: backoff.attempts(),
                            });
                        }
                    }
                },
                self.lock_timeout,
            )
            .await?
    }

    /// Take the peer's version and value from a mismatch ack when newer.
    ///
    /// A value that fails to open still advances the version so the next
    /// attempt can succeed; the local value is kept.
    fn adopt_peer<T>(&self, cell: &SliceCell<T>, ack: &UpdateStateAck)
    where
        T: DeserializeOwned,
    {
        let opened = ack
            .encrypted_value
            .as_deref()
            .and_then(|v| self.cipher.open::<T>(v));

        let mut state = cell.state.write();
        if ack.version <= state.version {
            return;
        }
        state.version = ack.version;
        if let Some(value) = opened {
            state.value = Some(value);
        }
    }

    async fn apply_remote<T>(&self, cell: &SliceCell<T>, version: u64, encrypted_value: &str) -> bool
    where
        T: DeserializeOwned + Clone,
    {
        if version <= cell.version() {
            debug!(
                session_id = %self.session_id,
                slice = %cell.kind,
                version,
                "Discarding stale remote update"
            );
            return false;
        }

        cell.lock
            .run(|| async {
                // A local commit may have reached this version while we waited
                if version <= cell.version() {
                    debug!(
                        session_id = %self.session_id,
                        slice = %cell.kind,
                        version,
                        "Discarding remote update superseded while waiting"
                    );
                    return false;
                }
                let Some(value) = self.cipher.open::<T>(encrypted_value) else {
                    return false;
                };
                *cell.state.write() = StateSlice {
                    value: Some(value),
                    version,
                };
                info!(
                    session_id = %self.session_id,
                    slice = %cell.kind,
                    version,
                    "Applied remote update"
                );
                true
            })
            .await
    }

    async fn reconcile_slice<T>(&self, cell: &SliceCell<T>) -> SyncResult<()>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync,
    {
        cell.lock
            .acquire_and_run(
                || async {
                    let current = cell.snapshot();
                    let Some(value) = current.value.as_ref() else {
                        return Ok(());
                    };
                    let request = UpdateStateRequest {
                        sid: self.session_id.clone(),
                        expected_version: current.version,
                        encrypted_value: self
                            .cipher
                            .seal(value)
                            .map_err(|source| SyncError::Seal { slice: cell.kind, source })?,
                    };

                    let ack: UpdateStateAck =
                        match request_json(self.transport.as_ref(), cell.kind.update_event(), &request)
                            .await
                        {
                            Ok(ack) => ack,
                            Err(err) => {
                                warn!(
                                    session_id = %self.session_id,
                                    slice = %cell.kind,
                                    error = %err,
                                    "Reconcile failed in transport"
                                );
                                return Ok(());
                            }
                        };

                    match ack.result {
                        AckResult::Success => {
                            let mut state = cell.state.write();
                            if ack.version > state.version {
                                state.version = ack.version;
                            }
                        }
                        AckResult::VersionMismatch => self.adopt_peer(cell, &ack),
                        AckResult::Error => {
                            warn!(
                                session_id = %self.session_id,
                                slice = %cell.kind,
                                "Peer rejected reconcile"
                            );
                        }
                    }
                    Ok(())
                },
                self.lock_timeout,
            )
            .await?
    }
}

impl fmt::Debug for SessionStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStateStore")
            .field("session_id", &self.session_id)
            .field("metadata_version", &self.metadata.version())
            .field("agent_state_version", &self.agent_state.version())
            .finish_non_exhaustive()
    }
}
