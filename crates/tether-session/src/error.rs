use tether_crypto::CryptoError;
use tether_permission::PermissionError;
use tether_protocol::TransportError;
use tether_rpc::RpcError;
use tether_sync::SyncError;
use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("State sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Permission error: {0}")]
    Permission(#[from] PermissionError),
}
