use tether_crypto::CryptoError;
use tether_protocol::TransportError;
use thiserror::Error;

use crate::response::ErrorCode;

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to seal RPC response: {0}")]
    Seal(#[from] CryptoError),
}

/// Failure reported by a handler, sent back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Failed(String),

    #[error("Request canceled")]
    Canceled,
}

impl HandlerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HandlerError::InvalidParams(_) => ErrorCode::InvalidParams,
            HandlerError::Failed(_) => ErrorCode::HandlerError,
            HandlerError::Canceled => ErrorCode::Canceled,
        }
    }
}
