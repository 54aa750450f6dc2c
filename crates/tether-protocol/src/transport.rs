//! Transport collaborator interface.
//!
//! The core never owns a socket. It emits through [`Transport`] and receives
//! peer traffic as [`TransportEvent`]s on a channel fed by whoever does.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::protocol::{RpcCancel, RpcRequest, UpdateEvent};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport disconnected")]
    Disconnected,

    #[error("Acknowledgement timed out for '{0}'")]
    AckTimeout(String),

    #[error("Malformed acknowledgement: {0}")]
    InvalidAck(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Other(String),
}

/// Emit side of the connection to the remote peer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget emit.
    async fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError>;

    /// Emit and wait for the peer's acknowledgement payload.
    async fn emit_with_ack(&self, event: &str, payload: Value) -> Result<Value, TransportError>;
}

/// Serialize `payload` and emit it without waiting for an acknowledgement.
pub async fn send_json<T>(
    transport: &dyn Transport,
    event: &str,
    payload: &T,
) -> Result<(), TransportError>
where
    T: Serialize + Sync + ?Sized,
{
    let value = serde_json::to_value(payload)?;
    transport.emit(event, value).await
}

/// Serialize `payload`, emit it, and decode the acknowledgement as `R`.
pub async fn request_json<T, R>(
    transport: &dyn Transport,
    event: &str,
    payload: &T,
) -> Result<R, TransportError>
where
    T: Serialize + Sync + ?Sized,
    R: DeserializeOwned,
{
    let value = serde_json::to_value(payload)?;
    let ack = transport.emit_with_ack(event, value).await?;
    Ok(serde_json::from_value(ack)?)
}

/// Inbound traffic and connection lifecycle, delivered in arrival order.
#[derive(Debug)]
pub enum TransportEvent {
    Update(UpdateEvent),
    RpcRequest {
        request: RpcRequest,
        reply: oneshot::Sender<String>,
    },
    RpcCancel(RpcCancel),
    Connected,
    Disconnected,
}
