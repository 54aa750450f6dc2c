//! Peer-initiated RPC over the session transport
//!
//! Handlers are registered under a scope prefix and announced to the peer.
//! Inbound calls carry encrypted params and get an encrypted
//! [`RpcResponse`] back. Calls with a request id can be cancelled.

mod cache;
mod correlator;
mod error;
mod response;

pub use correlator::{HandlerFuture, RpcCorrelator};
pub use error::{HandlerError, RpcError, RpcResult};
pub use response::{ErrorCode, RpcResponse};
