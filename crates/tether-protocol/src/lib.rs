//! Shared protocol types for the tether session core
//!
//! - `protocol`: wire payloads exchanged with the remote peer
//! - `state`: plaintext values of the two synchronized session slices
//! - `transport`: the collaborator interface the core talks through

pub mod protocol;
pub mod state;
pub mod transport;

pub use protocol::*;
pub use state::{
    AgentRequest, AgentState, CompletedDecision, DecisionStatus, Metadata, PermissionMode,
};
pub use transport::{request_json, send_json, Transport, TransportError, TransportEvent};
