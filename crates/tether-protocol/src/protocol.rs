use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Event names
// ─────────────────────────────────────────────────────────────────────────────

pub mod events {
    pub const UPDATE: &str = "update";
    pub const UPDATE_METADATA: &str = "update-metadata";
    pub const UPDATE_STATE: &str = "update-state";
    pub const RPC_REGISTER: &str = "rpc-register";
    pub const RPC_UNREGISTER: &str = "rpc-unregister";
    pub const RPC_REQUEST: &str = "rpc-request";
    pub const RPC_CANCEL: &str = "rpc-cancel";
    pub const SESSION_ALIVE: &str = "session-alive";
    pub const SESSION_END: &str = "session-end";
    pub const MESSAGE: &str = "message";
}

// ─────────────────────────────────────────────────────────────────────────────
// Versioned state updates
// ─────────────────────────────────────────────────────────────────────────────

/// Local → peer optimistic update of one state slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStateRequest {
    pub sid: String,
    pub expected_version: u64,
    pub encrypted_value: String,
}

/// Outcome reported by the peer for an [`UpdateStateRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckResult {
    Success,
    VersionMismatch,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStateAck {
    pub result: AckResult,
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_value: Option<String>,
}

impl UpdateStateAck {
    pub fn success(version: u64, encrypted_value: impl Into<String>) -> Self {
        Self {
            result: AckResult::Success,
            version,
            encrypted_value: Some(encrypted_value.into()),
        }
    }

    pub fn version_mismatch(version: u64, encrypted_value: Option<String>) -> Self {
        Self {
            result: AckResult::VersionMismatch,
            version,
            encrypted_value,
        }
    }

    pub fn error() -> Self {
        Self {
            result: AckResult::Error,
            version: 0,
            encrypted_value: None,
        }
    }
}

/// An encrypted slice value tagged with the version the peer assigned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedValue {
    pub version: u64,
    pub value: String,
}

/// Body of a peer → local `update` push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "kebab-case")]
pub enum UpdateBody {
    /// A chat-style message, opaque until decrypted.
    NewMessage { message: String },
    /// New versions of one or both state slices.
    UpdateSession {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<VersionedValue>,
        #[serde(
            rename = "agentState",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        agent_state: Option<VersionedValue>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub body: UpdateBody,
}

// ─────────────────────────────────────────────────────────────────────────────
// RPC
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRegistration {
    pub method: String,
}

/// Peer → local call. `params` is an encrypted bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    pub method: String,
    pub params: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcCancel {
    pub request_id: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Session lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepAlive {
    pub sid: String,
    /// Milliseconds since the Unix epoch
    pub time: i64,
    pub thinking: bool,
    pub mode: crate::state::PermissionMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEnd {
    pub sid: String,
    pub time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub sid: String,
    pub message: String,
}
