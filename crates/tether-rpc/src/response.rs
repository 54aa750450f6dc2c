use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HandlerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    DecryptFailed,
    MethodNotFound,
    SessionNotActive,
    Canceled,
    HandlerError,
    InvalidParams,
}

/// Plaintext body of an RPC reply, sealed before it goes on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcResponse {
    Error { error: String, code: ErrorCode },
    Ok { ok: Value },
}

impl RpcResponse {
    pub fn ok(value: Value) -> Self {
        RpcResponse::Ok { ok: value }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        RpcResponse::Error {
            error: message.into(),
            code,
        }
    }

    pub fn canceled() -> Self {
        Self::from(HandlerError::Canceled)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, RpcResponse::Ok { .. })
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            RpcResponse::Error { code, .. } => Some(*code),
            RpcResponse::Ok { .. } => None,
        }
    }
}

impl From<HandlerError> for RpcResponse {
    fn from(err: HandlerError) -> Self {
        RpcResponse::error(err.code(), err.to_string())
    }
}

impl From<Result<Value, HandlerError>> for RpcResponse {
    fn from(result: Result<Value, HandlerError>) -> Self {
        match result {
            Ok(value) => RpcResponse::ok(value),
            Err(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shapes() {
        assert_eq!(
            serde_json::to_value(RpcResponse::ok(json!({ "a": 1 }))).unwrap(),
            json!({ "ok": { "a": 1 } })
        );
        assert_eq!(
            serde_json::to_value(RpcResponse::error(ErrorCode::SessionNotActive, "gone")).unwrap(),
            json!({ "error": "gone", "code": "session_not_active" })
        );
    }

    #[test]
    fn parses_both_shapes() {
        let ok: RpcResponse = serde_json::from_value(json!({ "ok": null })).unwrap();
        assert_eq!(ok, RpcResponse::ok(Value::Null));

        let err: RpcResponse =
            serde_json::from_value(json!({ "error": "x", "code": "decrypt_failed" })).unwrap();
        assert_eq!(err.code(), Some(ErrorCode::DecryptFailed));
    }

    #[test]
    fn handler_errors_map_to_codes() {
        let response: RpcResponse = HandlerError::InvalidParams("missing id".into()).into();
        assert_eq!(response.code(), Some(ErrorCode::InvalidParams));
        assert_eq!(RpcResponse::canceled().code(), Some(ErrorCode::Canceled));
    }
}
