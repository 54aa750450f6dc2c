use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_protocol::PermissionMode;

/// Tool whose command argument is matched against command allow-lists.
pub const SHELL_TOOL: &str = "Bash";

/// Tools approved without asking in `AcceptEdits` mode.
pub const EDIT_TOOLS: [&str; 4] = ["Edit", "MultiEdit", "Write", "NotebookEdit"];

/// Leaving plan mode is always denied; approval is delivered as a follow-up.
pub const EXIT_PLAN_MODE: &str = "exit_plan_mode";

/// Answer handed back to the agent for one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "camelCase")]
pub enum PermissionResult {
    #[serde(rename_all = "camelCase")]
    Allow { updated_input: Value },
    Deny { reason: String },
}

impl PermissionResult {
    pub fn allow(input: Value) -> Self {
        PermissionResult::Allow {
            updated_input: input,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        PermissionResult::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, PermissionResult::Allow { .. })
    }
}

/// Params of the `permission` RPC sent by the peer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDecision {
    pub id: String,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<PermissionMode>,
    /// Tool names or `Bash(...)` command grants
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_tools: Vec<String>,
}

/// Tool activity observed in the agent's output stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    ToolUse { id: String, name: String, input: Value },
    ToolResult { id: String },
}
