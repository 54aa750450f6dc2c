//! Tool-execution approval brokered through the remote peer
//!
//! The agent asks before running a tool. Requests that no allow-list or mode
//! covers are correlated with the observed tool call, recorded in agent
//! state, and held until the peer decides, the request times out, or the
//! caller cancels.

mod allowlist;
mod broker;
mod error;
mod notifier;
mod sink;
mod tool_calls;
mod types;

pub use allowlist::AllowList;
pub use broker::{PermissionBroker, PERMISSION_METHOD};
pub use error::{BrokerResult, PermissionError};
pub use notifier::{ChannelNotifier, NoopNotifier, PermissionNotice, PermissionNotifier};
pub use sink::{AgentStateMutation, AgentStateSink, LocalAgentState};
pub use tool_calls::{ToolCallBuffer, ToolCallRecord};
pub use types::{AgentEvent, PermissionDecision, PermissionResult, EDIT_TOOLS, EXIT_PLAN_MODE, SHELL_TOOL};
