//! Plaintext values of the synchronized session slices.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Free-form session metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle_state_since: Option<i64>,
    /// Fields this side does not interpret but must round-trip.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Coarse approval mode the agent runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    /// Edit tools are approved without asking.
    AcceptEdits,
    /// Every tool is approved without asking.
    BypassPermissions,
    Plan,
}

/// An approval request the remote peer has not answered yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub tool: String,
    pub arguments: Value,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Approved,
    Denied,
    Timeout,
    Canceled,
}

/// Terminal record of an approval request, kept for history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedDecision {
    pub tool: String,
    pub arguments: Value,
    pub created_at: i64,
    pub decided_at: i64,
    pub status: DecisionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<PermissionMode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_tools: Vec<String>,
}

/// Agent-control state shared with the remote peer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controlled_by_user: Option<bool>,
    #[serde(default)]
    pub requests: BTreeMap<String, AgentRequest>,
    #[serde(default)]
    pub completed_requests: BTreeMap<String, CompletedDecision>,
}

impl AgentState {
    /// Move a pending request to the completed set.
    ///
    /// Unknown ids are recorded too, using `fallback` for the request fields,
    /// so a decision is never lost because the pending entry was pruned.
    pub fn complete_request(
        &mut self,
        id: &str,
        fallback: AgentRequest,
        decided_at: i64,
        status: DecisionStatus,
        reason: Option<String>,
    ) -> &mut CompletedDecision {
        let request = self.requests.remove(id).unwrap_or(fallback);
        self.completed_requests
            .entry(id.to_string())
            .or_insert(CompletedDecision {
                tool: request.tool,
                arguments: request.arguments,
                created_at: request.created_at,
                decided_at,
                status,
                reason,
                mode: None,
                allow_tools: Vec::new(),
            })
    }

    /// Drop the oldest completed decisions until at most `capacity` remain.
    pub fn prune_completed(&mut self, capacity: usize) {
        if self.completed_requests.len() <= capacity {
            return;
        }

        let mut by_age: Vec<(i64, String)> = self
            .completed_requests
            .iter()
            .map(|(id, d)| (d.decided_at, id.clone()))
            .collect();
        by_age.sort();

        let excess = self.completed_requests.len() - capacity;
        for (_, id) in by_age.into_iter().take(excess) {
            self.completed_requests.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(tool: &str) -> AgentRequest {
        AgentRequest {
            tool: tool.into(),
            arguments: json!({}),
            created_at: 1,
        }
    }

    #[test]
    fn metadata_round_trips_unknown_fields() {
        let raw = json!({ "path": "/work", "summary": { "text": "hi" } });
        let meta: Metadata = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(meta.path.as_deref(), Some("/work"));
        assert_eq!(serde_json::to_value(&meta).unwrap(), raw);
    }

    #[test]
    fn permission_mode_wire_names() {
        assert_eq!(
            serde_json::to_value(PermissionMode::BypassPermissions).unwrap(),
            json!("bypassPermissions")
        );
        assert_eq!(
            serde_json::from_value::<PermissionMode>(json!("acceptEdits")).unwrap(),
            PermissionMode::AcceptEdits
        );
    }

    #[test]
    fn complete_request_moves_entry() {
        let mut state = AgentState::default();
        state.requests.insert("t1".into(), request("Bash"));

        state.complete_request("t1", request("unused"), 10, DecisionStatus::Denied, Some("no".into()));

        assert!(state.requests.is_empty());
        let done = &state.completed_requests["t1"];
        assert_eq!(done.tool, "Bash");
        assert_eq!(done.status, DecisionStatus::Denied);
        assert_eq!(done.decided_at, 10);
    }

    #[test]
    fn prune_keeps_newest_decisions() {
        let mut state = AgentState::default();
        for (id, at) in [("a", 30), ("b", 10), ("c", 20), ("d", 40)] {
            state.requests.insert(id.into(), request("Read"));
            state.complete_request(id, request("Read"), at, DecisionStatus::Approved, None);
        }

        state.prune_completed(2);

        let kept: Vec<&str> = state.completed_requests.keys().map(String::as_str).collect();
        assert_eq!(kept, vec!["a", "d"]);
    }
}
