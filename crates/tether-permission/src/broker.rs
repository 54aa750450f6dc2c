//! Approval lifecycle: fast paths, correlation, pending requests, decisions.

use chrono::Utc;
use dashmap::DashMap;
use futures::future::{BoxFuture, Fuse, FusedFuture};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tether_config::PermissionConfig;
use tether_protocol::{AgentRequest, AgentState, DecisionStatus, PermissionMode};
use tether_rpc::{HandlerError, RpcCorrelator, RpcResult};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::allowlist::AllowList;
use crate::error::{BrokerResult, PermissionError};
use crate::notifier::{PermissionNotice, PermissionNotifier};
use crate::sink::AgentStateSink;
use crate::tool_calls::ToolCallBuffer;
use crate::types::{
    AgentEvent, PermissionDecision, PermissionResult, EDIT_TOOLS, EXIT_PLAN_MODE, SHELL_TOOL,
};

/// RPC method the peer calls with a [`PermissionDecision`].
pub const PERMISSION_METHOD: &str = "permission";

const TIMEOUT_REASON: &str = "Permission request timed out";
const CANCELED_REASON: &str = "Permission request was canceled";
const DENIED_REASON: &str = "The user denied this tool call";
const PLAN_APPROVED_REASON: &str = "Plan approved. Continue with the implementation.";
const PLAN_FOLLOW_UP: &str = "The plan was approved. Proceed with implementing it.";

/// Agent-state write that owns everything it needs.
type StateWrite = BoxFuture<'static, ()>;

struct PendingPermission {
    tool: String,
    input: Value,
    created_at: i64,
    responder: oneshot::Sender<BrokerResult<PermissionResult>>,
}

/// How a request left the pending map without a decision.
#[derive(Debug, Clone, Copy)]
enum Abandoned {
    TimedOut,
    Canceled,
}

pub struct PermissionBroker {
    sink: Arc<dyn AgentStateSink>,
    notifier: Arc<dyn PermissionNotifier>,
    config: PermissionConfig,
    pending: DashMap<String, PendingPermission>,
    allowed: RwLock<AllowList>,
    tool_calls: Mutex<ToolCallBuffer>,
    mode: RwLock<PermissionMode>,
}

impl PermissionBroker {
    pub fn new(
        sink: Arc<dyn AgentStateSink>,
        notifier: Arc<dyn PermissionNotifier>,
        config: &PermissionConfig,
    ) -> Self {
        Self {
            sink,
            notifier,
            config: config.clone(),
            pending: DashMap::new(),
            allowed: RwLock::new(AllowList::new()),
            tool_calls: Mutex::new(ToolCallBuffer::new(config.tool_call_capacity)),
            mode: RwLock::new(PermissionMode::default()),
        }
    }

    /// Serve `permission` decisions from the peer.
    pub async fn install(self: &Arc<Self>, rpc: &RpcCorrelator) -> RpcResult<()> {
        let broker = Arc::clone(self);
        rpc.register_typed(PERMISSION_METHOD, move |decision: PermissionDecision, _| {
            let broker = broker.clone();
            async move {
                broker
                    .handle_decision(decision)
                    .await
                    .map_err(|e| HandlerError::Failed(e.to_string()))
            }
        })
        .await
    }

    /// Mode most recently chosen by the peer.
    pub fn mode(&self) -> PermissionMode {
        *self.mode.read()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Feed tool activity from the agent's output.
    pub fn observe(&self, event: AgentEvent) {
        let mut calls = self.tool_calls.lock();
        match event {
            AgentEvent::ToolUse { id, name, input } => calls.push(id, name, input),
            AgentEvent::ToolResult { id } => calls.mark_used(&id),
        }
    }

    /// Decide whether the agent may run `tool` with `input`.
    ///
    /// Timeouts and cancellation resolve to a deny, not an error.
    pub async fn ask(
        &self,
        tool: &str,
        input: Value,
        mode: PermissionMode,
        cancel: CancellationToken,
    ) -> BrokerResult<PermissionResult> {
        if self.is_pre_approved(tool, &input, mode) {
            debug!(tool = %tool, ?mode, "Tool pre-approved");
            return Ok(PermissionResult::allow(input));
        }

        let Some(id) = self.correlate(tool, &input, &cancel).await? else {
            return Ok(PermissionResult::deny(CANCELED_REASON));
        };

        let created_at = Utc::now().timestamp_millis();
        let deadline = tokio::time::sleep(self.config.timeout());
        tokio::pin!(deadline);
        let (tx, mut rx) = oneshot::channel();
        self.pending.insert(
            id.clone(),
            PendingPermission {
                tool: tool.to_string(),
                input: input.clone(),
                created_at,
                responder: tx,
            },
        );
        info!(request_id = %id, tool = %tool, "Awaiting permission decision");

        // Recording races the decision so a slow sink cannot hold the request open
        let mut recording: Fuse<StateWrite> =
            self.request_write(&id, tool, &input, created_at).fuse();
        let abandoned = loop {
            tokio::select! {
                _ = &mut recording, if !recording.is_terminated() => {}
                decided = &mut rx => {
                    finish_in_background(recording);
                    return decided.unwrap_or(Err(PermissionError::Reset));
                }
                _ = &mut deadline => break Abandoned::TimedOut,
                _ = cancel.cancelled() => break Abandoned::Canceled,
            }
        };
        finish_in_background(recording);

        // Whoever removes the entry resolves the request
        let Some((_, pending)) = self.pending.remove(&id) else {
            return rx.await.unwrap_or(Err(PermissionError::Reset));
        };
        Ok(self.abandon(&id, pending, abandoned).await)
    }

    fn is_pre_approved(&self, tool: &str, input: &Value, mode: PermissionMode) -> bool {
        match mode {
            PermissionMode::BypassPermissions => return true,
            PermissionMode::AcceptEdits if EDIT_TOOLS.contains(&tool) => return true,
            _ => {}
        }
        self.allowed.read().allows(tool, input)
    }

    /// Find the id of the tool call this request is about.
    ///
    /// `Ok(None)` when cancelled while waiting for the call to show up.
    async fn correlate(
        &self,
        tool: &str,
        input: &Value,
        cancel: &CancellationToken,
    ) -> BrokerResult<Option<String>> {
        let attempts = self.config.correlation_attempts.max(1);
        let mut delay = self.config.correlation_initial_delay();

        for attempt in 1..=attempts {
            if let Some(id) = self.tool_calls.lock().claim(tool, input) {
                return Ok(Some(id));
            }
            if attempt == attempts {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }
            delay = delay.saturating_mul(2);
        }

        warn!(tool = %tool, attempts, "No tool call matches permission request");
        Err(PermissionError::CorrelationFailed {
            tool: tool.to_string(),
            attempts,
        })
    }

    async fn abandon(&self, id: &str, pending: PendingPermission, how: Abandoned) -> PermissionResult {
        let (status, reason, notice) = match how {
            Abandoned::TimedOut => (
                DecisionStatus::Timeout,
                TIMEOUT_REASON,
                PermissionNotice::TimedOut {
                    id: id.to_string(),
                    tool: pending.tool.clone(),
                },
            ),
            Abandoned::Canceled => (
                DecisionStatus::Canceled,
                CANCELED_REASON,
                PermissionNotice::Canceled {
                    id: id.to_string(),
                    tool: pending.tool.clone(),
                },
            ),
        };
        info!(request_id = %id, tool = %pending.tool, ?status, "Permission request abandoned");

        let write =
            self.completion_write(id, &pending, status, Some(reason.to_string()), None, Vec::new());
        settle(write).await;
        self.notifier.notify(notice).await;
        PermissionResult::deny(reason)
    }

    /// Apply a decision from the peer.
    pub async fn handle_decision(&self, decision: PermissionDecision) -> BrokerResult<()> {
        let Some((_, pending)) = self.pending.remove(&decision.id) else {
            warn!(request_id = %decision.id, "Decision for unknown or resolved permission request");
            return Err(PermissionError::UnknownRequest(decision.id));
        };

        if !decision.allow_tools.is_empty() {
            let mut allowed = self.allowed.write();
            for grant in &decision.allow_tools {
                allowed.grant(grant);
            }
        }

        if let Some(mode) = decision.mode {
            *self.mode.write() = mode;
            info!(?mode, "Permission mode changed");
            self.notifier.notify(PermissionNotice::ModeChanged { mode }).await;
        }

        let denial = || {
            PermissionResult::deny(decision.reason.clone().unwrap_or_else(|| DENIED_REASON.to_string()))
        };
        let result = if pending.tool == EXIT_PLAN_MODE {
            if decision.approved {
                self.notifier
                    .notify(PermissionNotice::FollowUp {
                        id: decision.id.clone(),
                        message: PLAN_FOLLOW_UP.to_string(),
                    })
                    .await;
                PermissionResult::deny(PLAN_APPROVED_REASON)
            } else {
                denial()
            }
        } else if decision.approved {
            PermissionResult::allow(pending.input.clone())
        } else {
            denial()
        };

        let status = if decision.approved {
            DecisionStatus::Approved
        } else {
            DecisionStatus::Denied
        };
        info!(request_id = %decision.id, tool = %pending.tool, ?status, "Permission decided");

        let write = self.completion_write(
            &decision.id,
            &pending,
            status,
            decision.reason.clone(),
            decision.mode,
            decision.allow_tools.clone(),
        );

        let PendingPermission { responder, .. } = pending;
        if responder.send(Ok(result)).is_err() {
            debug!(request_id = %decision.id, "Permission requester went away");
        }
        write.await;
        Ok(())
    }

    /// Reject everything pending and forget all grants.
    pub async fn reset(&self) {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let Some((_, pending)) = self.pending.remove(&id) else {
                continue;
            };
            let write = self.completion_write(
                &id,
                &pending,
                DecisionStatus::Canceled,
                Some("Session reset".to_string()),
                None,
                Vec::new(),
            );
            let PendingPermission { responder, .. } = pending;
            let _ = responder.send(Err(PermissionError::Reset));
            settle(write).await;
        }

        self.allowed.write().clear();
        self.tool_calls.lock().clear();
        info!("Permission broker reset");
    }

    fn request_write(&self, id: &str, tool: &str, input: &Value, created_at: i64) -> StateWrite {
        let sink = self.sink.clone();
        let id = id.to_string();
        let request = AgentRequest {
            tool: tool.to_string(),
            arguments: input.clone(),
            created_at,
        };
        async move {
            let result = sink
                .update(Box::new(move |state: &mut AgentState| {
                    // Completion may have been recorded first
                    if !state.completed_requests.contains_key(&id) {
                        state.requests.insert(id.clone(), request.clone());
                    }
                }))
                .await;
            if let Err(err) = result {
                warn!(error = %err, "Failed to record permission request");
            }
        }
        .boxed()
    }

    fn completion_write(
        &self,
        id: &str,
        pending: &PendingPermission,
        status: DecisionStatus,
        reason: Option<String>,
        mode: Option<PermissionMode>,
        allow_tools: Vec<String>,
    ) -> StateWrite {
        let sink = self.sink.clone();
        let id = id.to_string();
        let fallback = AgentRequest {
            tool: pending.tool.clone(),
            arguments: pending.input.clone(),
            created_at: pending.created_at,
        };
        let decided_at = Utc::now().timestamp_millis();
        let capacity = self.config.completed_capacity;

        async move {
            let result = sink
                .update(Box::new(move |state: &mut AgentState| {
                    let done = state.complete_request(
                        &id,
                        fallback.clone(),
                        decided_at,
                        status,
                        reason.clone(),
                    );
                    done.mode = mode;
                    done.allow_tools = allow_tools.clone();
                    state.prune_completed(capacity);
                }))
                .await;
            if let Err(err) = result {
                warn!(error = %err, ?status, "Failed to record permission decision");
            }
        }
        .boxed()
    }

    /// How long a request waits before it is denied.
    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }
}

/// Drive `write` as far as it goes without waiting, then leave the rest to a task.
async fn settle(mut write: StateWrite) {
    if futures::poll!(&mut write).is_pending() {
        tokio::spawn(write);
    }
}

fn finish_in_background(recording: Fuse<StateWrite>) {
    if !recording.is_terminated() {
        tokio::spawn(recording);
    }
}
