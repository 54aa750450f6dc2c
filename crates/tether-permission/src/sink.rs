use async_trait::async_trait;
use parking_lot::Mutex;
use tether_protocol::AgentState;
use tether_sync::SessionStateStore;

use crate::error::BrokerResult;

/// In-place edit of the agent state. May be applied more than once.
pub type AgentStateMutation = Box<dyn Fn(&mut AgentState) + Send + Sync>;

/// Where the broker records requests and decisions.
#[async_trait]
pub trait AgentStateSink: Send + Sync {
    async fn update(&self, mutation: AgentStateMutation) -> BrokerResult<()>;
}

#[async_trait]
impl AgentStateSink for SessionStateStore {
    async fn update(&self, mutation: AgentStateMutation) -> BrokerResult<()> {
        self.update_agent_state(|current| {
            let mut state = current.cloned().unwrap_or_default();
            mutation(&mut state);
            state
        })
        .await?;
        Ok(())
    }
}

/// Agent state kept only in this process.
#[derive(Debug, Default)]
pub struct LocalAgentState {
    state: Mutex<AgentState>,
}

impl LocalAgentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> AgentState {
        self.state.lock().clone()
    }
}

#[async_trait]
impl AgentStateSink for LocalAgentState {
    async fn update(&self, mutation: AgentStateMutation) -> BrokerResult<()> {
        mutation(&mut self.state.lock());
        Ok(())
    }
}
