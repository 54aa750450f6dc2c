use tether_sync::SyncError;
use thiserror::Error;

pub type BrokerResult<T> = Result<T, PermissionError>;

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("No tool call matches '{tool}' after {attempts} attempts")]
    CorrelationFailed { tool: String, attempts: u32 },

    #[error("Permission request was reset")]
    Reset,

    #[error("No pending permission request with id {0}")]
    UnknownRequest(String),

    #[error("Failed to record agent state: {0}")]
    State(#[from] SyncError),
}
