use async_trait::async_trait;
use tether_protocol::PermissionMode;
use tokio::sync::mpsc;
use tracing::debug;

/// Out-of-band events the user interface should hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionNotice {
    TimedOut { id: String, tool: String },
    Canceled { id: String, tool: String },
    ModeChanged { mode: PermissionMode },
    /// Instruction to feed the agent after a plan was approved
    FollowUp { id: String, message: String },
}

/// Receives [`PermissionNotice`]s. Delivery is best-effort.
#[async_trait]
pub trait PermissionNotifier: Send + Sync {
    async fn notify(&self, notice: PermissionNotice);
}

/// Forwards notices onto an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<PermissionNotice>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PermissionNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PermissionNotifier for ChannelNotifier {
    async fn notify(&self, notice: PermissionNotice) {
        if self.tx.send(notice).is_err() {
            debug!("Permission notice dropped, receiver closed");
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl PermissionNotifier for NoopNotifier {
    async fn notify(&self, _notice: PermissionNotice) {}
}
