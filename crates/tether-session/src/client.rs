//! Drives one session from the transport's event stream.

use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tether_config::TetherConfig;
use tether_crypto::{AutoRotation, KeySource, SessionCipher};
use tether_permission::{ChannelNotifier, PermissionBroker, PermissionNotice};
use tether_protocol::{
    events, send_json, KeepAlive, OutboundMessage, PermissionMode, RpcRequest, SessionEnd,
    Transport, TransportEvent, UpdateBody, UpdateEvent,
};
use tether_rpc::RpcCorrelator;
use tether_sync::{SessionStateStore, SliceKind};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::error::SessionResult;
use crate::tracing_utils::{rpc_span, session_span};

/// Receivers for what the session produces besides state.
#[derive(Debug)]
pub struct SessionChannels {
    /// Decrypted `new-message` payloads from the peer
    pub messages: mpsc::UnboundedReceiver<Value>,
    /// Permission timeouts, mode changes and follow-ups
    pub notices: mpsc::UnboundedReceiver<PermissionNotice>,
}

pub struct SessionClient {
    session_id: String,
    transport: Arc<dyn Transport>,
    cipher: SessionCipher,
    config: TetherConfig,
    store: Arc<SessionStateStore>,
    rpc: Arc<RpcCorrelator>,
    permissions: Arc<PermissionBroker>,
    messages: mpsc::UnboundedSender<Value>,
    shutdown: CancellationToken,
    disconnected: AtomicBool,
    thinking: AtomicBool,
    _rotation: Option<AutoRotation>,
}

impl SessionClient {
    pub fn new(
        session_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        keys: KeySource,
        config: &TetherConfig,
    ) -> (Arc<Self>, SessionChannels) {
        let session_id = session_id.into();
        let rotation = match (&keys, config.crypto.auto_rotate_interval()) {
            (KeySource::Registry(registry), Some(interval)) => {
                Some(registry.start_auto_rotation(interval, config.crypto.key_retention))
            }
            _ => None,
        };
        let cipher = SessionCipher::from_config(&config.crypto, keys);

        let store = Arc::new(SessionStateStore::new(
            session_id.clone(),
            transport.clone(),
            cipher.clone(),
            &config.sync,
        ));
        let rpc = Arc::new(RpcCorrelator::new(
            session_id.clone(),
            transport.clone(),
            cipher.clone(),
            &config.rpc,
        ));
        let (notifier, notices) = ChannelNotifier::new();
        let permissions = Arc::new(PermissionBroker::new(
            store.clone(),
            Arc::new(notifier),
            &config.permission,
        ));
        let (messages_tx, messages) = mpsc::unbounded_channel();

        let client = Arc::new(Self {
            session_id,
            transport,
            cipher,
            config: config.clone(),
            store,
            rpc,
            permissions,
            messages: messages_tx,
            shutdown: CancellationToken::new(),
            disconnected: AtomicBool::new(false),
            thinking: AtomicBool::new(false),
            _rotation: rotation,
        });
        (client, SessionChannels { messages, notices })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn store(&self) -> &Arc<SessionStateStore> {
        &self.store
    }

    pub fn rpc(&self) -> &Arc<RpcCorrelator> {
        &self.rpc
    }

    pub fn permissions(&self) -> &Arc<PermissionBroker> {
        &self.permissions
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Register the session's RPC methods with the peer.
    pub async fn start(&self) -> SessionResult<()> {
        self.permissions.install(&self.rpc).await?;
        info!(session_id = %self.session_id, "Session started");
        Ok(())
    }

    /// Consume transport events until shutdown or the stream ends.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        let span = session_span(&self.session_id);
        async move {
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        debug!("Shutdown requested");
                        break;
                    }
                    event = events.recv() => match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            debug!("Transport event stream closed");
                            break;
                        }
                    },
                }
            }
            self.rpc.cancel_all();
            info!("Session event loop stopped");
        }
        .instrument(span)
        .await
    }

    pub async fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Update(update) => self.handle_update(update),
            TransportEvent::RpcRequest { request, reply } => self.spawn_dispatch(request, reply),
            TransportEvent::RpcCancel(cancel) => {
                self.rpc.cancel(&cancel.request_id);
            }
            TransportEvent::Connected => self.handle_connected().await,
            TransportEvent::Disconnected => {
                self.disconnected.store(true, Ordering::SeqCst);
                warn!(session_id = %self.session_id, "Transport disconnected");
                self.rpc.cancel_all();
            }
        }
    }

    fn handle_update(&self, update: UpdateEvent) {
        match update.body {
            UpdateBody::UpdateSession {
                metadata,
                agent_state,
            } => {
                // Applying waits on the slice lock, which a local update may hold for a while
                let store = self.store.clone();
                tokio::spawn(
                    async move {
                        if let Some(metadata) = metadata {
                            store
                                .apply_remote_update(
                                    SliceKind::Metadata,
                                    metadata.version,
                                    &metadata.value,
                                )
                                .await;
                        }
                        if let Some(agent_state) = agent_state {
                            store
                                .apply_remote_update(
                                    SliceKind::AgentState,
                                    agent_state.version,
                                    &agent_state.value,
                                )
                                .await;
                        }
                    }
                    .in_current_span(),
                );
            }
            UpdateBody::NewMessage { message } => {
                let Some(message) = self.cipher.open::<Value>(&message) else {
                    return;
                };
                if self.messages.send(message).is_err() {
                    debug!(session_id = %self.session_id, "Message receiver closed");
                }
            }
        }
    }

    fn spawn_dispatch(self: &Arc<Self>, request: RpcRequest, reply: oneshot::Sender<String>) {
        let span = rpc_span(&self.session_id, &request.method, request.request_id.as_deref());
        let rpc = self.rpc.clone();
        tokio::spawn(
            async move {
                match rpc.dispatch(request).await {
                    Ok(sealed) => {
                        if reply.send(sealed).is_err() {
                            debug!("RPC caller went away before the reply");
                        }
                    }
                    Err(err) => error!(error = %err, "Failed to answer RPC"),
                }
            }
            .instrument(span),
        );
    }

    async fn handle_connected(&self) {
        if !self.disconnected.swap(false, Ordering::SeqCst) {
            debug!(session_id = %self.session_id, "Transport connected");
            return;
        }

        info!(session_id = %self.session_id, "Transport reconnected, resynchronizing");
        if let Err(err) = self.rpc.on_reconnect().await {
            warn!(session_id = %self.session_id, error = %err, "Failed to re-register RPC methods");
        }
        let store = self.store.clone();
        tokio::spawn(
            async move {
                if let Err(err) = store.reconcile().await {
                    warn!(session_id = %store.session_id(), error = %err, "Reconcile failed");
                }
            }
            .in_current_span(),
        );
    }

    pub fn set_thinking(&self, thinking: bool) {
        self.thinking.store(thinking, Ordering::SeqCst);
    }

    /// Tell the peer the session is alive.
    pub async fn keep_alive(&self, thinking: bool, mode: PermissionMode) -> SessionResult<()> {
        let ping = KeepAlive {
            sid: self.session_id.clone(),
            time: Utc::now().timestamp_millis(),
            thinking,
            mode,
        };
        send_json(self.transport.as_ref(), events::SESSION_ALIVE, &ping).await?;
        Ok(())
    }

    /// Ping on the configured interval until shutdown.
    pub fn spawn_keep_alive(self: &Arc<Self>) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(client.config.session.keep_alive_interval());
            loop {
                tokio::select! {
                    _ = client.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let thinking = client.thinking.load(Ordering::SeqCst);
                        let mode = client.permissions.mode();
                        if let Err(err) = client.keep_alive(thinking, mode).await {
                            debug!(session_id = %client.session_id, error = %err, "Keep-alive failed");
                        }
                    }
                }
            }
        })
    }

    pub async fn send_session_end(&self) -> SessionResult<()> {
        let end = SessionEnd {
            sid: self.session_id.clone(),
            time: Utc::now().timestamp_millis(),
        };
        send_json(self.transport.as_ref(), events::SESSION_END, &end).await?;
        info!(session_id = %self.session_id, "Session ended");
        Ok(())
    }

    /// Encrypt and send a message to the peer.
    pub async fn send_message(&self, message: &Value) -> SessionResult<()> {
        let outbound = OutboundMessage {
            sid: self.session_id.clone(),
            message: self.cipher.seal(message)?,
        };
        send_json(self.transport.as_ref(), events::MESSAGE, &outbound).await?;
        Ok(())
    }

    /// Announce the end of the session and stop the event loop and timers.
    pub async fn close(&self) -> SessionResult<()> {
        let result = self.send_session_end().await;
        self.shutdown.cancel();
        self.permissions.reset().await;
        result
    }
}
