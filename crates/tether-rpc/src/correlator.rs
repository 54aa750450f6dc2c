//! Handler registry and inbound call dispatch.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tether_config::RpcConfig;
use tether_crypto::SessionCipher;
use tether_protocol::{events, send_json, RpcRegistration, RpcRequest, Transport};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::error::{HandlerError, RpcResult};
use crate::response::{ErrorCode, RpcResponse};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>;

type Handler = Arc<dyn Fn(Value, CancellationToken) -> HandlerFuture + Send + Sync>;

struct PendingCall {
    /// Identifies the dispatch that owns this entry
    seq: u64,
    cancel: CancellationToken,
    /// Flips to `true` when the owning dispatch ends
    finished: Arc<watch::Sender<bool>>,
}

/// A request id owned by one dispatch. Released on drop, however the dispatch ends.
struct Claim<'a> {
    pending: &'a DashMap<String, PendingCall>,
    request_id: String,
    seq: u64,
    finished: Arc<watch::Sender<bool>>,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        // A newer dispatch for the same id may own the entry by now
        let seq = self.seq;
        self.pending.remove_if(&self.request_id, |_, call| call.seq == seq);
        self.finished.send_replace(true);
    }
}

enum Slot<'a> {
    Claimed(Claim<'a>, CancellationToken),
    InFlight(watch::Receiver<bool>),
}

/// Routes peer calls to local handlers and tracks the ones in flight.
pub struct RpcCorrelator {
    scope: String,
    transport: Arc<dyn Transport>,
    cipher: SessionCipher,
    handlers: DashMap<String, Handler>,
    pending: DashMap<String, PendingCall>,
    next_seq: AtomicU64,
    responses: Mutex<ResponseCache>,
}

impl RpcCorrelator {
    /// `scope` prefixes every method name, usually the session id.
    pub fn new(
        scope: impl Into<String>,
        transport: Arc<dyn Transport>,
        cipher: SessionCipher,
        config: &RpcConfig,
    ) -> Self {
        Self {
            scope: scope.into(),
            transport,
            cipher,
            handlers: DashMap::new(),
            pending: DashMap::new(),
            next_seq: AtomicU64::new(0),
            responses: Mutex::new(ResponseCache::new(config.response_cache_capacity)),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn scoped(&self, method: &str) -> String {
        format!("{}:{}", self.scope, method)
    }

    /// Register `handler` for `method` and announce it to the peer.
    ///
    /// The handler stays registered if the announcement fails; it is sent
    /// again by [`on_reconnect`](Self::on_reconnect).
    pub async fn register_handler<F, Fut>(&self, method: &str, handler: F) -> RpcResult<()>
    where
        F: Fn(Value, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let key = self.scoped(method);
        let handler: Handler =
            Arc::new(move |params: Value, cancel: CancellationToken| -> HandlerFuture {
                Box::pin(handler(params, cancel))
            });
        self.handlers.insert(key.clone(), handler);
        debug!(method = %key, "Registered RPC handler");

        send_json(
            self.transport.as_ref(),
            events::RPC_REGISTER,
            &RpcRegistration { method: key },
        )
        .await?;
        Ok(())
    }

    /// Register a handler with typed params and result.
    ///
    /// Params that do not deserialize into `P` answer `invalid_params`.
    pub async fn register_typed<P, R, F, Fut>(&self, method: &str, handler: F) -> RpcResult<()>
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register_handler(method, move |params, cancel| {
            let handler = handler.clone();
            async move {
                let params: P = serde_json::from_value(params)
                    .map_err(|e| HandlerError::InvalidParams(e.to_string()))?;
                let result = handler(params, cancel).await?;
                serde_json::to_value(result).map_err(|e| HandlerError::Failed(e.to_string()))
            }
        })
        .await
    }

    /// Remove `method` and withdraw it from the peer.
    pub async fn unregister_handler(&self, method: &str) -> RpcResult<()> {
        let key = self.scoped(method);
        if self.handlers.remove(&key).is_none() {
            return Ok(());
        }
        debug!(method = %key, "Unregistered RPC handler");
        send_json(
            self.transport.as_ref(),
            events::RPC_UNREGISTER,
            &RpcRegistration { method: key },
        )
        .await?;
        Ok(())
    }

    pub fn has_handler(&self, method: &str) -> bool {
        self.handlers.contains_key(&self.scoped(method))
    }

    /// Announce every registered method again after the transport reconnects.
    pub async fn on_reconnect(&self) -> RpcResult<()> {
        let methods: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        info!(scope = %self.scope, count = methods.len(), "Re-registering RPC methods");
        for method in methods {
            send_json(
                self.transport.as_ref(),
                events::RPC_REGISTER,
                &RpcRegistration { method },
            )
            .await?;
        }
        Ok(())
    }

    /// Run one inbound call and return the sealed response.
    ///
    /// A request id that is already in flight waits for that call's response
    /// instead of running the handler again.
    pub async fn dispatch(&self, request: RpcRequest) -> RpcResult<String> {
        let Some(request_id) = request.request_id.clone() else {
            let response = self.run(&request, CancellationToken::new()).await;
            return Ok(self.cipher.seal(&response)?);
        };

        if let Some(cached) = self.cached(&request_id) {
            debug!(request_id = %request_id, "Replaying cached RPC response");
            return Ok(cached);
        }

        let (claim, cancel) = match self.claim(&request_id) {
            Slot::Claimed(claim, cancel) => (claim, cancel),
            Slot::InFlight(finished) => return self.follow(&request_id, finished).await,
        };
        // The previous owner may have finished between the cache check and the claim
        if let Some(cached) = self.cached(&request_id) {
            return Ok(cached);
        }

        let response = self.run(&request, cancel).await;
        let sealed = self.cipher.seal(&response)?;
        self.responses.lock().insert(request_id, sealed.clone());
        drop(claim);
        Ok(sealed)
    }

    fn cached(&self, request_id: &str) -> Option<String> {
        self.responses.lock().get(request_id)
    }

    fn claim(&self, request_id: &str) -> Slot<'_> {
        match self.pending.entry(request_id.to_string()) {
            Entry::Occupied(call) => Slot::InFlight(call.get().finished.subscribe()),
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                let cancel = CancellationToken::new();
                let finished = Arc::new(watch::channel(false).0);
                slot.insert(PendingCall {
                    seq,
                    cancel: cancel.clone(),
                    finished: finished.clone(),
                });
                Slot::Claimed(
                    Claim {
                        pending: &self.pending,
                        request_id: request_id.to_string(),
                        seq,
                        finished,
                    },
                    cancel,
                )
            }
        }
    }

    async fn follow(
        &self,
        request_id: &str,
        mut finished: watch::Receiver<bool>,
    ) -> RpcResult<String> {
        debug!(request_id = %request_id, "Duplicate RPC waiting on the call in flight");
        let _ = finished.wait_for(|done| *done).await;
        match self.cached(request_id) {
            Some(cached) => Ok(cached),
            None => Ok(self.cipher.seal(&RpcResponse::canceled())?),
        }
    }

    async fn run(&self, request: &RpcRequest, cancel: CancellationToken) -> RpcResponse {
        let Some(params) = self.cipher.open::<Value>(&request.params) else {
            warn!(method = %request.method, "Could not decrypt RPC params");
            return RpcResponse::error(ErrorCode::DecryptFailed, "Failed to decrypt params");
        };

        let handler = self.handlers.get(&request.method).map(|h| h.value().clone());
        let Some(handler) = handler else {
            return self.method_miss(&request.method);
        };

        if cancel.is_cancelled() {
            return RpcResponse::canceled();
        }
        let result = handler(params, cancel.clone()).await;
        if cancel.is_cancelled() {
            debug!(method = %request.method, "RPC canceled");
            RpcResponse::canceled()
        } else {
            result.into()
        }
    }

    fn method_miss(&self, method: &str) -> RpcResponse {
        match method.split_once(':') {
            Some((prefix, _)) if prefix != self.scope && looks_like_session_id(prefix) => {
                debug!(method = %method, "RPC for a session that is not active");
                RpcResponse::error(ErrorCode::SessionNotActive, "Session not active")
            }
            _ => {
                error!(method = %method, scope = %self.scope, "RPC method not found");
                RpcResponse::error(
                    ErrorCode::MethodNotFound,
                    format!("Method not found: {method}"),
                )
            }
        }
    }

    /// Signal the token of an in-flight call. The entry stays until the call completes.
    pub fn cancel(&self, request_id: &str) -> bool {
        match self.pending.get(request_id) {
            Some(call) => {
                call.cancel.cancel();
                debug!(request_id = %request_id, "Cancel requested for RPC");
                true
            }
            None => false,
        }
    }

    /// Signal every in-flight call and forget them. Used on disconnect.
    pub fn cancel_all(&self) {
        let mut count = 0usize;
        self.pending.retain(|_, call| {
            call.cancel.cancel();
            count += 1;
            false
        });
        if count > 0 {
            info!(scope = %self.scope, count, "Canceled in-flight RPCs");
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }
}

/// Session ids are UUIDs or long lowercase alphanumeric ids.
fn looks_like_session_id(prefix: &str) -> bool {
    Uuid::parse_str(prefix).is_ok()
        || (prefix.len() >= 20
            && prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_shapes() {
        assert!(looks_like_session_id("6f1c0f9e-3a4b-4a8e-9a77-1b2c3d4e5f60"));
        assert!(looks_like_session_id("cmb4x9zq10000abcd1234efgh"));
        assert!(!looks_like_session_id("machine"));
        assert!(!looks_like_session_id("Not A Session"));
    }
}
