//! Transport contract shared by the chat service and its backends.
//!
//! A transport carries opaque request/response exchanges between peers.
//! Each exchange names a protocol id; the receiving side routes it to the
//! handler registered for that id. Handlers run on their own task per
//! request.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use libp2p::PeerId;

use crate::error::{NetError, Result};
use crate::peers::ConnectionInfo;

/// One inbound request as seen by a handler.
#[derive(Debug, Clone)]
pub struct Inbound {
    /// Unique per request on this node
    pub session_id: u64,
    /// Authenticated identity of the requester
    pub caller: PeerId,
    pub payload: Vec<u8>,
}

/// A handler that could not serve its request. Requesters observe it as
/// [`NetError::Remote`] carrying `error`; `reply` travels on the wire
/// alongside the failure status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub reply: Option<Vec<u8>>,
    pub error: String,
}

impl HandlerFailure {
    pub fn new(error: impl std::fmt::Display) -> Self {
        Self {
            reply: None,
            error: error.to_string(),
        }
    }

    pub fn with_reply(reply: Vec<u8>, error: impl std::fmt::Display) -> Self {
        Self {
            reply: Some(reply),
            error: error.to_string(),
        }
    }
}

pub type HandlerResult = std::result::Result<Vec<u8>, HandlerFailure>;

/// A registered protocol handler.
pub type Handler = Arc<dyn Fn(Inbound) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Inbound) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |inbound| Box::pin(f(inbound)))
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Route requests for `protocol` to `handler`, replacing any previous
    /// registration.
    fn register_handler(&self, protocol: &str, handler: Handler);

    /// Send `payload` to `target` (a peer id string) and wait up to
    /// `timeout` for the reply.
    async fn request_with_timeout(
        &self,
        target: &str,
        protocol: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>>;

    /// Textual form of a peer id, as used in jids.
    fn encode_peer(&self, peer: &PeerId) -> String {
        peer.to_base58()
    }

    fn my_identity(&self) -> PeerId;

    /// Currently connected peers with the path each one is reached by.
    async fn connections(&self) -> Vec<ConnectionInfo>;

    /// Ids of the currently connected peers.
    async fn peers(&self) -> Vec<PeerId> {
        self.connections()
            .await
            .into_iter()
            .map(|info| info.peer_id)
            .collect()
    }
}

/// Parse the textual peer id of a request target.
pub fn parse_target(target: &str) -> Result<PeerId> {
    target
        .parse::<PeerId>()
        .map_err(|_| NetError::InvalidPeer(target.to_string()))
}

/// Protocol handler table used by the transport backends.
#[derive(Default)]
pub struct HandlerTable {
    handlers: RwLock<HashMap<String, Handler>>,
    next_session: AtomicU64,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, protocol: &str, handler: Handler) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if handlers.insert(protocol.to_string(), handler).is_some() {
            tracing::debug!(protocol = %protocol, "handler replaced");
        }
    }

    pub fn get(&self, protocol: &str) -> Option<Handler> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.get(protocol).cloned()
    }

    pub fn protocols(&self) -> Vec<String> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.keys().cloned().collect()
    }

    /// Run the handler for `protocol` against `payload`. The lock is
    /// released before the handler is awaited.
    pub async fn dispatch(
        &self,
        caller: PeerId,
        protocol: &str,
        payload: Vec<u8>,
    ) -> std::result::Result<HandlerResult, NetError> {
        let handler = self
            .get(protocol)
            .ok_or_else(|| NetError::ProtocolNotSupported(protocol.to_string()))?;

        let inbound = Inbound {
            session_id: self.next_session.fetch_add(1, Ordering::Relaxed),
            caller,
            payload,
        };
        let session_id = inbound.session_id;

        let result = handler(inbound).await;
        if let Err(failure) = &result {
            tracing::debug!(
                protocol = %protocol,
                session = session_id,
                caller = %caller,
                error = %failure.error,
                "handler failed"
            );
        }
        Ok(result)
    }
}
