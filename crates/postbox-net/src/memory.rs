//! In-process transport.
//!
//! A [`MemoryNetwork`] is a hub that any number of [`MemoryTransport`]
//! nodes join. Requests are delivered by calling the target's handler on a
//! fresh task, with the same timeout and failure semantics as the libp2p
//! backend. Nodes can leave the hub to simulate going offline.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use libp2p::identity::Keypair;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};

use crate::error::{NetError, Result};
use crate::peers::ConnectionInfo;
use crate::transport::{parse_target, Handler, HandlerTable, Transport};

#[derive(Clone, Default)]
pub struct MemoryNetwork {
    nodes: Arc<RwLock<HashMap<PeerId, Arc<HandlerTable>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join with a fresh secp256k1 identity.
    pub fn join(&self) -> Arc<MemoryTransport> {
        self.join_as(Keypair::generate_secp256k1().public().to_peer_id())
    }

    pub fn join_as(&self, id: PeerId) -> Arc<MemoryTransport> {
        let handlers = Arc::new(HandlerTable::new());
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&handlers));

        tracing::debug!(peer = %id, "joined memory network");

        Arc::new(MemoryTransport {
            id,
            network: self.clone(),
            handlers,
        })
    }

    /// Detach `id`; later requests to it fail as unreachable.
    pub fn leave(&self, id: &PeerId) {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    fn lookup(&self, id: &PeerId) -> Option<Arc<HandlerTable>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn members(&self) -> Vec<PeerId> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}

pub struct MemoryTransport {
    id: PeerId,
    network: MemoryNetwork,
    handlers: Arc<HandlerTable>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn register_handler(&self, protocol: &str, handler: Handler) {
        self.handlers.insert(protocol, handler);
    }

    async fn request_with_timeout(
        &self,
        target: &str,
        protocol: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let peer = parse_target(target)?;
        let remote = self
            .network
            .lookup(&peer)
            .ok_or_else(|| NetError::Unreachable(target.to_string()))?;

        let caller = self.id;
        let protocol_owned = protocol.to_string();
        let mut task = tokio::spawn(async move {
            remote.dispatch(caller, &protocol_owned, payload).await
        });

        // A caller that gave up also cancels the remote handler.
        let joined = match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                return Err(NetError::Timeout(timeout));
            }
        };
        let outcome = joined.map_err(|e| NetError::Remote(e.to_string()))??;

        outcome.map_err(|failure| NetError::Remote(failure.error))
    }

    fn my_identity(&self) -> PeerId {
        self.id
    }

    /// Every other node on the hub, reached directly at its `/p2p` address.
    async fn connections(&self) -> Vec<ConnectionInfo> {
        self.network
            .members()
            .into_iter()
            .filter(|peer| *peer != self.id)
            .map(|peer| ConnectionInfo::new(peer, Multiaddr::empty().with(Protocol::P2p(peer))))
            .collect()
    }
}
