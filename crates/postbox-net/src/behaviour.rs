//! Composed libp2p `NetworkBehaviour` for postbox nodes.
//!
//! Combines request/response (all postbox protocols), Kademlia (DHT peer
//! discovery), Identify (address exchange), Relay client (NAT traversal via
//! relays), and DCUtR (direct connection upgrade through relay).

use libp2p::{
    dcutr, identify,
    kad::{self, store::MemoryStore},
    relay, request_response,
    swarm::NetworkBehaviour,
};

use crate::codec::{RpcCodec, RpcRequest, RpcResponse};

/// All sub-behaviours are driven by the single swarm event loop in
/// [`crate::swarm`].
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "PostboxEvent")]
pub struct PostboxBehaviour {
    /// Request/response exchanges for every postbox protocol
    pub rpc: request_response::Behaviour<RpcCodec>,
    /// Distributed hash table for peer discovery
    pub kademlia: kad::Behaviour<MemoryStore>,
    pub identify: identify::Behaviour,
    /// Circuit relay v2 client for NAT traversal
    pub relay_client: relay::client::Behaviour,
    pub dcutr: dcutr::Behaviour,
}

/// Events emitted by the composed behaviour, one variant per sub-behaviour.
#[derive(Debug)]
pub enum PostboxEvent {
    Rpc(request_response::Event<RpcRequest, RpcResponse>),
    Kademlia(kad::Event),
    Identify(identify::Event),
    RelayClient(relay::client::Event),
    Dcutr(dcutr::Event),
}

impl From<request_response::Event<RpcRequest, RpcResponse>> for PostboxEvent {
    fn from(event: request_response::Event<RpcRequest, RpcResponse>) -> Self {
        PostboxEvent::Rpc(event)
    }
}

impl From<kad::Event> for PostboxEvent {
    fn from(event: kad::Event) -> Self {
        PostboxEvent::Kademlia(event)
    }
}

impl From<identify::Event> for PostboxEvent {
    fn from(event: identify::Event) -> Self {
        PostboxEvent::Identify(event)
    }
}

impl From<relay::client::Event> for PostboxEvent {
    fn from(event: relay::client::Event) -> Self {
        PostboxEvent::RelayClient(event)
    }
}

impl From<dcutr::Event> for PostboxEvent {
    fn from(event: dcutr::Event) -> Self {
        PostboxEvent::Dcutr(event)
    }
}
