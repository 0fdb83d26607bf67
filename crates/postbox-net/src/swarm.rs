//! libp2p-backed [`Transport`].
//!
//! The swarm runs in a dedicated tokio task. [`Libp2pTransport`] talks to
//! it through a command channel; inbound requests are dispatched to the
//! handler table on their own task and their responses are fed back into
//! the event loop for delivery.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    dcutr, identify,
    identity::Keypair,
    kad::{self, store::MemoryStore},
    multiaddr::Protocol,
    noise, relay,
    request_response::{self, OutboundFailure, OutboundRequestId, ProtocolSupport, ResponseChannel},
    swarm::SwarmEvent,
    Multiaddr, PeerId, Swarm, SwarmBuilder,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use postbox_shared::constants::{DEFAULT_QUIC_PORT, DEFAULT_REQUEST_TIMEOUT_SECS, IDENTIFY_VERSION};

use crate::behaviour::{PostboxBehaviour, PostboxEvent};
use crate::codec::{RpcCodec, RpcRequest, RpcResponse, RpcStatus, RPC_PROTOCOL};
use crate::discovery::{extract_peer_id, load_bootstrap_peers};
use crate::error::{NetError, Result};
use crate::peers::{ConnectionInfo, PeerTracker};
use crate::transport::{parse_target, Handler, HandlerTable, Transport};

type PendingReply = oneshot::Sender<Result<RpcResponse>>;

/// Commands sent *into* the swarm task.
#[derive(Debug)]
pub enum SwarmCommand {
    Dial(Multiaddr),
    Request {
        peer: PeerId,
        request: RpcRequest,
        reply: PendingReply,
    },
    GetConnections(oneshot::Sender<Vec<ConnectionInfo>>),
    Shutdown,
}

/// Configuration for spawning the swarm.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    pub listen_addrs: Vec<Multiaddr>,
    /// File with one bootstrap multiaddr per line.
    pub bootstrap_peers_path: Option<PathBuf>,
    pub bootstrap_peers: Vec<Multiaddr>,
    /// Upper bound the request/response behaviour applies to every
    /// outbound request.
    pub request_timeout: Duration,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            listen_addrs: default_listen_addrs(DEFAULT_QUIC_PORT),
            bootstrap_peers_path: None,
            bootstrap_peers: Vec::new(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// QUIC listen addresses on all IPv4 and IPv6 interfaces.
pub fn default_listen_addrs(port: u16) -> Vec<Multiaddr> {
    vec![
        Multiaddr::empty()
            .with(Protocol::Ip4(Ipv4Addr::UNSPECIFIED))
            .with(Protocol::Udp(port))
            .with(Protocol::QuicV1),
        Multiaddr::empty()
            .with(Protocol::Ip6(Ipv6Addr::UNSPECIFIED))
            .with(Protocol::Udp(port))
            .with(Protocol::QuicV1),
    ]
}

pub struct Libp2pTransport {
    local_peer_id: PeerId,
    commands: mpsc::Sender<SwarmCommand>,
    handlers: Arc<HandlerTable>,
}

impl Libp2pTransport {
    pub async fn dial(&self, addr: Multiaddr) -> Result<()> {
        self.commands
            .send(SwarmCommand::Dial(addr))
            .await
            .map_err(|_| NetError::Shutdown)
    }

    /// Stop the swarm task. Later requests fail with [`NetError::Shutdown`].
    pub async fn shutdown(&self) {
        let _ = self.commands.send(SwarmCommand::Shutdown).await;
    }
}

#[async_trait]
impl Transport for Libp2pTransport {
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

        // The swarm cannot dial itself; serve requests to our own id locally.
        if peer == self.local_peer_id {
            let outcome = tokio::time::timeout(
                timeout,
                self.handlers.dispatch(peer, protocol, payload),
            )
            .await
            .map_err(|_| NetError::Timeout(timeout))??;
            return outcome.map_err(|failure| NetError::Remote(failure.error));
        }

        let (reply, rx) = oneshot::channel();
        let request = RpcRequest {
            protocol: protocol.to_string(),
            payload,
        };
        self.commands
            .send(SwarmCommand::Request {
                peer,
                request,
                reply,
            })
            .await
            .map_err(|_| NetError::Shutdown)?;

        let response = tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| NetError::Timeout(timeout))?
            .map_err(|_| NetError::Shutdown)??;

        match response.status {
            RpcStatus::Ok => Ok(response.payload),
            RpcStatus::Failed => Err(NetError::Remote(response.error)),
            RpcStatus::NoHandler => Err(NetError::ProtocolNotSupported(response.error)),
        }
    }

    fn my_identity(&self) -> PeerId {
        self.local_peer_id
    }

    async fn connections(&self) -> Vec<ConnectionInfo> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(SwarmCommand::GetConnections(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

/// Build the swarm: QUIC transport with relay client, and the composed
/// [`PostboxBehaviour`].
pub fn build_swarm(keypair: Keypair, request_timeout: Duration) -> anyhow::Result<Swarm<PostboxBehaviour>> {
    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_quic()
        .with_relay_client(noise::Config::new, libp2p::yamux::Config::default)?
        .with_behaviour(|key, relay_client| -> std::result::Result<PostboxBehaviour, Box<dyn std::error::Error + Send + Sync>> {
            let local_peer_id = key.public().to_peer_id();

            let rpc = request_response::Behaviour::with_codec(
                RpcCodec,
                [(RPC_PROTOCOL, ProtocolSupport::Full)],
                request_response::Config::default().with_request_timeout(request_timeout),
            );

            let store = MemoryStore::new(local_peer_id);
            let mut kademlia = kad::Behaviour::new(local_peer_id, store);
            kademlia.set_mode(Some(kad::Mode::Server));

            let identify_config = identify::Config::new(IDENTIFY_VERSION.to_string(), key.public())
                .with_push_listen_addr_updates(true)
                .with_interval(Duration::from_secs(60));
            let identify = identify::Behaviour::new(identify_config);

            let dcutr = dcutr::Behaviour::new(local_peer_id);

            Ok(PostboxBehaviour {
                rpc,
                kademlia,
                identify,
                relay_client,
                dcutr,
            })
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    info!(
        peer_id = %swarm.local_peer_id(),
        "Built postbox swarm with QUIC + Relay transport"
    );

    Ok(swarm)
}

/// Spawn the swarm in a background task and return the transport handle.
pub async fn spawn_transport(keypair: Keypair, config: SwarmConfig) -> anyhow::Result<Libp2pTransport> {
    let mut swarm = build_swarm(keypair, config.request_timeout)?;
    let local_peer_id = *swarm.local_peer_id();

    for addr in &config.listen_addrs {
        swarm.listen_on(addr.clone())?;
    }
    info!(peer_id = %local_peer_id, addrs = ?config.listen_addrs, "Swarm listening");

    let mut bootstrap_addrs = config.bootstrap_peers.clone();
    if let Some(ref path) = config.bootstrap_peers_path {
        bootstrap_addrs.extend(load_bootstrap_peers(path));
    }
    for addr in &bootstrap_addrs {
        if let Err(e) = swarm.dial(addr.clone()) {
            warn!(addr = %addr, error = %e, "Failed to dial bootstrap peer");
            continue;
        }
        if let Some(peer_id) = extract_peer_id(addr) {
            swarm
                .behaviour_mut()
                .kademlia
                .add_address(&peer_id, addr.clone());
        }
        debug!(addr = %addr, "Dialing bootstrap peer");
    }
    if !bootstrap_addrs.is_empty() {
        if let Err(e) = swarm.behaviour_mut().kademlia.bootstrap() {
            warn!(error = %e, "Kademlia bootstrap failed to start");
        }
    }

    let (cmd_tx, cmd_rx) = mpsc::channel::<SwarmCommand>(256);
    let handlers = Arc::new(HandlerTable::new());

    tokio::spawn(run_event_loop(
        swarm,
        cmd_rx,
        Arc::clone(&handlers),
        config.request_timeout,
    ));

    Ok(Libp2pTransport {
        local_peer_id,
        commands: cmd_tx,
        handlers,
    })
}

async fn run_event_loop(
    mut swarm: Swarm<PostboxBehaviour>,
    mut cmd_rx: mpsc::Receiver<SwarmCommand>,
    handlers: Arc<HandlerTable>,
    request_timeout: Duration,
) {
    let mut peer_tracker = PeerTracker::new();
    let mut pending: HashMap<OutboundRequestId, PendingReply> = HashMap::new();
    let (resp_tx, mut resp_rx) = mpsc::channel::<(ResponseChannel<RpcResponse>, RpcResponse)>(256);

    loop {
        tokio::select! {
            // --- Incoming commands ---
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SwarmCommand::Dial(addr)) => {
                        if let Err(e) = swarm.dial(addr.clone()) {
                            error!(addr = %addr, error = %e, "Dial failed");
                        }
                    }
                    Some(SwarmCommand::Request { peer, request, reply }) => {
                        if !peer_tracker.is_connected(&peer) {
                            swarm.behaviour_mut().kademlia.get_closest_peers(peer);
                        }
                        debug!(peer = %peer, protocol = %request.protocol, "Sending request");
                        let request_id = swarm.behaviour_mut().rpc.send_request(&peer, request);
                        pending.insert(request_id, reply);
                    }
                    Some(SwarmCommand::GetConnections(reply)) => {
                        let _ = reply.send(peer_tracker.connections());
                    }
                    Some(SwarmCommand::Shutdown) => {
                        info!("Swarm shutdown requested");
                        break;
                    }
                    None => {
                        info!("Command channel closed, shutting down swarm");
                        break;
                    }
                }
            }

            // --- Responses produced by handler tasks ---
            Some((channel, response)) = resp_rx.recv() => {
                if swarm.behaviour_mut().rpc.send_response(channel, response).is_err() {
                    warn!("Response channel closed before the reply was sent");
                }
            }

            // --- Swarm events ---
            event = swarm.select_next_some() => {
                match event {
                    SwarmEvent::Behaviour(PostboxEvent::Rpc(request_response::Event::Message {
                        peer,
                        message,
                        ..
                    })) => match message {
                        request_response::Message::Request { request, channel, .. } => {
                            let handlers = Arc::clone(&handlers);
                            let resp_tx = resp_tx.clone();
                            tokio::spawn(async move {
                                let response = match handlers
                                    .dispatch(peer, &request.protocol, request.payload)
                                    .await
                                {
                                    Ok(Ok(reply)) => RpcResponse::ok(reply),
                                    Ok(Err(failure)) => RpcResponse::failed(
                                        failure.reply.unwrap_or_default(),
                                        failure.error,
                                    ),
                                    Err(_) => RpcResponse::no_handler(&request.protocol),
                                };
                                let _ = resp_tx.send((channel, response)).await;
                            });
                        }
                        request_response::Message::Response { request_id, response } => {
                            if let Some(reply) = pending.remove(&request_id) {
                                let _ = reply.send(Ok(response));
                            }
                        }
                    },

                    SwarmEvent::Behaviour(PostboxEvent::Rpc(request_response::Event::OutboundFailure {
                        peer,
                        request_id,
                        error,
                        ..
                    })) => {
                        debug!(peer = %peer, error = %error, "Outbound request failed");
                        if let Some(reply) = pending.remove(&request_id) {
                            let err = match error {
                                OutboundFailure::Timeout => NetError::Timeout(request_timeout),
                                OutboundFailure::UnsupportedProtocols => {
                                    NetError::ProtocolNotSupported(RPC_PROTOCOL.to_string())
                                }
                                other => NetError::Unreachable(other.to_string()),
                            };
                            let _ = reply.send(Err(err));
                        }
                    }

                    SwarmEvent::Behaviour(PostboxEvent::Rpc(request_response::Event::InboundFailure {
                        peer,
                        error,
                        ..
                    })) => {
                        warn!(peer = %peer, error = %error, "Inbound request failed");
                    }

                    SwarmEvent::Behaviour(PostboxEvent::Rpc(_)) => {}

                    SwarmEvent::Behaviour(PostboxEvent::Kademlia(
                        kad::Event::OutboundQueryProgressed { result, .. },
                    )) => {
                        debug!(result = ?result, "Kademlia query progressed");
                    }

                    SwarmEvent::Behaviour(PostboxEvent::Identify(
                        identify::Event::Received { peer_id, info, .. },
                    )) => {
                        debug!(
                            peer = %peer_id,
                            protocol = ?info.protocol_version,
                            "Identify: received info from peer"
                        );
                        for addr in &info.listen_addrs {
                            swarm
                                .behaviour_mut()
                                .kademlia
                                .add_address(&peer_id, addr.clone());
                        }
                    }

                    SwarmEvent::Behaviour(PostboxEvent::RelayClient(
                        relay::client::Event::ReservationReqAccepted { relay_peer_id, .. },
                    )) => {
                        info!(relay = %relay_peer_id, "Relay reservation accepted");
                    }

                    SwarmEvent::Behaviour(PostboxEvent::Dcutr(event)) => {
                        if event.result.is_ok() {
                            peer_tracker.upgrade_to_direct(&event.remote_peer_id);
                        }
                        debug!(event = ?event, "DCUtR event");
                    }

                    SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                        let addr = endpoint.get_remote_address().clone();
                        info!(peer = %peer_id, addr = %addr, "Peer connected");
                        peer_tracker.on_connected(peer_id, addr);
                    }

                    SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                        if num_established == 0 {
                            peer_tracker.on_disconnected(&peer_id);
                            info!(peer = %peer_id, "Peer disconnected");
                        }
                    }

                    SwarmEvent::NewListenAddr { address, .. } => {
                        info!(addr = %address, "Listening on new address");
                    }

                    SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                        warn!(peer = ?peer_id, error = %error, "Outgoing connection error");
                    }

                    SwarmEvent::IncomingConnectionError { error, .. } => {
                        warn!(error = %error, "Incoming connection error");
                    }

                    _ => {}
                }
            }
        }
    }

    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(NetError::Shutdown));
    }
    info!("Swarm event loop terminated");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_listens_on_quic() {
        let config = SwarmConfig::default();
        assert_eq!(config.listen_addrs.len(), 2);
        assert!(config.listen_addrs[0].to_string().ends_with("/quic-v1"));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn requests_to_self_are_served_locally() {
        let keypair = Keypair::generate_secp256k1();
        let config = SwarmConfig {
            listen_addrs: default_listen_addrs(0),
            ..Default::default()
        };
        let transport = spawn_transport(keypair, config).await.unwrap();
        transport.register_handler(
            "/echo",
            crate::transport::handler_fn(|inbound: crate::Inbound| async move {
                Ok(inbound.payload)
            }),
        );

        let me = transport.encode_peer(&transport.my_identity());
        let reply = transport
            .request_with_timeout(&me, "/echo", b"ping".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, b"ping");

        transport.shutdown().await;
    }
}
