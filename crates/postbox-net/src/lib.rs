// Request/response transports: an in-process hub for tests and embedding,
// and a libp2p swarm with QUIC, relay and DHT discovery.

pub mod behaviour;
pub mod codec;
pub mod discovery;
pub mod identity;
pub mod memory;
pub mod peers;
pub mod swarm;
pub mod transport;

mod error;

pub use behaviour::{PostboxBehaviour, PostboxEvent};
pub use discovery::{load_bootstrap_peers, parse_multiaddrs};
pub use error::{NetError, Result};
pub use identity::{fresh_peer_id, load_or_generate_keypair};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use peers::{ConnectionInfo, ConnectionMode, PeerTracker};
pub use swarm::{spawn_transport, Libp2pTransport, SwarmCommand, SwarmConfig};
pub use transport::{handler_fn, Handler, HandlerFailure, HandlerResult, Inbound, Transport};

pub use libp2p::{Multiaddr, PeerId};
