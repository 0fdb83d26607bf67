//! Node key handling.
//!
//! Nodes use secp256k1 keys; their base58 peer ids are exactly one jid
//! segment long.

use std::fs;
use std::path::Path;

use anyhow::Context;
use libp2p::identity::Keypair;
use libp2p::PeerId;
use tracing::info;

/// Load the node key from `path`, generating and saving one if the file is
/// missing. The file holds the protobuf encoding of the keypair.
pub fn load_or_generate_keypair(path: &Path) -> anyhow::Result<Keypair> {
    if path.exists() {
        let bytes = fs::read(path)
            .with_context(|| format!("reading identity key {}", path.display()))?;
        let keypair = Keypair::from_protobuf_encoding(&bytes)
            .with_context(|| format!("decoding identity key {}", path.display()))?;
        info!(peer_id = %keypair.public().to_peer_id(), "Loaded node identity");
        return Ok(keypair);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let keypair = Keypair::generate_secp256k1();
    let encoded = keypair
        .to_protobuf_encoding()
        .context("encoding identity key")?;
    fs::write(path, encoded)
        .with_context(|| format!("writing identity key {}", path.display()))?;

    info!(
        peer_id = %keypair.public().to_peer_id(),
        path = %path.display(),
        "Generated new node identity"
    );
    Ok(keypair)
}

/// A peer id for a throwaway key, used as the peer segment of new group ids.
pub fn fresh_peer_id() -> PeerId {
    Keypair::generate_secp256k1().public().to_peer_id()
}
