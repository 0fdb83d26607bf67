//! Bootstrap peer loading.
//!
//! Bootstrap peers come either from a file (one multiaddr per line, `#`
//! comments) or from a comma-separated list in the node configuration.

use std::fs;
use std::path::Path;

use libp2p::{multiaddr::Protocol, Multiaddr, PeerId};
use tracing::{debug, info, warn};

/// Load bootstrap peer multiaddrs from a file. Malformed lines are logged
/// and skipped; an unreadable file yields no peers.
///
/// ```text
/// # postbox bootstrap nodes
/// /ip4/198.51.100.10/udp/4001/quic-v1/p2p/16Uiu2HAm...
/// ```
pub fn load_bootstrap_peers(path: &Path) -> Vec<Multiaddr> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Failed to read bootstrap peers file"
            );
            return Vec::new();
        }
    };

    let addrs = parse_multiaddrs(
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#')),
    );

    info!(
        count = addrs.len(),
        path = %path.display(),
        "Loaded bootstrap peers"
    );

    addrs
}

/// Parse multiaddr strings, skipping the ones that do not parse.
pub fn parse_multiaddrs<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<Multiaddr> {
    raw.into_iter()
        .filter_map(|s| match s.parse::<Multiaddr>() {
            Ok(addr) => {
                debug!(addr = %addr, "Loaded bootstrap peer");
                Some(addr)
            }
            Err(e) => {
                warn!(addr = %s, error = %e, "Skipping invalid multiaddr");
                None
            }
        })
        .collect()
}

/// Extract a `PeerId` from a multiaddr, if one is present.
pub fn extract_peer_id(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter().find_map(|p| match p {
        Protocol::P2p(peer_id) => Some(peer_id),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_nonexistent_file() {
        let peers = load_bootstrap_peers(Path::new("/nonexistent/bootstrap.txt"));
        assert!(peers.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("peers.txt");

        let mut f = fs::File::create(&file_path).unwrap();
        writeln!(f, "# bootstrap nodes").unwrap();
        writeln!(f, "/ip4/127.0.0.1/udp/4001/quic-v1").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "invalid-addr").unwrap();
        writeln!(f, "/ip4/127.0.0.2/udp/4001/quic-v1").unwrap();
        drop(f);

        assert_eq!(load_bootstrap_peers(&file_path).len(), 2);
    }

    #[test]
    fn test_extract_peer_id() {
        let peer = PeerId::random();
        let addr: Multiaddr = format!("/ip4/10.0.0.1/udp/4001/quic-v1/p2p/{peer}")
            .parse()
            .unwrap();
        assert_eq!(extract_peer_id(&addr), Some(peer));

        let bare = parse_multiaddrs(["/ip4/10.0.0.1/udp/4001/quic-v1", "nope"]);
        assert_eq!(bare.len(), 1);
        assert_eq!(extract_peer_id(&bare[0]), None);
    }
}
