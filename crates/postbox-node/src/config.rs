//! Node configuration loaded from environment variables.
//!
//! Every setting has a default so a node starts with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use postbox_chat::ChatConfig;
use postbox_net::swarm::default_listen_addrs;
use postbox_net::{parse_multiaddrs, Multiaddr, PeerId, SwarmConfig};
use postbox_shared::constants::{DEFAULT_QUIC_PORT, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_RPC_PORT};

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Directory holding the identity key and the databases.
    /// Env: `POSTBOX_HOME`
    /// Default: `./postbox-data`
    pub home: PathBuf,

    /// libp2p multiaddrs to listen on, comma separated.
    /// Env: `LISTEN_ADDR`
    /// Default: QUIC on port 4001, IPv4 and IPv6.
    pub listen_addrs: Vec<Multiaddr>,

    /// Socket address of the JSON-RPC gateway.
    /// Env: `RPC_ADDR`
    /// Default: `127.0.0.1:8080`
    pub rpc_addr: SocketAddr,

    /// Password checked by the `auth` method. `None` accepts anyone.
    /// Env: `RPC_PASSWORD`
    pub rpc_password: Option<String>,

    /// Peer id of the node holding our offline mailbox.
    /// Env: `MAILBOX_ID`
    /// Default: this node.
    pub mailbox_id: Option<String>,

    /// Bootstrap multiaddrs, comma separated. Merged with
    /// `<home>/bootstrap.txt` when that file exists.
    /// Env: `BOOTSTRAP_PEERS`
    pub bootstrap_peers: Vec<Multiaddr>,

    /// Per-attempt timeout of outbound requests.
    /// Env: `REQUEST_TIMEOUT_SECS`
    /// Default: 10 s
    pub request_timeout: Duration,

    /// How long an RPC token stays valid.
    /// Env: `TOKEN_TTL_SECS`
    /// Default: 24 h
    pub token_ttl: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            home: PathBuf::from("./postbox-data"),
            listen_addrs: default_listen_addrs(DEFAULT_QUIC_PORT),
            rpc_addr: ([127, 0, 0, 1], DEFAULT_RPC_PORT).into(),
            rpc_password: None,
            mailbox_id: None,
            bootstrap_peers: Vec::new(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            token_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(home) = var("POSTBOX_HOME") {
            config.home = PathBuf::from(home);
        }

        if let Some(raw) = var("LISTEN_ADDR") {
            let addrs = parse_multiaddrs(split_list(&raw));
            if addrs.is_empty() {
                tracing::warn!(value = %raw, "Invalid LISTEN_ADDR, using default");
            } else {
                config.listen_addrs = addrs;
            }
        }

        if let Some(addr) = var("RPC_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.rpc_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid RPC_ADDR, using default"),
            }
        }

        if let Some(pwd) = var("RPC_PASSWORD") {
            if !pwd.is_empty() {
                config.rpc_password = Some(pwd);
            }
        }

        if let Some(id) = var("MAILBOX_ID") {
            if id.parse::<PeerId>().is_ok() {
                config.mailbox_id = Some(id);
            } else {
                tracing::warn!(value = %id, "Invalid MAILBOX_ID, using own identity");
            }
        }

        if let Some(raw) = var("BOOTSTRAP_PEERS") {
            config.bootstrap_peers = parse_multiaddrs(split_list(&raw));
        }

        if let Some(val) = var("REQUEST_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid REQUEST_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(val) = var("TOKEN_TTL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.token_ttl = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid TOKEN_TTL_SECS, using default"),
            }
        }

        config
    }

    pub fn identity_path(&self) -> PathBuf {
        self.home.join("identity.key")
    }

    pub fn bootstrap_file(&self) -> PathBuf {
        self.home.join("bootstrap.txt")
    }

    pub fn chat_config(&self) -> ChatConfig {
        ChatConfig {
            request_timeout: self.request_timeout,
            ..Default::default()
        }
    }

    pub fn swarm_config(&self) -> SwarmConfig {
        SwarmConfig {
            listen_addrs: self.listen_addrs.clone(),
            bootstrap_peers_path: Some(self.bootstrap_file()),
            bootstrap_peers: self.bootstrap_peers.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

/// Comma separated items, trimmed, empties dropped.
fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = NodeConfig::from_lookup(lookup(&[]));
        assert_eq!(config.rpc_addr, ([127, 0, 0, 1], 8080).into());
        assert_eq!(config.listen_addrs.len(), 2);
        assert_eq!(config.token_ttl, Duration::from_secs(86_400));
        assert!(config.rpc_password.is_none());
        assert!(config.mailbox_id.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("POSTBOX_HOME", "/tmp/pb"),
            ("RPC_ADDR", "0.0.0.0:9000"),
            ("RPC_PASSWORD", "secret"),
            ("LISTEN_ADDR", "/ip4/127.0.0.1/udp/5001/quic-v1"),
            ("REQUEST_TIMEOUT_SECS", "3"),
            ("TOKEN_TTL_SECS", "60"),
        ]));

        assert_eq!(config.home, PathBuf::from("/tmp/pb"));
        assert_eq!(config.identity_path(), PathBuf::from("/tmp/pb/identity.key"));
        assert_eq!(config.rpc_addr, ([0, 0, 0, 0], 9000).into());
        assert_eq!(config.rpc_password.as_deref(), Some("secret"));
        assert_eq!(config.listen_addrs.len(), 1);
        assert_eq!(config.chat_config().request_timeout, Duration::from_secs(3));
        assert_eq!(config.token_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("RPC_ADDR", "not-an-addr"),
            ("MAILBOX_ID", "nope"),
            ("REQUEST_TIMEOUT_SECS", "0"),
            ("RPC_PASSWORD", ""),
        ]));

        assert_eq!(config.rpc_addr, NodeConfig::default().rpc_addr);
        assert!(config.mailbox_id.is_none());
        assert!(config.rpc_password.is_none());
        assert_eq!(
            config.request_timeout,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_mailbox_id_accepts_peer_ids() {
        let id = postbox_net::fresh_peer_id().to_base58();
        let config = NodeConfig::from_lookup(lookup(&[("MAILBOX_ID", &id)]));
        assert_eq!(config.mailbox_id, Some(id));
    }
}
