//! # postbox-node
//!
//! A peer-to-peer chat node.
//!
//! This binary provides:
//! - **libp2p request/response transport** (QUIC, relay, DHT discovery)
//!   carrying the chat and mailbox protocols
//! - **Mailbox** that stores messages for offline recipients homed on this
//!   node, and the membership chains of the groups created here
//! - **JSON-RPC gateway** (axum) with a WebSocket feed of incoming messages

mod api;
mod config;
mod error;
mod rpc;
mod services;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use postbox_chat::ChatService;
use postbox_net::{load_or_generate_keypair, spawn_transport, Transport};
use postbox_shared::Jid;

use crate::api::AppState;
use crate::config::NodeConfig;
use crate::rpc::{Gateway, TokenStore};
use crate::services::user::UserService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,postbox_node=debug")),
        )
        .init();

    info!("Starting postbox node v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = NodeConfig::from_env();
    info!(
        home = %config.home.display(),
        rpc_addr = %config.rpc_addr,
        password_set = config.rpc_password.is_some(),
        mailbox = config.mailbox_id.as_deref().unwrap_or("self"),
        "Loaded configuration"
    );
    std::fs::create_dir_all(&config.home)?;

    // -----------------------------------------------------------------------
    // 3. Identity and transport
    // -----------------------------------------------------------------------
    let keypair = load_or_generate_keypair(&config.identity_path())?;
    let transport = Arc::new(spawn_transport(keypair, config.swarm_config()).await?);

    let peer = transport.encode_peer(&transport.my_identity());
    let mailbox = config.mailbox_id.clone().unwrap_or_else(|| peer.clone());
    let my_id = Jid::new(&peer, &mailbox);
    info!(jid = %my_id, mailbox = %mailbox, "Node identity ready");

    // -----------------------------------------------------------------------
    // 4. Chat service (opens the mailbox store, fatal on failure)
    // -----------------------------------------------------------------------
    let chat = ChatService::new(my_id, &config.home, transport.clone(), config.chat_config())?;
    chat.start()?;

    // -----------------------------------------------------------------------
    // 5. RPC gateway state and background tasks
    // -----------------------------------------------------------------------
    let users = Arc::new(UserService::open(&config.home)?);
    let registry = services::build_registry(&chat, Arc::clone(&users));
    let gateway = Arc::new(Gateway::new(
        registry,
        TokenStore::new(config.token_ttl),
        config.rpc_password.clone(),
    ));

    // Periodic token cleanup (every 10 minutes)
    let gw = gateway.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
        loop {
            interval.tick().await;
            let purged = gw.tokens().purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Expired rpc tokens removed");
            }
        }
    });

    let app_state = AppState {
        gateway,
        chat: chat.clone(),
    };

    // -----------------------------------------------------------------------
    // 6. Run the gateway (blocks until shutdown)
    // -----------------------------------------------------------------------
    let result = tokio::select! {
        result = api::serve(app_state, config.rpc_addr) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    chat.stop()?;
    users.close()?;
    transport.shutdown().await;

    if let Err(e) = &result {
        tracing::error!(error = %e, "RPC gateway failed");
    }
    result
}
