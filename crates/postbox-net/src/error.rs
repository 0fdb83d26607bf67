use std::time::Duration;

use thiserror::Error;

/// Errors returned by [`crate::Transport`] requests.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Invalid peer id: {0}")]
    InvalidPeer(String),

    /// No route to the peer (not connected, dial failed, left the network).
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The remote has no handler registered for the protocol.
    #[error("Protocol not supported by remote: {0}")]
    ProtocolNotSupported(String),

    /// The remote handler ran and reported a failure.
    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Transport shut down")]
    Shutdown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NetError>;
