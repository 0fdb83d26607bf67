use thiserror::Error;

use postbox_net::NetError;
use postbox_shared::CodecError;
use postbox_store::StoreError;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Message type {0} is not supported")]
    Unsupported(u8),

    /// The local identity has no mailbox segment.
    #[error("Mailbox not found")]
    MailboxNotFound,

    /// A mailbox replied with an error.
    #[error("Mailbox error: {0}")]
    Mailbox(String),

    #[error("Chat service already started")]
    AlreadyStarted,
}

pub type Result<T> = std::result::Result<T, ChatError>;
