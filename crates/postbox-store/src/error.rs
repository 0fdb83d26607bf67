use thiserror::Error;

use postbox_shared::CodecError;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The store has been closed.
    #[error("Store is closed")]
    Closed,

    /// A thread panicked while holding the connection lock.
    #[error("Store lock poisoned")]
    Poisoned,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A chain node that must exist is missing.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Removing a chain node that has nothing before it (the group owner).
    #[error("Member {0} has no predecessor")]
    NoPredecessor(String),

    #[error("Member {0} already exists")]
    MemberExists(String),

    #[error("Group id must not be empty")]
    MissingGroupId,

    #[error("Group owner must be set")]
    MissingOwner,

    #[error("Operation not supported: {0}")]
    UnsupportedAction(String),

    #[error("Unsupported message type: {0}")]
    UnsupportedType(u8),

    /// A message whose recipient segment is empty.
    #[error("Message {0} has no routable recipient")]
    InvalidRecipient(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
