//! # postbox-store
//!
//! Persistent mailbox storage: an ordered key/value engine on top of SQLite,
//! prefix-scoped tables, and the inbox and group structures built on them.
//!
//! All handles are synchronous. A single [`MailboxStore`] is shared by the
//! chat service's handlers behind an `Arc`.

pub mod chain;
pub mod groups;
pub mod inbox;
pub mod kv;
pub mod migrations;
pub mod table;

mod error;

use std::path::Path;
use std::sync::Arc;

pub use chain::{Chain, ChainNode, Direction};
pub use error::{Result, StoreError};
pub use groups::GroupStore;
pub use inbox::Inbox;
pub use kv::{Batch, KvStore};
pub use table::{Table, TableBatch};

/// File name of the mailbox database inside the node's home directory.
pub const MAILBOX_DB_FILE: &str = "mailbox.db";

/// The inbox and group stores sharing one [`KvStore`].
#[derive(Clone)]
pub struct MailboxStore {
    kv: Arc<KvStore>,
    inbox: Inbox,
    groups: GroupStore,
}

impl MailboxStore {
    /// Open `<homedir>/mailbox.db`.
    pub fn open(homedir: &Path) -> Result<Self> {
        let kv = KvStore::open_at(&homedir.join(MAILBOX_DB_FILE))?;
        Ok(Self::from_kv(Arc::new(kv)))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::from_kv(Arc::new(KvStore::open_in_memory()?)))
    }

    pub fn from_kv(kv: Arc<KvStore>) -> Self {
        Self {
            inbox: Inbox::new(Arc::clone(&kv)),
            groups: GroupStore::new(Arc::clone(&kv)),
            kv,
        }
    }

    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    pub fn groups(&self) -> &GroupStore {
        &self.groups
    }

    pub fn kv(&self) -> &Arc<KvStore> {
        &self.kv
    }

    /// Close the underlying store. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.kv.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_database_in_homedir() {
        let dir = tempfile::tempdir().unwrap();
        let store = MailboxStore::open(dir.path()).unwrap();
        assert!(dir.path().join(MAILBOX_DB_FILE).exists());

        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(
            store.inbox().query(&postbox_shared::Jid::from("x".repeat(53))),
            Err(StoreError::Closed)
        ));
    }
}
