//! Offline message storage, one prefix per recipient peer.

use std::sync::Arc;

use postbox_shared::{Frame, Jid, Message, MessageBag, MsgType};

use crate::error::{Result, StoreError};
use crate::kv::KvStore;
use crate::table::Table;

const INBOX_PREFIX: &str = "inbox/";

#[derive(Clone)]
pub struct Inbox {
    table: Table,
}

impl Inbox {
    pub fn new(store: Arc<KvStore>) -> Self {
        Self {
            table: Table::new(store, INBOX_PREFIX),
        }
    }

    fn for_peer(&self, peer: &str) -> Table {
        self.table.sub(format!("{peer}/"))
    }

    /// Peer segment a message is filed under: the recipient for direct
    /// messages, the group for group messages.
    pub fn owner_of(msg: &Message) -> Result<&str> {
        let env = &msg.envelope;
        let owner = match env.msg_type {
            MsgType::Normal => env.to.peer_id(),
            MsgType::Group => env.gid.peer_id(),
            other => return Err(StoreError::UnsupportedType(other.into())),
        };
        if owner.is_empty() {
            return Err(StoreError::InvalidRecipient(env.id.clone()));
        }
        Ok(owner)
    }

    /// Store `msg` until its owner comes to collect it. Storing the same id
    /// twice keeps the latest copy.
    pub fn put(&self, msg: &Message) -> Result<()> {
        let owner = Self::owner_of(msg)?;
        self.for_peer(owner).put_frame(&msg.envelope.id, msg)?;

        tracing::debug!(
            id = %msg.envelope.id,
            owner = %owner,
            "message stored in inbox"
        );
        Ok(())
    }

    /// Pending messages for the peer part of `jid`, oldest first.
    pub fn query(&self, jid: &Jid) -> Result<MessageBag> {
        let peer = jid.peer_id();
        if peer.is_empty() {
            return Ok(MessageBag::default());
        }

        let mut messages = Vec::new();
        for (key, value) in self.for_peer(peer).entries()? {
            match Message::from_frame(&value) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    tracing::warn!(
                        key = %String::from_utf8_lossy(&key),
                        error = %e,
                        "skipping undecodable inbox entry"
                    );
                }
            }
        }

        Ok(MessageBag::sorted(messages))
    }

    /// Delete `ids` from the inbox of `jid`. Returns how many were present;
    /// per-id failures are logged and skipped.
    pub fn clean(&self, jid: &Jid, ids: &[String]) -> Result<usize> {
        let peer = jid.peer_id();
        if peer.is_empty() || ids.is_empty() {
            return Ok(0);
        }

        let table = self.for_peer(peer);
        let mut removed = 0;
        for id in ids {
            match table.delete(id) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(StoreError::Closed) => return Err(StoreError::Closed),
                Err(e) => tracing::warn!(peer = %peer, id = %id, error = %e, "inbox delete failed"),
            }
        }

        tracing::debug!(peer = %peer, requested = ids.len(), removed, "inbox cleaned");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postbox_shared::Attr;

    const ALICE: &str = "16Uiu2HAkzRux7XYhYfmTDY2C7xuBapitNp25DvKvpvVnCf9bRne7";
    const BOB: &str = "16Uiu2HAmPLe7Mzm8TsYUubgCAW1aJoeFScxrLj8ppHFivPo97bUZ";

    fn inbox() -> Inbox {
        Inbox::new(Arc::new(KvStore::open_in_memory().unwrap()))
    }

    fn to_bob(content: &str, ct: i64) -> Message {
        let mut msg = Message::new_normal(
            Jid::new(ALICE, BOB),
            Jid::new(BOB, ALICE),
            content,
            vec![Attr::new("k", "v")],
        );
        msg.envelope.ct = ct;
        msg
    }

    #[test]
    fn query_returns_messages_by_creation_time() {
        let inbox = inbox();
        inbox.put(&to_bob("late", 30)).unwrap();
        inbox.put(&to_bob("early", 10)).unwrap();
        inbox.put(&to_bob("middle", 20)).unwrap();

        let bag = inbox.query(&Jid::new(BOB, ALICE)).unwrap();
        let contents: Vec<&str> = bag
            .messages
            .iter()
            .map(|m| m.payload.content.as_str())
            .collect();
        assert_eq!(contents, ["early", "middle", "late"]);

        // Only the peer half of the jid selects the inbox.
        assert_eq!(inbox.query(&Jid::new(BOB, BOB)).unwrap().len(), 3);
        assert!(inbox.query(&Jid::new(ALICE, BOB)).unwrap().is_empty());
    }

    #[test]
    fn clean_removes_only_listed_ids() {
        let inbox = inbox();
        let first = to_bob("one", 1);
        let second = to_bob("two", 2);
        inbox.put(&first).unwrap();
        inbox.put(&second).unwrap();

        let bob = Jid::new(BOB, ALICE);
        let removed = inbox
            .clean(&bob, &[first.envelope.id.clone(), "unknown".to_string()])
            .unwrap();
        assert_eq!(removed, 1);

        let bag = inbox.query(&bob).unwrap();
        assert_eq!(bag.ids(), vec![second.envelope.id]);
    }

    #[test]
    fn query_skips_undecodable_entries() {
        let store = Arc::new(KvStore::open_in_memory().unwrap());
        let inbox = Inbox::new(Arc::clone(&store));
        let good = to_bob("kept", 5);
        inbox.put(&good).unwrap();

        let junk_key = format!("{INBOX_PREFIX}{BOB}/x");
        store.put(junk_key.as_bytes(), &[0xde, 0xad]).unwrap();

        let bag = inbox.query(&Jid::new(BOB, ALICE)).unwrap();
        assert_eq!(bag.ids(), vec![good.envelope.id]);
    }

    #[test]
    fn group_messages_are_filed_under_the_group() {
        let inbox = inbox();
        let gid = Jid::new(BOB, ALICE);
        let msg = Message::new_group(Jid::new(ALICE, BOB), gid.clone(), "hi all", vec![]);
        inbox.put(&msg).unwrap();

        assert_eq!(inbox.query(&gid).unwrap().len(), 1);
    }

    #[test]
    fn rejects_unroutable_messages() {
        let inbox = inbox();

        let mut no_recipient = to_bob("x", 1);
        no_recipient.envelope.to = Jid::default();
        assert!(matches!(
            inbox.put(&no_recipient),
            Err(StoreError::InvalidRecipient(_))
        ));

        let sys = Message::new_sys(None, vec![]);
        assert!(matches!(inbox.put(&sys), Err(StoreError::UnsupportedType(_))));
    }
}
