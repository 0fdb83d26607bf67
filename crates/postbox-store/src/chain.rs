//! Doubly-linked chains persisted in a [`Table`].
//!
//! Each node is stored under its own id and carries the ids of its
//! neighbours. A separate tail pointer names the newest node. Every
//! mutation that touches more than one key is committed as a single batch,
//! so readers never observe a half-linked chain.
//!
//! A mutation reads its neighbours before writing the batch, so concurrent
//! writers to one chain must be serialised by the caller.

use std::collections::HashSet;
use std::marker::PhantomData;

use postbox_shared::{Frame, Jid, MemberItem, MemberLog};

use crate::error::{Result, StoreError};
use crate::table::{Table, TableBatch};

/// A value that can live in a [`Chain`].
pub trait ChainNode: Frame + Clone {
    fn node_id(&self) -> &str;
    fn prev_id(&self) -> &str;
    fn next_id(&self) -> &str;
    fn set_prev(&mut self, id: &str);
    fn set_next(&mut self, id: &str);
}

impl ChainNode for MemberItem {
    fn node_id(&self) -> &str {
        self.id.as_str()
    }

    fn prev_id(&self) -> &str {
        self.prev.as_str()
    }

    fn next_id(&self) -> &str {
        self.next.as_str()
    }

    fn set_prev(&mut self, id: &str) {
        self.prev = Jid::from(id);
    }

    fn set_next(&mut self, id: &str) {
        self.next = Jid::from(id);
    }
}

impl ChainNode for MemberLog {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn prev_id(&self) -> &str {
        &self.prev
    }

    fn next_id(&self) -> &str {
        &self.next
    }

    fn set_prev(&mut self, id: &str) {
        self.prev = id.to_string();
    }

    fn set_next(&mut self, id: &str) {
        self.next = id.to_string();
    }
}

/// Walk direction for [`Chain::walk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// One chain inside a table: nodes live under `<name>/<id>`, the tail
/// pointer under `<name>-last`.
pub struct Chain<N> {
    table: Table,
    node_prefix: String,
    tail_key: String,
    _node: PhantomData<N>,
}

impl<N: ChainNode> Chain<N> {
    pub fn new(table: Table, name: &str) -> Self {
        Self {
            table,
            node_prefix: format!("{name}/"),
            tail_key: format!("{name}-last"),
            _node: PhantomData,
        }
    }

    fn node_key(&self, id: &str) -> String {
        format!("{}{}", self.node_prefix, id)
    }

    pub fn get(&self, id: &str) -> Result<Option<N>> {
        if id.is_empty() {
            return Ok(None);
        }
        self.table.get_frame(self.node_key(id))
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        if id.is_empty() {
            return Ok(false);
        }
        self.table.has(self.node_key(id))
    }

    /// Id of the newest node, empty when the chain is empty.
    pub fn tail_id(&self) -> Result<String> {
        match self.table.get(&self.tail_key)? {
            Some(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            None => Ok(String::new()),
        }
    }

    pub fn tail(&self) -> Result<Option<N>> {
        let id = self.tail_id()?;
        self.get(&id)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.tail_id()?.is_empty())
    }

    /// Link `node` after the current tail. Node, old tail and tail pointer
    /// are written together.
    pub fn insert_after_tail(&self, mut node: N) -> Result<N> {
        let mut batch = self.table.batch();
        self.stage_insert(&mut batch, &mut node)?;
        self.table.write(batch)?;
        Ok(node)
    }

    /// Queue an append into `batch` without committing it.
    fn stage_insert(&self, batch: &mut TableBatch, node: &mut N) -> Result<()> {
        node.set_next("");
        match self.tail()? {
            Some(mut tail) => {
                tail.set_next(node.node_id());
                node.set_prev(tail.node_id());
                batch.put_frame(self.node_key(tail.node_id()), &tail)?;
            }
            None => node.set_prev(""),
        }

        batch.put_frame(self.node_key(node.node_id()), &*node)?;
        batch.put(&self.tail_key, node.node_id().as_bytes().to_vec());
        Ok(())
    }

    /// Unlink and delete `id`. The node must have a predecessor, so the
    /// head of a chain can never be removed.
    pub fn splice_out(&self, id: &str) -> Result<N> {
        let node = self
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut prev: N = self
            .get(node.prev_id())?
            .ok_or_else(|| StoreError::NoPredecessor(id.to_string()))?;

        let mut batch = self.table.batch();
        match self.get(node.next_id())? {
            Some(mut next) => {
                prev.set_next(next.node_id());
                next.set_prev(prev.node_id());
                batch.put_frame(self.node_key(next.node_id()), &next)?;
            }
            None => {
                prev.set_next("");
                batch.put(&self.tail_key, prev.node_id().as_bytes().to_vec());
            }
        }
        batch.put_frame(self.node_key(prev.node_id()), &prev)?;
        batch.delete(self.node_key(id));

        self.table.write(batch)?;
        Ok(node)
    }

    /// Nodes from `start` (inclusive) following `direction`. Stops at a
    /// dangling link or on revisiting a node.
    pub fn walk(&self, start: &str, direction: Direction) -> Result<Vec<N>> {
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        let mut cursor = start.to_string();

        while let Some(node) = self.get(&cursor)? {
            if !seen.insert(cursor.clone()) {
                tracing::warn!(node = %cursor, "cycle detected in chain");
                break;
            }
            cursor = match direction {
                Direction::Forward => node.next_id().to_string(),
                Direction::Backward => node.prev_id().to_string(),
            };
            nodes.push(node);
        }

        Ok(nodes)
    }

    /// Every node, oldest first.
    pub fn all(&self) -> Result<Vec<N>> {
        let tail = self.tail_id()?;
        let mut nodes = self.walk(&tail, Direction::Backward)?;
        nodes.reverse();
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::kv::KvStore;

    fn chain() -> Chain<MemberLog> {
        let store = Arc::new(KvStore::open_in_memory().unwrap());
        Chain::new(Table::new(store, "test/"), "log")
    }

    fn node(id: &str) -> MemberLog {
        MemberLog {
            id: id.to_string(),
            ..Default::default()
        }
    }

    fn ids(nodes: &[MemberLog]) -> Vec<&str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn empty_chain() {
        let chain = chain();
        assert!(chain.is_empty().unwrap());
        assert!(chain.tail().unwrap().is_none());
        assert!(chain.all().unwrap().is_empty());
    }

    #[test]
    fn append_links_both_directions() {
        let chain = chain();
        for id in ["a", "b", "c"] {
            chain.insert_after_tail(node(id)).unwrap();
        }

        assert_eq!(chain.tail_id().unwrap(), "c");
        assert_eq!(ids(&chain.walk("a", Direction::Forward).unwrap()), ["a", "b", "c"]);
        assert_eq!(ids(&chain.walk("c", Direction::Backward).unwrap()), ["c", "b", "a"]);

        let b = chain.get("b").unwrap().unwrap();
        assert_eq!((b.prev.as_str(), b.next.as_str()), ("a", "c"));
    }

    #[test]
    fn remove_middle_and_tail() {
        let chain = chain();
        for id in ["a", "b", "c"] {
            chain.insert_after_tail(node(id)).unwrap();
        }

        chain.splice_out("b").unwrap();
        assert_eq!(ids(&chain.all().unwrap()), ["a", "c"]);
        assert_eq!(chain.get("c").unwrap().unwrap().prev, "a");
        assert!(!chain.contains("b").unwrap());

        chain.splice_out("c").unwrap();
        assert_eq!(chain.tail_id().unwrap(), "a");
        assert_eq!(chain.get("a").unwrap().unwrap().next, "");

        chain.insert_after_tail(node("d")).unwrap();
        assert_eq!(ids(&chain.all().unwrap()), ["a", "d"]);
    }

    #[test]
    fn head_cannot_be_removed() {
        let chain = chain();
        chain.insert_after_tail(node("a")).unwrap();
        chain.insert_after_tail(node("b")).unwrap();

        assert!(matches!(chain.splice_out("a"), Err(StoreError::NoPredecessor(_))));
        assert!(matches!(chain.splice_out("zz"), Err(StoreError::NotFound(_))));
        assert_eq!(ids(&chain.all().unwrap()), ["a", "b"]);
    }

    #[test]
    fn walk_from_unknown_start_is_empty() {
        let chain = chain();
        chain.insert_after_tail(node("a")).unwrap();
        assert!(chain.walk("missing", Direction::Forward).unwrap().is_empty());
        assert!(chain.walk("", Direction::Backward).unwrap().is_empty());
    }
}
