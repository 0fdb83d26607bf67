//! Prefix-scoped views over a [`KvStore`].

use std::sync::Arc;

use postbox_shared::Frame;

use crate::error::Result;
use crate::kv::{Batch, KvStore};

/// All keys of a table share `prefix`; callers only ever see the suffix.
#[derive(Clone)]
pub struct Table {
    store: Arc<KvStore>,
    prefix: Vec<u8>,
}

impl Table {
    pub fn new(store: Arc<KvStore>, prefix: impl AsRef<[u8]>) -> Self {
        Self {
            store,
            prefix: prefix.as_ref().to_vec(),
        }
    }

    /// A table nested under this one.
    pub fn sub(&self, prefix: impl AsRef<[u8]>) -> Self {
        Self {
            store: Arc::clone(&self.store),
            prefix: self.key(prefix),
        }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    fn key(&self, key: impl AsRef<[u8]>) -> Vec<u8> {
        let key = key.as_ref();
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }

    pub fn put(&self, key: impl AsRef<[u8]>, value: &[u8]) -> Result<()> {
        self.store.put(&self.key(key), value)
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.store.get(&self.key(key))
    }

    pub fn has(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        self.store.has(&self.key(key))
    }

    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        self.store.delete(&self.key(key))
    }

    /// Entries of this table in key order, with the prefix stripped.
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let prefix_len = self.prefix.len();
        Ok(self
            .store
            .scan_prefix(&self.prefix)?
            .into_iter()
            .map(|(mut k, v)| (k.split_off(prefix_len), v))
            .collect())
    }

    pub fn put_frame<T: Frame>(&self, key: impl AsRef<[u8]>, value: &T) -> Result<()> {
        self.put(key, &value.to_frame()?)
    }

    pub fn get_frame<T: Frame>(&self, key: impl AsRef<[u8]>) -> Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(T::from_frame(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn batch(&self) -> TableBatch {
        TableBatch {
            prefix: self.prefix.clone(),
            batch: Batch::new(),
        }
    }

    /// Commit a batch built from this table (or any table on the same store).
    pub fn write(&self, batch: TableBatch) -> Result<()> {
        self.store.write(batch.batch)
    }
}

/// A [`Batch`] whose keys are relative to a table prefix.
pub struct TableBatch {
    prefix: Vec<u8>,
    batch: Batch,
}

impl TableBatch {
    fn key(&self, key: impl AsRef<[u8]>) -> Vec<u8> {
        let mut full = self.prefix.clone();
        full.extend_from_slice(key.as_ref());
        full
    }

    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl Into<Vec<u8>>) {
        let key = self.key(key);
        self.batch.put(key, value);
    }

    pub fn put_frame<T: Frame>(&mut self, key: impl AsRef<[u8]>, value: &T) -> Result<()> {
        let frame = value.to_frame()?;
        self.put(key, frame);
        Ok(())
    }

    pub fn delete(&mut self, key: impl AsRef<[u8]>) {
        let key = self.key(key);
        self.batch.delete(key);
    }

    /// Fold another table's batch into this one so both commit together.
    pub fn merge(&mut self, other: TableBatch) {
        self.batch.extend(other.batch);
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}
