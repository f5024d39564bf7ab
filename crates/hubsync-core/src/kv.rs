//! Ordered, transactional key-value contract.
//!
//! Stores and the trie only ever talk to a [`KvStore`]. Backends must iterate
//! keys in lexicographic byte order and apply a [`WriteBatch`] atomically.

use crate::error::HubError;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;

/// Errors raised by KV backends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KvError {
    /// The backend failed to read or write
    #[error("backend error: {0}")]
    Backend(String),
    /// A stored value could not be decoded
    #[error("corrupt value: {0}")]
    Corrupt(String),
}

impl From<KvError> for HubError {
    fn from(err: KvError) -> Self {
        HubError::StorageFailure(err.to_string())
    }
}

/// A single write inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite
    Put(Vec<u8>, Vec<u8>),
    /// Remove if present
    Delete(Vec<u8>),
}

/// Writes applied together or not at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key, value));
    }

    /// Queue a delete.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete(key));
    }

    /// Append every op of `other`.
    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    /// Number of queued ops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Queued ops in order.
    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Consume into ops.
    #[must_use]
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Ordered, transactional key-value store.
pub trait KvStore: Send + Sync {
    /// Read one key.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    /// Apply a batch atomically.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails; no op of the batch is applied then.
    fn commit(&self, batch: WriteBatch) -> Result<(), KvError>;

    /// All entries whose key starts with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;

    /// Write one key.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        let mut batch = WriteBatch::new();
        batch.put(key.to_vec(), value.to_vec());
        self.commit(batch)
    }

    /// Remove one key.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        let mut batch = WriteBatch::new();
        batch.delete(key.to_vec());
        self.commit(batch)
    }
}

/// Smallest key greater than every key starting with `prefix`.
///
/// `None` when the prefix is empty or all `0xff`, meaning "no upper bound".
#[must_use]
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// In-memory backend over a `BTreeMap`.
#[derive(Default)]
pub struct MemoryKv {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl fmt::Debug for MemoryKv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryKv").field("keys", &self.len()).finish()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), KvError> {
        let mut map = self.inner.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => {
                    map.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let map = self.inner.read();
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}
