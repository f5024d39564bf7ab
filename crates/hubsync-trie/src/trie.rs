//! Merkle trie over sync identifiers.
//!
//! Nodes are addressed by their byte prefix. The root always stays in memory;
//! other nodes are loaded from the KV store when a write path needs them and
//! kept until [`MerkleTrie::unload_children_at_root`]. Read paths load missing
//! nodes without caching them.
//!
//! # Invariants
//!
//! - The timestamp levels (depth < [`TIMESTAMP_LENGTH`]) are never compacted.
//! - Below them, a node holding exactly one id is a leaf.
//! - No empty node exists apart from the root.
//!
//! Together these make the shape, and so every digest, a pure function of the
//! id set: insertion order and delete history never show.

use crate::node::{db_key, ChildSummary, TrieHash, TrieNode, EMPTY_HASH};
use crate::sync_id::{SyncId, TIMESTAMP_LENGTH};
use hubsync_core::{HubError, KvStore, RootPrefix, WriteBatch};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Trie shared between the event updater, the sync engine and RPC handlers.
pub type SharedTrie = Arc<RwLock<MerkleTrie>>;

/// Dirty plus removed nodes that force a flush to the KV store.
const AUTO_COMMIT_THRESHOLD: usize = 10_000;

/// Digest summary of the path to a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrieSnapshot {
    /// Prefix actually covered; shorter than requested when the trie lacks it
    pub prefix: Vec<u8>,
    /// Per prefix byte, the combined digest of the siblings off the path
    pub excluded_hashes: Vec<TrieHash>,
    /// Ids under the excluded siblings
    pub num_messages: u64,
}

/// Summary of one child in [`NodeMetadata`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildMetadata {
    /// Full prefix of the child
    pub prefix: Vec<u8>,
    /// Ids under the child
    pub num_messages: u64,
    /// Child digest
    pub hash: TrieHash,
}

/// A node and its children's digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Prefix of the node
    pub prefix: Vec<u8>,
    /// Ids under the node
    pub num_messages: u64,
    /// Node digest
    pub hash: TrieHash,
    /// Children keyed by their last prefix byte
    pub children: BTreeMap<u8, ChildMetadata>,
}

impl NodeMetadata {
    /// Whether the node has no children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Prefix-addressed Merkle trie persisted in a [`KvStore`].
pub struct MerkleTrie {
    db: Arc<dyn KvStore>,
    root: TrieNode,
    nodes: HashMap<Vec<u8>, TrieNode>,
    dirty: HashSet<Vec<u8>>,
    removed: HashSet<Vec<u8>>,
}

impl fmt::Debug for MerkleTrie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MerkleTrie")
            .field("items", &self.root.items)
            .field("root_hash", &hex::encode(self.root.hash))
            .field("loaded", &self.nodes.len())
            .field("dirty", &self.dirty.len())
            .finish_non_exhaustive()
    }
}

impl MerkleTrie {
    /// Open the trie persisted in `db`, or an empty one.
    ///
    /// # Errors
    ///
    /// Returns error if the stored root cannot be read or decoded.
    pub fn open(db: Arc<dyn KvStore>) -> Result<Self, HubError> {
        let root = match db.get(&db_key(&[]))? {
            Some(bytes) => TrieNode::decode(&bytes)?,
            None => TrieNode::default(),
        };
        tracing::debug!(items = root.items, "Opened merkle trie");
        Ok(Self {
            db,
            root,
            nodes: HashMap::new(),
            dirty: HashSet::new(),
            removed: HashSet::new(),
        })
    }

    /// Wrap for sharing.
    #[must_use]
    pub fn shared(self) -> SharedTrie {
        Arc::new(RwLock::new(self))
    }

    /// Digest of the whole trie.
    #[must_use]
    pub fn root_hash(&self) -> TrieHash {
        self.root.hash
    }

    /// Number of ids in the trie.
    #[must_use]
    pub fn items(&self) -> u64 {
        self.root.items
    }

    /// Nodes held in memory besides the root.
    #[must_use]
    pub fn loaded_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Insert an id. Returns `false` if it was already present.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a node on the path cannot be loaded.
    pub fn insert(&mut self, id: &SyncId) -> Result<bool, HubError> {
        let key = id.as_bytes();
        let mut depth = 0;
        loop {
            if depth >= TIMESTAMP_LENGTH {
                let node = self.node_mut(&key[..depth])?;
                if node.is_leaf() {
                    match node.key.take() {
                        None => {
                            *node = TrieNode::leaf(key.to_vec());
                            break;
                        }
                        Some(existing) if existing == key => {
                            node.key = Some(existing);
                            return Ok(false);
                        }
                        Some(existing) => {
                            // Push the resident id one level down and keep descending.
                            let byte = byte_at(&existing, depth)?;
                            let child = TrieNode::leaf(existing);
                            node.children.insert(byte, child.summary());
                            let mut child_prefix = key[..depth].to_vec();
                            child_prefix.push(byte);
                            self.put_node(child_prefix, child);
                        }
                    }
                }
            }

            let byte = byte_at(key, depth)?;
            let node = self.node_mut(&key[..depth])?;
            if !node.children.contains_key(&byte) {
                node.children.insert(
                    byte,
                    ChildSummary {
                        hash: EMPTY_HASH,
                        items: 0,
                    },
                );
                self.put_node(key[..=depth].to_vec(), TrieNode::default());
            }
            depth += 1;
        }

        self.mark_dirty(&key[..depth]);
        for d in (0..depth).rev() {
            let summary = self.node(&key[..=d])?.summary();
            let parent = self.node_mut(&key[..d])?;
            parent.children.insert(key[d], summary);
            parent.refresh();
            self.mark_dirty(&key[..d]);
        }

        self.maybe_commit()?;
        Ok(true)
    }

    /// Delete an id. Returns `false` if it was absent.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a node on the path cannot be loaded.
    pub fn delete(&mut self, id: &SyncId) -> Result<bool, HubError> {
        let key = id.as_bytes();
        let Some(depth) = self.leaf_depth(key)? else {
            return Ok(false);
        };

        self.remove_node(&key[..depth]);
        let mut child_removed = true;
        for d in (0..depth).rev() {
            let byte = key[d];
            let summary = if child_removed {
                None
            } else {
                Some(self.node(&key[..=d])?.summary())
            };

            let parent = self.node_mut(&key[..d])?;
            match summary {
                Some(summary) => {
                    parent.children.insert(byte, summary);
                }
                None => {
                    parent.children.remove(&byte);
                }
            }
            parent.refresh();
            let compactable =
                d >= TIMESTAMP_LENGTH && parent.items == 1 && parent.children.len() == 1;

            if compactable {
                self.pull_up_leaf(&key[..d])?;
            }

            child_removed = d > 0 && self.node(&key[..d])?.items == 0;
            if child_removed {
                self.remove_node(&key[..d]);
            } else {
                self.mark_dirty(&key[..d]);
            }
        }

        self.maybe_commit()?;
        Ok(true)
    }

    /// Whether the id is present.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a node on the path cannot be loaded.
    pub fn exists(&self, id: &SyncId) -> Result<bool, HubError> {
        Ok(self.leaf_depth(id.as_bytes())?.is_some())
    }

    /// Snapshot of the path to `prefix`: one excluded hash per prefix byte.
    ///
    /// Stops at the first byte with no child; the returned prefix then ends
    /// with that byte.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a node on the path cannot be loaded.
    pub fn get_snapshot(&self, prefix: &[u8]) -> Result<TrieSnapshot, HubError> {
        let mut excluded_hashes = Vec::with_capacity(prefix.len());
        let mut num_messages = 0;
        let mut node = self.node(&[])?;

        for (i, byte) in prefix.iter().enumerate() {
            let (hash, items) = node.excluded_hash(*byte);
            excluded_hashes.push(hash);
            num_messages += items;

            if i + 1 == prefix.len() {
                break;
            }
            if !node.children.contains_key(byte) {
                return Ok(TrieSnapshot {
                    prefix: prefix[..=i].to_vec(),
                    excluded_hashes,
                    num_messages,
                });
            }
            node = self.node(&prefix[..=i])?;
        }

        Ok(TrieSnapshot {
            prefix: prefix.to_vec(),
            excluded_hashes,
            num_messages,
        })
    }

    /// Longest leading part of `prefix` on which `excluded_hashes` agree with ours.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a node on the path cannot be loaded.
    pub fn get_divergence_prefix(
        &self,
        prefix: &[u8],
        excluded_hashes: &[TrieHash],
    ) -> Result<Vec<u8>, HubError> {
        let ours = self.get_snapshot(prefix)?.excluded_hashes;
        for i in 0..prefix.len() {
            if ours.get(i) != excluded_hashes.get(i) {
                return Ok(prefix[..i].to_vec());
            }
        }
        Ok(prefix.to_vec())
    }

    /// Metadata of the node at `prefix`, `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a node on the path cannot be loaded.
    pub fn get_node_metadata(&self, prefix: &[u8]) -> Result<Option<NodeMetadata>, HubError> {
        let Some(node) = self.find(prefix)? else {
            return Ok(None);
        };
        let children = node
            .children
            .iter()
            .map(|(byte, child)| {
                let mut child_prefix = prefix.to_vec();
                child_prefix.push(*byte);
                (
                    *byte,
                    ChildMetadata {
                        prefix: child_prefix,
                        num_messages: child.items,
                        hash: child.hash,
                    },
                )
            })
            .collect();
        Ok(Some(NodeMetadata {
            prefix: prefix.to_vec(),
            num_messages: node.items,
            hash: node.hash,
            children,
        }))
    }

    /// Every id under `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a node cannot be loaded or holds a bad id.
    pub fn get_all_values(&self, prefix: &[u8]) -> Result<Vec<SyncId>, HubError> {
        if self.find(prefix)?.is_none() {
            return Ok(Vec::new());
        }

        let mut values = Vec::new();
        let mut stack = vec![prefix.to_vec()];
        while let Some(current) = stack.pop() {
            let node = self.node(&current)?;
            if let Some(key) = &node.key {
                values.push(SyncId::from_bytes(key)?);
                continue;
            }
            for byte in node.children.keys().rev() {
                let mut child = current.clone();
                child.push(*byte);
                stack.push(child);
            }
        }
        Ok(values)
    }

    /// Flush dirty and removed nodes to the KV store in one batch.
    ///
    /// # Errors
    ///
    /// Returns a storage error if encoding or the commit fails.
    pub fn commit_to_db(&mut self) -> Result<usize, HubError> {
        if self.dirty.is_empty() && self.removed.is_empty() {
            return Ok(0);
        }

        let mut batch = WriteBatch::new();
        for prefix in &self.removed {
            batch.delete(db_key(prefix));
        }
        for prefix in &self.dirty {
            let node = if prefix.is_empty() {
                &self.root
            } else {
                match self.nodes.get(prefix) {
                    Some(node) => node,
                    None => continue,
                }
            };
            batch.put(db_key(prefix), node.encode()?);
        }

        let written = batch.len();
        self.db.commit(batch)?;
        self.dirty.clear();
        self.removed.clear();
        tracing::debug!(written, items = self.root.items, "Committed trie nodes");
        Ok(written)
    }

    /// Flush, then drop every node but the root from memory.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the flush fails.
    pub fn unload_children_at_root(&mut self) -> Result<(), HubError> {
        self.commit_to_db()?;
        let unloaded = self.nodes.len();
        self.nodes.clear();
        tracing::debug!(unloaded, "Unloaded trie nodes");
        Ok(())
    }

    /// Remove every id and every persisted node.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the KV store fails.
    pub fn clear(&mut self) -> Result<(), HubError> {
        let mut batch = WriteBatch::new();
        for (key, _) in self
            .db
            .scan_prefix(&[RootPrefix::SyncMerkleTrieNode as u8])?
        {
            batch.delete(key);
        }
        self.db.commit(batch)?;
        self.root = TrieNode::default();
        self.nodes.clear();
        self.dirty.clear();
        self.removed.clear();
        Ok(())
    }

    /// Depth of the leaf holding exactly `key`, if any.
    fn leaf_depth(&self, key: &[u8]) -> Result<Option<usize>, HubError> {
        let mut depth = 0;
        loop {
            let node = self.node(&key[..depth])?;
            if node.is_leaf() {
                return Ok((node.key.as_deref() == Some(key)).then_some(depth));
            }
            match key.get(depth) {
                Some(byte) if node.children.contains_key(byte) => depth += 1,
                _ => return Ok(None),
            }
        }
    }

    /// Node at `prefix` if the path exists.
    fn find(&self, prefix: &[u8]) -> Result<Option<Cow<'_, TrieNode>>, HubError> {
        let mut node = self.node(&[])?;
        for (i, byte) in prefix.iter().enumerate() {
            if !node.children.contains_key(byte) {
                return Ok(None);
            }
            node = self.node(&prefix[..=i])?;
        }
        Ok(Some(node))
    }

    /// Replace a node whose single child is a leaf by that leaf.
    fn pull_up_leaf(&mut self, prefix: &[u8]) -> Result<(), HubError> {
        let only = self.node(prefix)?.children.keys().next().copied();
        let Some(byte) = only else {
            return Ok(());
        };
        let mut child_prefix = prefix.to_vec();
        child_prefix.push(byte);

        let leaf_key = self.node(&child_prefix)?.key.clone();
        if let Some(leaf_key) = leaf_key {
            let node = self.node_mut(prefix)?;
            node.children.clear();
            node.key = Some(leaf_key);
            node.refresh();
            self.remove_node(&child_prefix);
        }
        Ok(())
    }

    fn node(&self, prefix: &[u8]) -> Result<Cow<'_, TrieNode>, HubError> {
        if prefix.is_empty() {
            return Ok(Cow::Borrowed(&self.root));
        }
        if let Some(node) = self.nodes.get(prefix) {
            return Ok(Cow::Borrowed(node));
        }
        self.read_from_db(prefix).map(Cow::Owned)
    }

    fn node_mut(&mut self, prefix: &[u8]) -> Result<&mut TrieNode, HubError> {
        if prefix.is_empty() {
            return Ok(&mut self.root);
        }
        if !self.nodes.contains_key(prefix) {
            let node = self.read_from_db(prefix)?;
            self.nodes.insert(prefix.to_vec(), node);
        }
        self.nodes
            .get_mut(prefix)
            .ok_or_else(|| HubError::storage("trie node not loaded"))
    }

    fn read_from_db(&self, prefix: &[u8]) -> Result<TrieNode, HubError> {
        match self.db.get(&db_key(prefix))? {
            Some(bytes) => TrieNode::decode(&bytes),
            None => Err(HubError::storage(format!(
                "trie node {} missing from store",
                hex::encode(prefix)
            ))),
        }
    }

    fn put_node(&mut self, prefix: Vec<u8>, node: TrieNode) {
        self.removed.remove(&prefix);
        self.dirty.insert(prefix.clone());
        self.nodes.insert(prefix, node);
    }

    fn mark_dirty(&mut self, prefix: &[u8]) {
        self.dirty.insert(prefix.to_vec());
    }

    fn remove_node(&mut self, prefix: &[u8]) {
        self.nodes.remove(prefix);
        self.dirty.remove(prefix);
        self.removed.insert(prefix.to_vec());
    }

    fn maybe_commit(&mut self) -> Result<(), HubError> {
        if self.dirty.len() + self.removed.len() >= AUTO_COMMIT_THRESHOLD {
            self.commit_to_db()?;
        }
        Ok(())
    }
}

fn byte_at(key: &[u8], index: usize) -> Result<u8, HubError> {
    key.get(index)
        .copied()
        .ok_or_else(|| HubError::storage("trie key length exceeded"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_id::timestamp_to_prefix;
    use hubsync_core::{MemoryKv, MessageType};

    fn id(timestamp: u32, fid: u64, hash_byte: u8) -> SyncId {
        SyncId::from_parts(timestamp, fid, MessageType::CastAdd, &[hash_byte; 20]).unwrap()
    }

    fn empty_trie() -> MerkleTrie {
        MerkleTrie::open(Arc::new(MemoryKv::new())).unwrap()
    }

    #[test]
    fn empty_trie_has_empty_hash() {
        let trie = empty_trie();
        assert_eq!(trie.root_hash(), EMPTY_HASH);
        assert_eq!(trie.items(), 0);
    }

    #[test]
    fn duplicate_insert_is_noop() {
        let mut trie = empty_trie();
        assert!(trie.insert(&id(100, 1, 1)).unwrap());
        let hash = trie.root_hash();
        assert!(!trie.insert(&id(100, 1, 1)).unwrap());
        assert_eq!(trie.root_hash(), hash);
        assert_eq!(trie.items(), 1);
    }

    #[test]
    fn delete_restores_previous_shape() {
        let mut trie = empty_trie();
        trie.insert(&id(100, 1, 1)).unwrap();
        trie.insert(&id(100, 1, 2)).unwrap();
        let before = trie.root_hash();

        trie.insert(&id(100, 1, 3)).unwrap();
        assert_ne!(trie.root_hash(), before);
        assert!(trie.delete(&id(100, 1, 3)).unwrap());
        assert_eq!(trie.root_hash(), before);

        assert!(trie.delete(&id(100, 1, 1)).unwrap());
        assert!(trie.delete(&id(100, 1, 2)).unwrap());
        assert_eq!(trie.root_hash(), EMPTY_HASH);
        assert_eq!(trie.items(), 0);
        assert!(!trie.delete(&id(100, 1, 2)).unwrap());
    }

    #[test]
    fn delete_compacts_like_a_fresh_trie() {
        let mut trie = empty_trie();
        trie.insert(&id(500, 9, 0x10)).unwrap();
        trie.insert(&id(500, 9, 0x11)).unwrap();
        trie.delete(&id(500, 9, 0x11)).unwrap();

        let mut fresh = empty_trie();
        fresh.insert(&id(500, 9, 0x10)).unwrap();
        assert_eq!(trie.root_hash(), fresh.root_hash());
    }

    #[test]
    fn exists_tracks_membership() {
        let mut trie = empty_trie();
        trie.insert(&id(7, 2, 9)).unwrap();
        assert!(trie.exists(&id(7, 2, 9)).unwrap());
        assert!(!trie.exists(&id(7, 2, 8)).unwrap());
        assert!(!trie.exists(&id(8, 2, 9)).unwrap());
    }

    #[test]
    fn snapshot_excludes_siblings_along_prefix() {
        let mut trie = empty_trie();
        trie.insert(&id(1_000_000_001, 1, 1)).unwrap();
        trie.insert(&id(1_000_000_002, 1, 1)).unwrap();
        trie.insert(&id(2_000_000_000, 1, 1)).unwrap();

        let prefix = timestamp_to_prefix(1_000_000_001);
        let snapshot = trie.get_snapshot(&prefix).unwrap();
        assert_eq!(snapshot.prefix, prefix);
        assert_eq!(snapshot.excluded_hashes.len(), prefix.len());
        // the 2_000_000_000 id at depth 0 and the ..002 id at depth 9
        assert_eq!(snapshot.num_messages, 2);

        let empty = trie.get_snapshot(&[]).unwrap();
        assert!(empty.excluded_hashes.is_empty());
        assert_eq!(empty.num_messages, 0);
    }

    #[test]
    fn snapshot_ignores_ids_under_the_prefix() {
        let mut ours = empty_trie();
        let mut theirs = empty_trie();
        for trie in [&mut ours, &mut theirs] {
            trie.insert(&id(1_000_000_001, 1, 1)).unwrap();
        }
        theirs.insert(&id(1_000_000_005, 1, 2)).unwrap();

        let prefix = b"100000000".to_vec();
        let a = ours.get_snapshot(&prefix).unwrap();
        let b = theirs.get_snapshot(&prefix).unwrap();
        assert_eq!(a, b);
        assert_ne!(ours.root_hash(), theirs.root_hash());
    }

    #[test]
    fn snapshot_of_absent_prefix_is_shortened() {
        let mut trie = empty_trie();
        trie.insert(&id(1_000_000_001, 1, 1)).unwrap();
        let snapshot = trie.get_snapshot(b"195").unwrap();
        assert_eq!(snapshot.prefix, b"19".to_vec());
        assert_eq!(snapshot.excluded_hashes.len(), 2);
        assert_eq!(snapshot.num_messages, 1);
    }

    #[test]
    fn divergence_prefix_finds_first_difference() {
        let mut ours = empty_trie();
        let mut theirs = empty_trie();
        for trie in [&mut ours, &mut theirs] {
            trie.insert(&id(1_000_000_001, 1, 1)).unwrap();
        }
        theirs.insert(&id(1_000_000_099, 1, 1)).unwrap();

        let prefix = timestamp_to_prefix(1_000_000_001);
        let remote = theirs.get_snapshot(&prefix).unwrap();
        let divergence = ours
            .get_divergence_prefix(&prefix, &remote.excluded_hashes)
            .unwrap();
        assert_eq!(divergence, b"10000000".to_vec());

        let same = theirs
            .get_divergence_prefix(&prefix, &remote.excluded_hashes)
            .unwrap();
        assert_eq!(same, prefix);
    }

    #[test]
    fn node_metadata_lists_children() {
        let mut trie = empty_trie();
        trie.insert(&id(1_000_000_000, 1, 1)).unwrap();
        trie.insert(&id(2_000_000_000, 1, 1)).unwrap();

        let root = trie.get_node_metadata(&[]).unwrap().unwrap();
        assert_eq!(root.num_messages, 2);
        assert_eq!(root.hash, trie.root_hash());
        assert_eq!(root.children.keys().copied().collect::<Vec<_>>(), vec![b'1', b'2']);
        assert_eq!(root.children[&b'1'].prefix, b"1".to_vec());
        assert_eq!(root.children[&b'1'].num_messages, 1);

        assert!(trie.get_node_metadata(b"3").unwrap().is_none());
    }

    #[test]
    fn all_values_are_sorted_and_scoped() {
        let mut trie = empty_trie();
        let ids = [id(30, 1, 3), id(10, 1, 1), id(20, 1, 2), id(10, 2, 1)];
        for sync_id in &ids {
            trie.insert(sync_id).unwrap();
        }
        let mut expected = ids.to_vec();
        expected.sort();
        assert_eq!(trie.get_all_values(&[]).unwrap(), expected);

        let scoped = trie.get_all_values(&timestamp_to_prefix(10)).unwrap();
        assert_eq!(scoped, vec![id(10, 1, 1), id(10, 2, 1)]);
        assert!(trie.get_all_values(b"9").unwrap().is_empty());
    }

    #[test]
    fn reopen_and_unload_read_through_store() {
        let db: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let mut trie = MerkleTrie::open(db.clone()).unwrap();
        for n in 0..20u8 {
            trie.insert(&id(1_000 + u32::from(n), 1, n)).unwrap();
        }
        let hash = trie.root_hash();
        trie.unload_children_at_root().unwrap();
        assert_eq!(trie.loaded_nodes(), 0);
        assert!(trie.exists(&id(1_005, 1, 5)).unwrap());
        assert_eq!(trie.get_all_values(&[]).unwrap().len(), 20);

        // writes after an unload load the path back in
        trie.delete(&id(1_005, 1, 5)).unwrap();
        trie.insert(&id(1_005, 1, 5)).unwrap();
        assert_eq!(trie.root_hash(), hash);
        trie.commit_to_db().unwrap();

        let reopened = MerkleTrie::open(db).unwrap();
        assert_eq!(reopened.root_hash(), hash);
        assert_eq!(reopened.items(), 20);
        assert_eq!(
            reopened.get_snapshot(b"0000001").unwrap(),
            trie.get_snapshot(b"0000001").unwrap()
        );
    }

    #[test]
    fn deleting_everything_leaves_only_the_root_persisted() {
        let db = Arc::new(MemoryKv::new());
        let mut trie = MerkleTrie::open(db.clone()).unwrap();
        trie.insert(&id(5, 1, 1)).unwrap();
        trie.insert(&id(6, 1, 1)).unwrap();
        trie.commit_to_db().unwrap();
        trie.delete(&id(5, 1, 1)).unwrap();
        trie.delete(&id(6, 1, 1)).unwrap();
        trie.commit_to_db().unwrap();
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn clear_wipes_persisted_nodes() {
        let db = Arc::new(MemoryKv::new());
        let mut trie = MerkleTrie::open(db.clone()).unwrap();
        trie.insert(&id(5, 1, 1)).unwrap();
        trie.commit_to_db().unwrap();
        trie.clear().unwrap();
        assert!(db.is_empty());
        assert_eq!(trie.root_hash(), EMPTY_HASH);
    }
}
