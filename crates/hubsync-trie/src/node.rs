//! Trie nodes and their digests.

use hubsync_core::{blake3_20, HubError, RootPrefix, HASH_LENGTH};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 160-bit node digest.
pub type TrieHash = [u8; HASH_LENGTH];

/// Digest of an empty node, `blake3_20("")`.
pub const EMPTY_HASH: TrieHash = [
    0xaf, 0x13, 0x49, 0xb9, 0xf5, 0xf9, 0xa1, 0xa6, 0xa0, 0x40, 0x4d, 0xea, 0x36, 0xdc, 0xc9,
    0x49, 0x9b, 0xcb, 0x25, 0xc9,
];

/// Digest and size of a child, kept on the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSummary {
    /// Child digest
    pub hash: TrieHash,
    /// Sync ids under the child
    pub items: u64,
}

/// One prefix-addressed node.
///
/// A node with a `key` is a leaf holding one sync id. A node without a key
/// is internal, or empty while it is being filled or drained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrieNode {
    pub(crate) hash: TrieHash,
    pub(crate) items: u64,
    pub(crate) children: BTreeMap<u8, ChildSummary>,
    pub(crate) key: Option<Vec<u8>>,
}

impl Default for TrieNode {
    fn default() -> Self {
        Self {
            hash: EMPTY_HASH,
            items: 0,
            children: BTreeMap::new(),
            key: None,
        }
    }
}

impl TrieNode {
    /// Leaf holding `key`.
    pub(crate) fn leaf(key: Vec<u8>) -> Self {
        let mut node = Self {
            key: Some(key),
            ..Self::default()
        };
        node.refresh();
        node
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn summary(&self) -> ChildSummary {
        ChildSummary {
            hash: self.hash,
            items: self.items,
        }
    }

    /// Recompute `items` and `hash` from the key or child summaries.
    pub(crate) fn refresh(&mut self) {
        if let Some(key) = &self.key {
            self.items = 1;
            self.hash = blake3_20(key);
            return;
        }
        self.items = self.children.values().map(|child| child.items).sum();
        let mut hasher = blake3::Hasher::new();
        for child in self.children.values() {
            hasher.update(&child.hash);
        }
        self.hash = truncate(&hasher.finalize());
    }

    /// Digest and count of every child except `excluded`.
    pub(crate) fn excluded_hash(&self, excluded: u8) -> (TrieHash, u64) {
        let mut hasher = blake3::Hasher::new();
        let mut items = 0;
        for (byte, child) in &self.children {
            if *byte != excluded {
                hasher.update(&child.hash);
                items += child.items;
            }
        }
        (truncate(&hasher.finalize()), items)
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, HubError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| HubError::storage(format!("encode trie node: {e}")))?;
        Ok(bytes)
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, HubError> {
        ciborium::from_reader(bytes)
            .map_err(|e| HubError::storage(format!("decode trie node: {e}")))
    }
}

/// KV key of the node at `prefix`.
pub(crate) fn db_key(prefix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + prefix.len());
    key.push(RootPrefix::SyncMerkleTrieNode as u8);
    key.extend_from_slice(prefix);
    key
}

fn truncate(digest: &blake3::Hash) -> TrieHash {
    let mut out = [0u8; HASH_LENGTH];
    out.copy_from_slice(&digest.as_bytes()[..HASH_LENGTH]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_hash_constant_matches_blake3() {
        assert_eq!(EMPTY_HASH, blake3_20(b""));
        assert_eq!(TrieNode::default().hash, EMPTY_HASH);
    }

    #[test]
    fn leaf_hash_is_hash_of_key() {
        let leaf = TrieNode::leaf(b"0000000001abc".to_vec());
        assert_eq!(leaf.hash, blake3_20(b"0000000001abc"));
        assert_eq!(leaf.items, 1);
    }

    #[test]
    fn internal_hash_concatenates_children_in_order() {
        let a = TrieNode::leaf(b"a".to_vec());
        let b = TrieNode::leaf(b"b".to_vec());
        let mut parent = TrieNode::default();
        parent.children.insert(b'b', b.summary());
        parent.children.insert(b'a', a.summary());
        parent.refresh();

        let mut concat = a.hash.to_vec();
        concat.extend_from_slice(&b.hash);
        assert_eq!(parent.hash, blake3_20(&concat));
        assert_eq!(parent.items, 2);

        let (excluded, items) = parent.excluded_hash(b'a');
        assert_eq!(excluded, blake3_20(&b.hash));
        assert_eq!(items, 1);
        assert_eq!(parent.excluded_hash(b'z').0, parent.hash);
    }

    #[test]
    fn codec_roundtrip() {
        let mut node = TrieNode::default();
        node.children.insert(7, TrieNode::leaf(vec![1, 2]).summary());
        node.refresh();
        assert_eq!(TrieNode::decode(&node.encode().unwrap()).unwrap(), node);
    }
}
