//! # hubsync Trie
//!
//! Merkle trie over sync identifiers.
//!
//! Sync identifiers start with a ten-digit decimal timestamp, so the first ten
//! trie levels form a time index: a timestamp prefix names a time range, and
//! two nodes can compare any range by exchanging a few digests.
//!
//! Only the nodes on an insert or delete path are touched, and each node keeps
//! the digest and count of every child, so parents never need their siblings
//! loaded. Nodes not in memory live in the KV store and are loaded on demand.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod node;
pub mod sync_id;
pub mod trie;

pub use node::{TrieHash, EMPTY_HASH};
pub use sync_id::{timestamp_to_prefix, SyncId, SYNC_ID_LENGTH, TIMESTAMP_LENGTH};
pub use trie::{ChildMetadata, MerkleTrie, NodeMetadata, SharedTrie, TrieSnapshot};
