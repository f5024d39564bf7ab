//! Protocol messages for anti-entropy.

use hubsync_core::{HubError, IdRegistryEvent, Message};
use hubsync_trie::{NodeMetadata, SyncId, TrieHash, TrieSnapshot};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// CBOR encoding shared by every wire message.
pub trait CborMessage: Serialize + DeserializeOwned {
    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    fn to_cbor(&self) -> Result<Vec<u8>, MessageError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| MessageError::Serialize(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    fn from_cbor(bytes: &[u8]) -> Result<Self, MessageError> {
        ciborium::from_reader(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

/// Node identity and trie summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubInfo {
    /// Unique node identifier
    pub node_id: Uuid,
    /// Node version
    pub version: String,
    /// Whether the node is currently pulling from a peer
    pub is_syncing: bool,
    /// Root digest of the node's trie
    pub root_hash: TrieHash,
    /// Number of sync ids in the trie
    pub num_messages: u64,
}

impl HubInfo {
    /// Create an info message for this build.
    #[must_use]
    pub fn new(node_id: Uuid, root_hash: TrieHash, num_messages: u64) -> Self {
        Self {
            node_id,
            version: env!("CARGO_PKG_VERSION").to_string(),
            is_syncing: false,
            root_hash,
            num_messages,
        }
    }
}

impl CborMessage for HubInfo {}

/// Trie snapshot at a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshotResponse {
    /// The snapshot; its prefix may be shorter than requested
    pub snapshot: TrieSnapshot,
    /// Root digest when the snapshot was taken
    pub root_hash: TrieHash,
}

impl CborMessage for SyncSnapshotResponse {}

/// Node metadata at a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrieNodeMetadataResponse {
    /// `None` if the peer has no node at the prefix
    pub node: Option<NodeMetadata>,
}

impl CborMessage for TrieNodeMetadataResponse {}

/// Sync ids under a prefix, as raw bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncIdsResponse {
    /// Encoded sync ids in key order
    pub sync_ids: Vec<Vec<u8>>,
}

impl SyncIdsResponse {
    /// Encode a list of sync ids.
    #[must_use]
    pub fn from_ids(ids: &[SyncId]) -> Self {
        Self {
            sync_ids: ids.iter().map(|id| id.as_bytes().to_vec()).collect(),
        }
    }

    /// Decode the sync ids.
    ///
    /// # Errors
    ///
    /// Returns error if any entry is not a valid sync id.
    pub fn to_ids(&self) -> Result<Vec<SyncId>, HubError> {
        self.sync_ids
            .iter()
            .map(|bytes| SyncId::from_bytes(bytes))
            .collect()
    }
}

impl CborMessage for SyncIdsResponse {}

/// Messages looked up by sync id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Found messages; ids the peer no longer has are skipped
    pub messages: Vec<Message>,
}

impl CborMessage for MessagesResponse {}

/// Custody record of a fid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRegistryEventResponse {
    /// `None` if the fid is unknown to the peer
    pub event: Option<IdRegistryEvent>,
}

impl CborMessage for IdRegistryEventResponse {}

/// Errors for message serialization/deserialization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}

impl From<MessageError> for HubError {
    fn from(err: MessageError) -> Self {
        HubError::Transport(err.to_string())
    }
}
