//! Folds store events into the Merkle trie.
//!
//! Events may arrive more than once or out of order relative to each other;
//! trie insert and delete are idempotent, so applying the stream converges on
//! the stored id set.

use hubsync_core::HubError;
use hubsync_store::{Engine, HubEvent};
use hubsync_trie::{MerkleTrie, SharedTrie, SyncId};
use parking_lot::Mutex;
use std::fmt;
use tokio::sync::mpsc::UnboundedReceiver;

/// Apply one event to `trie`.
///
/// # Errors
///
/// Returns error if a sync id cannot be derived or a trie node cannot be loaded.
pub fn apply_event(trie: &mut MerkleTrie, event: &HubEvent) -> Result<(), HubError> {
    match event {
        HubEvent::MergeMessage {
            message,
            deleted_messages,
        } => {
            for deleted in deleted_messages {
                trie.delete(&SyncId::new(deleted)?)?;
            }
            trie.insert(&SyncId::new(message)?)?;
        }
        HubEvent::PruneMessage { message } | HubEvent::RevokeMessage { message } => {
            trie.delete(&SyncId::new(message)?)?;
        }
        HubEvent::MergeIdRegistryEvent { .. } => {}
    }
    Ok(())
}

/// Owns the event receiver of one engine and its trie.
pub struct TrieUpdater {
    trie: SharedTrie,
    events: Mutex<UnboundedReceiver<HubEvent>>,
}

impl fmt::Debug for TrieUpdater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrieUpdater")
            .field("trie", &*self.trie.read())
            .finish_non_exhaustive()
    }
}

impl TrieUpdater {
    /// Create an updater feeding `trie` from `events`.
    #[must_use]
    pub fn new(trie: SharedTrie, events: UnboundedReceiver<HubEvent>) -> Self {
        Self {
            trie,
            events: Mutex::new(events),
        }
    }

    /// The trie being updated.
    #[must_use]
    pub fn trie(&self) -> &SharedTrie {
        &self.trie
    }

    /// Apply every queued event; returns how many were applied.
    ///
    /// An event that fails to apply is logged and skipped.
    pub fn drain(&self) -> usize {
        let mut events = self.events.lock();
        let mut applied = 0;
        while let Ok(event) = events.try_recv() {
            let mut trie = self.trie.write();
            match apply_event(&mut trie, &event) {
                Ok(()) => applied += 1,
                Err(err) => {
                    tracing::warn!(event = event.kind(), error = %err, "Failed to apply event to trie");
                }
            }
        }
        if applied > 0 {
            tracing::trace!(applied, "Drained store events");
        }
        applied
    }

    /// Rebuild the trie from every message in `engine`.
    ///
    /// Queued events are discarded first; they are all reflected in the stores.
    ///
    /// # Errors
    ///
    /// Returns error if the stores cannot be read or the trie cannot be written.
    pub fn rebuild(&self, engine: &Engine) -> Result<u64, HubError> {
        let mut events = self.events.lock();
        while events.try_recv().is_ok() {}

        let messages = engine.get_all_messages()?;
        let mut trie = self.trie.write();
        trie.clear()?;
        for message in &messages {
            trie.insert(&SyncId::new(message)?)?;
        }
        trie.commit_to_db()?;

        tracing::info!(
            items = trie.items(),
            root_hash = %hex::encode(trie.root_hash()),
            "Rebuilt merkle trie"
        );
        Ok(trie.items())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use hubsync_core::{
        sign_message, IdRegistryEvent, MemoryKv, Message, MessageBody, MessageData, Network,
        UserDataBody, UserDataType,
    };
    use hubsync_trie::EMPTY_HASH;
    use std::sync::Arc;

    fn message(timestamp: u32, value: &str) -> Message {
        sign_message(
            MessageData {
                fid: 1,
                timestamp,
                network: Network::Devnet,
                body: MessageBody::UserDataAdd(UserDataBody {
                    data_type: UserDataType::Display,
                    value: value.to_string(),
                }),
            },
            &SigningKey::from_bytes(&[1; 32]),
        )
        .unwrap()
    }

    fn trie() -> MerkleTrie {
        MerkleTrie::open(Arc::new(MemoryKv::new())).unwrap()
    }

    #[test]
    fn merge_replaces_deleted_ids() {
        let mut trie = trie();
        let old = message(10, "a");
        let new = message(20, "b");
        apply_event(
            &mut trie,
            &HubEvent::MergeMessage {
                message: old.clone(),
                deleted_messages: vec![],
            },
        )
        .unwrap();
        apply_event(
            &mut trie,
            &HubEvent::MergeMessage {
                message: new.clone(),
                deleted_messages: vec![old.clone()],
            },
        )
        .unwrap();

        assert_eq!(trie.items(), 1);
        assert!(trie.exists(&SyncId::new(&new).unwrap()).unwrap());
        assert!(!trie.exists(&SyncId::new(&old).unwrap()).unwrap());
    }

    #[test]
    fn prune_and_revoke_delete() {
        let mut trie = trie();
        let m = message(10, "a");
        trie.insert(&SyncId::new(&m).unwrap()).unwrap();
        apply_event(&mut trie, &HubEvent::PruneMessage { message: m.clone() }).unwrap();
        assert_eq!(trie.root_hash(), EMPTY_HASH);

        // Replayed deletes are no-ops.
        apply_event(&mut trie, &HubEvent::RevokeMessage { message: m }).unwrap();
        assert_eq!(trie.items(), 0);
    }

    #[test]
    fn registry_events_leave_trie_alone() {
        let mut trie = trie();
        apply_event(
            &mut trie,
            &HubEvent::MergeIdRegistryEvent {
                event: IdRegistryEvent {
                    fid: 1,
                    custody_key: vec![0; 32],
                    block_number: 1,
                },
            },
        )
        .unwrap();
        assert_eq!(trie.items(), 0);
    }

    #[test]
    fn drain_applies_queue() {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        let updater = TrieUpdater::new(trie().shared(), receiver);
        for n in 0..3 {
            sender
                .send(HubEvent::MergeMessage {
                    message: message(100 + n, "x"),
                    deleted_messages: vec![],
                })
                .unwrap();
        }
        assert_eq!(updater.drain(), 3);
        assert_eq!(updater.drain(), 0);
        assert_eq!(updater.trie().read().items(), 3);
    }
}
