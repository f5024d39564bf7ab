//! Store events.
//!
//! Every store mutation commits one KV batch and then emits one [`HubEvent`] on
//! an unbounded channel. The trie updater is the main consumer. Delivery is
//! at-least-once relative to the KV state, so consumers dedupe by hash.

use hubsync_core::{HubError, IdRegistryEvent, KvStore, Message, WriteBatch};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A committed state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// A message was merged, displacing `deleted_messages`
    MergeMessage {
        /// The merged message
        message: Message,
        /// Losers removed by the merge
        deleted_messages: Vec<Message>,
    },
    /// A message was pruned by the size or time limit
    PruneMessage {
        /// The pruned message
        message: Message,
    },
    /// A message was revoked with its signer
    RevokeMessage {
        /// The revoked message
        message: Message,
    },
    /// A custody assignment was recorded
    MergeIdRegistryEvent {
        /// The recorded event
        event: IdRegistryEvent,
    },
}

impl HubEvent {
    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            HubEvent::MergeMessage { .. } => "merge_message",
            HubEvent::PruneMessage { .. } => "prune_message",
            HubEvent::RevokeMessage { .. } => "revoke_message",
            HubEvent::MergeIdRegistryEvent { .. } => "merge_id_registry_event",
        }
    }
}

/// Commits batches and publishes the matching events.
#[derive(Clone)]
pub struct StoreEventHandler {
    db: Arc<dyn KvStore>,
    sender: mpsc::UnboundedSender<HubEvent>,
}

impl fmt::Debug for StoreEventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreEventHandler")
            .field("closed", &self.sender.is_closed())
            .finish_non_exhaustive()
    }
}

impl StoreEventHandler {
    /// Create a handler and the receiving end of its event channel.
    #[must_use]
    pub fn new(db: Arc<dyn KvStore>) -> (Self, mpsc::UnboundedReceiver<HubEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { db, sender }, receiver)
    }

    /// Underlying KV store.
    #[must_use]
    pub fn db(&self) -> &Arc<dyn KvStore> {
        &self.db
    }

    /// Commit `batch` atomically, then emit `event`.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the commit fails; no event is emitted then.
    pub fn commit_transaction(&self, batch: WriteBatch, event: HubEvent) -> Result<(), HubError> {
        self.db.commit(batch)?;
        tracing::trace!(event = event.kind(), "Emitting hub event");
        if self.sender.send(event).is_err() {
            tracing::debug!("Hub event dropped; no receiver");
        }
        Ok(())
    }
}
