//! Server side of the peer RPC surface.

use crate::engine::{SyncPhase, SyncStatus};
use crate::updater::TrieUpdater;
use hubsync_core::{Fid, HubError, IdRegistryEvent, Message};
use hubsync_proto::{
    HubInfo, IdRegistryEventResponse, MessagesResponse, RpcRequest, RpcResponse, SyncIdsResponse,
    SyncSnapshotResponse, TrieNodeMetadataResponse,
};
use hubsync_store::Engine;
use hubsync_trie::{NodeMetadata, SyncId};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Answers peer RPCs from the local engine and trie.
///
/// Every read first drains the event queue so answers reflect all committed
/// merges.
#[derive(Clone)]
pub struct SyncService {
    node_id: Uuid,
    engine: Arc<Engine>,
    updater: Arc<TrieUpdater>,
    status: Option<watch::Receiver<SyncStatus>>,
}

impl fmt::Debug for SyncService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncService")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl SyncService {
    /// Create a service for the node `node_id`.
    #[must_use]
    pub fn new(node_id: Uuid, engine: Arc<Engine>, updater: Arc<TrieUpdater>) -> Self {
        Self {
            node_id,
            engine,
            updater,
            status: None,
        }
    }

    /// Report `is_syncing` from a sync engine's status channel.
    #[must_use]
    pub fn with_status(mut self, status: watch::Receiver<SyncStatus>) -> Self {
        self.status = Some(status);
        self
    }

    /// Node identifier.
    #[must_use]
    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    /// Node identity and trie summary.
    #[must_use]
    pub fn get_info(&self) -> HubInfo {
        self.updater.drain();
        let trie = self.updater.trie().read();
        let mut info = HubInfo::new(self.node_id, trie.root_hash(), trie.items());
        info.is_syncing = self
            .status
            .as_ref()
            .is_some_and(|status| {
                matches!(
                    status.borrow().phase,
                    SyncPhase::Diffing | SyncPhase::Fetching | SyncPhase::Applying
                )
            });
        info
    }

    /// Trie snapshot of the path to `prefix`.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if a trie node cannot be loaded.
    pub fn get_sync_snapshot_by_prefix(&self, prefix: &[u8]) -> Result<SyncSnapshotResponse, HubError> {
        self.updater.drain();
        let trie = self.updater.trie().read();
        Ok(SyncSnapshotResponse {
            snapshot: trie.get_snapshot(prefix)?,
            root_hash: trie.root_hash(),
        })
    }

    /// Node metadata at `prefix`.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if a trie node cannot be loaded.
    pub fn get_sync_metadata_by_prefix(&self, prefix: &[u8]) -> Result<Option<NodeMetadata>, HubError> {
        self.updater.drain();
        self.updater.trie().read().get_node_metadata(prefix)
    }

    /// Every sync id under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if a trie node cannot be loaded.
    pub fn get_all_sync_ids_by_prefix(&self, prefix: &[u8]) -> Result<Vec<SyncId>, HubError> {
        self.updater.drain();
        self.updater.trie().read().get_all_values(prefix)
    }

    /// Stored messages for `sync_ids`; ids no longer stored are skipped.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the KV store fails.
    pub fn get_all_messages_by_sync_ids(&self, sync_ids: &[SyncId]) -> Result<Vec<Message>, HubError> {
        let mut messages = Vec::with_capacity(sync_ids.len());
        for id in sync_ids {
            match self
                .engine
                .get_message(id.fid(), id.message_type()?, &id.ts_hash()?)
            {
                Ok(message) => messages.push(message),
                Err(HubError::NotFound(_)) => {
                    tracing::debug!(sync_id = %id, "Requested message no longer stored");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(messages)
    }

    /// Custody record of `fid`.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the KV store fails.
    pub fn get_id_registry_event(&self, fid: Fid) -> Result<Option<IdRegistryEvent>, HubError> {
        self.engine.get_id_registry_event(fid)
    }

    /// Signer adds and removes of `fid`.
    ///
    /// # Errors
    ///
    /// Returns a storage failure if the KV store fails.
    pub fn get_all_signer_messages_by_fid(&self, fid: Fid) -> Result<Vec<Message>, HubError> {
        self.engine.get_signer_messages_by_fid(fid)
    }

    /// Dispatch one RPC.
    #[must_use]
    pub fn handle(&self, request: &RpcRequest) -> RpcResponse {
        let result = match request {
            RpcRequest::GetInfo => Ok(RpcResponse::Info(self.get_info())),
            RpcRequest::GetSyncSnapshotByPrefix { prefix } => self
                .get_sync_snapshot_by_prefix(prefix)
                .map(RpcResponse::Snapshot),
            RpcRequest::GetSyncMetadataByPrefix { prefix } => self
                .get_sync_metadata_by_prefix(prefix)
                .map(|node| RpcResponse::Metadata(TrieNodeMetadataResponse { node })),
            RpcRequest::GetAllSyncIdsByPrefix { prefix } => self
                .get_all_sync_ids_by_prefix(prefix)
                .map(|ids| RpcResponse::SyncIds(SyncIdsResponse::from_ids(&ids))),
            RpcRequest::GetAllMessagesBySyncIds { sync_ids } => SyncIdsResponse {
                sync_ids: sync_ids.clone(),
            }
            .to_ids()
            .and_then(|ids| self.get_all_messages_by_sync_ids(&ids))
            .map(|messages| RpcResponse::Messages(MessagesResponse { messages })),
            RpcRequest::GetIdRegistryEvent { fid } => self
                .get_id_registry_event(*fid)
                .map(|event| RpcResponse::IdRegistryEvent(IdRegistryEventResponse { event })),
            RpcRequest::GetAllSignerMessagesByFid { fid } => self
                .get_all_signer_messages_by_fid(*fid)
                .map(|messages| RpcResponse::Messages(MessagesResponse { messages })),
        };

        result.unwrap_or_else(|err| {
            tracing::debug!(method = request.method(), error = %err, "RPC failed");
            RpcResponse::error(&err)
        })
    }
}
