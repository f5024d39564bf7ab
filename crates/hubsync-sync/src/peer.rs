//! Transport seam between sync engines.

use crate::service::SyncService;
use async_trait::async_trait;
use hubsync_core::{Fid, HubError, IdRegistryEvent, Message};
use hubsync_proto::{
    CborMessage, HubInfo, RpcFrame, RpcRequest, RpcResponse, SyncIdsResponse,
    SyncSnapshotResponse,
};
use hubsync_trie::{NodeMetadata, SyncId};

/// RPCs a sync engine issues against a peer.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Peer identity and trie summary.
    async fn get_info(&self) -> Result<HubInfo, HubError>;

    /// Peer snapshot of the path to `prefix`.
    async fn get_sync_snapshot_by_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<SyncSnapshotResponse, HubError>;

    /// Peer node metadata at `prefix`, `None` if absent.
    async fn get_sync_metadata_by_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Option<NodeMetadata>, HubError>;

    /// Every peer sync id under `prefix`.
    async fn get_all_sync_ids_by_prefix(&self, prefix: &[u8]) -> Result<Vec<SyncId>, HubError>;

    /// Peer messages for `sync_ids`.
    async fn get_all_messages_by_sync_ids(
        &self,
        sync_ids: &[SyncId],
    ) -> Result<Vec<Message>, HubError>;

    /// Peer custody record of `fid`.
    async fn get_id_registry_event(&self, fid: Fid) -> Result<Option<IdRegistryEvent>, HubError>;

    /// Peer signer messages of `fid`.
    async fn get_all_signer_messages_by_fid(&self, fid: Fid) -> Result<Vec<Message>, HubError>;
}

/// Calls a [`SyncService`] in process.
///
/// Requests and responses still go through the CBOR codec, so the service
/// sees exactly what a remote transport would deliver.
#[derive(Debug, Clone)]
pub struct LocalPeerClient {
    service: SyncService,
}

impl LocalPeerClient {
    /// Create a client for `service`.
    #[must_use]
    pub fn new(service: SyncService) -> Self {
        Self { service }
    }

    fn call(&self, request: RpcRequest) -> Result<RpcResponse, HubError> {
        let frame = RpcFrame::new(request);
        let wire = frame.to_cbor()?;

        let received = RpcFrame::<RpcRequest>::from_cbor(&wire)?;
        let reply = received.reply(self.service.handle(&received.body));
        let wire = reply.to_cbor()?;

        let reply = RpcFrame::<RpcResponse>::from_cbor(&wire)?;
        if reply.request_id != frame.request_id {
            return Err(HubError::Transport("mismatched reply id".to_string()));
        }
        match reply.body {
            RpcResponse::Error(err) => Err(err.into()),
            body => Ok(body),
        }
    }
}

fn unexpected(method: &str, response: &RpcResponse) -> HubError {
    HubError::Transport(format!(
        "unexpected {} response to {method}",
        response.kind()
    ))
}

#[async_trait]
impl PeerClient for LocalPeerClient {
    async fn get_info(&self) -> Result<HubInfo, HubError> {
        match self.call(RpcRequest::GetInfo)? {
            RpcResponse::Info(info) => Ok(info),
            other => Err(unexpected("get_info", &other)),
        }
    }

    async fn get_sync_snapshot_by_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<SyncSnapshotResponse, HubError> {
        let request = RpcRequest::GetSyncSnapshotByPrefix {
            prefix: prefix.to_vec(),
        };
        match self.call(request)? {
            RpcResponse::Snapshot(snapshot) => Ok(snapshot),
            other => Err(unexpected("get_sync_snapshot_by_prefix", &other)),
        }
    }

    async fn get_sync_metadata_by_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Option<NodeMetadata>, HubError> {
        let request = RpcRequest::GetSyncMetadataByPrefix {
            prefix: prefix.to_vec(),
        };
        match self.call(request)? {
            RpcResponse::Metadata(metadata) => Ok(metadata.node),
            other => Err(unexpected("get_sync_metadata_by_prefix", &other)),
        }
    }

    async fn get_all_sync_ids_by_prefix(&self, prefix: &[u8]) -> Result<Vec<SyncId>, HubError> {
        let request = RpcRequest::GetAllSyncIdsByPrefix {
            prefix: prefix.to_vec(),
        };
        match self.call(request)? {
            RpcResponse::SyncIds(ids) => ids.to_ids(),
            other => Err(unexpected("get_all_sync_ids_by_prefix", &other)),
        }
    }

    async fn get_all_messages_by_sync_ids(
        &self,
        sync_ids: &[SyncId],
    ) -> Result<Vec<Message>, HubError> {
        let request = RpcRequest::GetAllMessagesBySyncIds {
            sync_ids: SyncIdsResponse::from_ids(sync_ids).sync_ids,
        };
        match self.call(request)? {
            RpcResponse::Messages(response) => Ok(response.messages),
            other => Err(unexpected("get_all_messages_by_sync_ids", &other)),
        }
    }

    async fn get_id_registry_event(&self, fid: Fid) -> Result<Option<IdRegistryEvent>, HubError> {
        match self.call(RpcRequest::GetIdRegistryEvent { fid })? {
            RpcResponse::IdRegistryEvent(response) => Ok(response.event),
            other => Err(unexpected("get_id_registry_event", &other)),
        }
    }

    async fn get_all_signer_messages_by_fid(&self, fid: Fid) -> Result<Vec<Message>, HubError> {
        match self.call(RpcRequest::GetAllSignerMessagesByFid { fid })? {
            RpcResponse::Messages(response) => Ok(response.messages),
            other => Err(unexpected("get_all_signer_messages_by_fid", &other)),
        }
    }
}
