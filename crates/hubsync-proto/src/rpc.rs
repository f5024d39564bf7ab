//! Request/response envelope for peer RPCs.
//!
//! A transport carries one [`RpcRequest`] and gets back one [`RpcResponse`].
//! Failures travel as an [`RpcError`] with the stable code of the server-side
//! [`HubError`].

use crate::messages::{
    CborMessage, HubInfo, IdRegistryEventResponse, MessagesResponse, SyncIdsResponse,
    SyncSnapshotResponse, TrieNodeMetadataResponse,
};
use hubsync_core::{Fid, HubError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A peer RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcRequest {
    /// Node identity and trie summary
    GetInfo,
    /// Snapshot of the path to `prefix`
    GetSyncSnapshotByPrefix {
        /// Trie prefix
        prefix: Vec<u8>,
    },
    /// Node metadata at `prefix`
    GetSyncMetadataByPrefix {
        /// Trie prefix
        prefix: Vec<u8>,
    },
    /// Every sync id under `prefix`
    GetAllSyncIdsByPrefix {
        /// Trie prefix
        prefix: Vec<u8>,
    },
    /// Messages for encoded sync ids
    GetAllMessagesBySyncIds {
        /// Encoded sync ids
        sync_ids: Vec<Vec<u8>>,
    },
    /// Custody record of `fid`
    GetIdRegistryEvent {
        /// Registered fid
        fid: Fid,
    },
    /// Signer adds and removes of `fid`
    GetAllSignerMessagesByFid {
        /// Owning fid
        fid: Fid,
    },
}

impl RpcRequest {
    /// Method name for logs.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            RpcRequest::GetInfo => "get_info",
            RpcRequest::GetSyncSnapshotByPrefix { .. } => "get_sync_snapshot_by_prefix",
            RpcRequest::GetSyncMetadataByPrefix { .. } => "get_sync_metadata_by_prefix",
            RpcRequest::GetAllSyncIdsByPrefix { .. } => "get_all_sync_ids_by_prefix",
            RpcRequest::GetAllMessagesBySyncIds { .. } => "get_all_messages_by_sync_ids",
            RpcRequest::GetIdRegistryEvent { .. } => "get_id_registry_event",
            RpcRequest::GetAllSignerMessagesByFid { .. } => "get_all_signer_messages_by_fid",
        }
    }
}

impl CborMessage for RpcRequest {}

/// A failed RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RpcError {
    /// Stable code of the server-side error
    pub code: String,
    /// Human-readable detail
    pub message: String,
}

impl From<&HubError> for RpcError {
    fn from(err: &HubError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<RpcError> for HubError {
    fn from(err: RpcError) -> Self {
        if err.code == "not_found" {
            HubError::NotFound(err.message)
        } else {
            HubError::Transport(err.to_string())
        }
    }
}

/// Reply to an [`RpcRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcResponse {
    /// Reply to `GetInfo`
    Info(HubInfo),
    /// Reply to `GetSyncSnapshotByPrefix`
    Snapshot(SyncSnapshotResponse),
    /// Reply to `GetSyncMetadataByPrefix`
    Metadata(TrieNodeMetadataResponse),
    /// Reply to `GetAllSyncIdsByPrefix`
    SyncIds(SyncIdsResponse),
    /// Reply to `GetAllMessagesBySyncIds` and `GetAllSignerMessagesByFid`
    Messages(MessagesResponse),
    /// Reply to `GetIdRegistryEvent`
    IdRegistryEvent(IdRegistryEventResponse),
    /// The request failed
    Error(RpcError),
}

impl RpcResponse {
    /// Response carrying `err`.
    #[must_use]
    pub fn error(err: &HubError) -> Self {
        RpcResponse::Error(RpcError::from(err))
    }

    /// Response kind for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RpcResponse::Info(_) => "info",
            RpcResponse::Snapshot(_) => "snapshot",
            RpcResponse::Metadata(_) => "metadata",
            RpcResponse::SyncIds(_) => "sync_ids",
            RpcResponse::Messages(_) => "messages",
            RpcResponse::IdRegistryEvent(_) => "id_registry_event",
            RpcResponse::Error(_) => "error",
        }
    }
}

impl CborMessage for RpcResponse {}

/// A request tagged for matching replies on a shared connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcFrame<T> {
    /// Correlation identifier
    pub request_id: Uuid,
    /// Request or response
    pub body: T,
}

impl<T> RpcFrame<T> {
    /// Wrap `body` with a fresh request id.
    #[must_use]
    pub fn new(body: T) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            body,
        }
    }

    /// Reply frame with the same request id.
    #[must_use]
    pub fn reply<R>(&self, body: R) -> RpcFrame<R> {
        RpcFrame {
            request_id: self.request_id,
            body,
        }
    }
}

impl<T: Serialize + serde::de::DeserializeOwned> CborMessage for RpcFrame<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use hubsync_core::BlockedReason;

    #[test]
    fn request_frame_roundtrip() {
        let frame = RpcFrame::new(RpcRequest::GetAllSyncIdsByPrefix {
            prefix: b"0001".to_vec(),
        });
        let decoded = RpcFrame::<RpcRequest>::from_cbor(&frame.to_cbor().unwrap()).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.body.method(), "get_all_sync_ids_by_prefix");
    }

    #[test]
    fn reply_keeps_request_id() {
        let frame = RpcFrame::new(RpcRequest::GetInfo);
        let reply = frame.reply(RpcResponse::Messages(MessagesResponse::default()));
        assert_eq!(reply.request_id, frame.request_id);
        assert_eq!(reply.body.kind(), "messages");
    }

    #[test]
    fn errors_carry_codes() {
        let err = HubError::Blocked(BlockedReason::UnknownFid { fid: 3 });
        let response = RpcResponse::error(&err);
        let decoded = RpcResponse::from_cbor(&response.to_cbor().unwrap()).unwrap();
        let RpcResponse::Error(rpc) = decoded else {
            panic!("expected error response");
        };
        assert_eq!(rpc.code, "blocked.unknown_fid");
        assert_eq!(HubError::from(rpc).code(), "unavailable.network_failure");

        let missing = RpcError::from(&HubError::NotFound("x".to_string()));
        assert!(matches!(HubError::from(missing), HubError::NotFound(_)));
    }
}
