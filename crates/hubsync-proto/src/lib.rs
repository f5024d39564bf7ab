//! # hubsync Protocol
//!
//! Messages exchanged between peers during anti-entropy.
//!
//! ## Messages
//!
//! - `HubInfo`: node identity and its current trie summary
//! - `SyncIdsResponse`: sync ids under a trie prefix
//! - `MessagesResponse`: full messages for a set of sync ids
//! - `RpcRequest/RpcResponse`: the envelope carried by a transport
//!
//! Every message encodes as CBOR.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod messages;
pub mod rpc;

pub use messages::{
    CborMessage, HubInfo, IdRegistryEventResponse, MessageError, MessagesResponse,
    SyncIdsResponse, SyncSnapshotResponse, TrieNodeMetadataResponse,
};
pub use rpc::{RpcError, RpcFrame, RpcRequest, RpcResponse};
