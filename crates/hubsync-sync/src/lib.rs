//! # hubsync Sync
//!
//! Anti-entropy between hubsync nodes.
//!
//! This crate provides:
//! - The trie updater that folds store events into the Merkle trie
//! - [`SyncService`], the server side of the peer RPC surface
//! - [`PeerClient`], the transport seam, with an in-process implementation
//! - [`SyncEngine`], which diffs against a peer and pulls what is missing

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod peer;
pub mod service;
pub mod updater;

pub use engine::{
    snapshot_timestamp_prefix, ShouldSyncReport, SyncEngine, SyncPhase, SyncReport, SyncStatus,
    HASHES_PER_FETCH, SYNC_THRESHOLD_SECS,
};
pub use peer::{LocalPeerClient, PeerClient};
pub use service::SyncService;
pub use updater::{apply_event, TrieUpdater};
