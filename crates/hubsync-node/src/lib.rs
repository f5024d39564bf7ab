//! # hubsync Node
//!
//! Replication node runtime for the hubsync social-graph store.
//!
//! ## Architecture
//!
//! A node runs three periodic jobs next to the RPC service it exposes:
//! 1. **Sync**: diff the trie against a random registered peer and pull what is missing
//! 2. **Prune**: enforce per-fid size and age caps in every store
//! 3. **Unload**: flush the Merkle trie and drop its loaded nodes below the root
//!
//! Messages and trie nodes share one [`KvStore`](hubsync_core::KvStore),
//! either SQLite or in-memory.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod persistence;
pub mod runtime;

pub use config::NodeConfig;
pub use persistence::SqliteKv;
pub use runtime::Node;
