//! # hubsync Core
//!
//! Message model, network time and storage contract shared by every hubsync crate.
//!
//! This crate provides:
//! - Signed user messages as a tagged union over fact-type bodies
//! - Network time (seconds since the 2021-01-01 epoch) and injectable clocks
//! - Hashing, signing and structural validation of messages
//! - The conflict key space: tsHash ordering keys, index layouts and targets
//! - The ordered, transactional KV contract with an in-memory backend

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod crypto;
pub mod error;
pub mod keys;
pub mod kv;
pub mod message;
pub mod time;
pub mod validation;

pub use crypto::{blake3_20, hash_message_data, sign_message, HASH_LENGTH};
pub use error::{BlockedReason, HubError, HubResult};
pub use keys::{RootPrefix, TsHash, UserPostfix, TS_HASH_LENGTH};
pub use kv::{KvError, KvStore, MemoryKv, WriteBatch};
pub use message::{
    CastAddBody, CastId, CastRemoveBody, FactType, Fid, HashScheme, IdRegistryEvent, LinkBody,
    Message, MessageBody, MessageData, MessageKind, MessageType, Network, ReactionBody,
    ReactionType, SignatureScheme, SignerBody, UserDataBody, UserDataType, VerificationAddBody,
    VerificationRemoveBody,
};
pub use time::{Clock, ManualClock, SystemClock, NETWORK_EPOCH_MS};
pub use validation::validate_message;
