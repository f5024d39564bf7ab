//! Conflict key space.
//!
//! Every stored row lives under a byte key whose lexicographic order is the
//! order stores iterate in.
//!
//! | Index | Layout |
//! |-------|--------|
//! | primary | `User ‖ fid ‖ <fact>Message ‖ tsHash` |
//! | adds | `User ‖ fid ‖ <fact>Adds ‖ target` |
//! | removes | `User ‖ fid ‖ <fact>Removes ‖ target` |
//! | by signer | `User ‖ fid ‖ BySigner ‖ signer ‖ <fact>Message ‖ tsHash` |
//! | by target | `ByTarget ‖ <fact>Message ‖ reverse target ‖ fid ‖ tsHash` |
//! | id registry | `IdRegistry ‖ fid` |
//!
//! Integers are big-endian so numeric order matches byte order.

use crate::crypto::HASH_LENGTH;
use crate::error::HubError;
use crate::message::{FactType, Fid, MessageBody};
use std::fmt;

/// Length of a tsHash: 4 timestamp bytes and a 20-byte hash.
pub const TS_HASH_LENGTH: usize = 4 + HASH_LENGTH;

/// Width that link types are padded to inside keys.
pub const LINK_TYPE_KEY_LENGTH: usize = 8;

/// `be32(timestamp) ‖ hash`; byte order is the total message order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TsHash([u8; TS_HASH_LENGTH]);

impl TsHash {
    /// Build a tsHash from a timestamp and a 20-byte hash.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `hash` is not 20 bytes.
    pub fn new(timestamp: u32, hash: &[u8]) -> Result<Self, HubError> {
        if hash.len() != HASH_LENGTH {
            return Err(HubError::validation(format!(
                "hash must be {HASH_LENGTH} bytes, got {}",
                hash.len()
            )));
        }
        let mut bytes = [0u8; TS_HASH_LENGTH];
        bytes[..4].copy_from_slice(&timestamp.to_be_bytes());
        bytes[4..].copy_from_slice(hash);
        Ok(Self(bytes))
    }

    /// Parse from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns error if `bytes` is not 24 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HubError> {
        let bytes: [u8; TS_HASH_LENGTH] = bytes.try_into().map_err(|_| {
            HubError::InvalidParam(format!(
                "tsHash must be {TS_HASH_LENGTH} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; TS_HASH_LENGTH] {
        &self.0
    }

    /// Network time component.
    #[must_use]
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Hash component.
    #[must_use]
    pub fn hash(&self) -> &[u8] {
        &self.0[4..]
    }
}

impl fmt::Debug for TsHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TsHash({})", hex::encode(self.0))
    }
}

impl fmt::Display for TsHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// First byte of every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RootPrefix {
    /// Per-user rows
    User = 1,
    /// Reverse indices keyed by what a message points at
    ByTarget = 2,
    /// Custody keys from the id registry
    IdRegistry = 3,
    /// Persisted Merkle trie nodes
    SyncMerkleTrieNode = 4,
}

/// Byte following `User ‖ fid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum UserPostfix {
    CastMessage = 1,
    CastAdds = 2,
    CastRemoves = 3,
    ReactionMessage = 4,
    ReactionAdds = 5,
    ReactionRemoves = 6,
    LinkMessage = 7,
    LinkAdds = 8,
    LinkRemoves = 9,
    VerificationMessage = 10,
    VerificationAdds = 11,
    VerificationRemoves = 12,
    SignerMessage = 13,
    SignerAdds = 14,
    SignerRemoves = 15,
    UserDataMessage = 16,
    UserDataAdds = 17,
    BySigner = 18,
}

impl FactType {
    /// Postfix of the primary index.
    #[must_use]
    pub fn message_postfix(self) -> UserPostfix {
        match self {
            FactType::Cast => UserPostfix::CastMessage,
            FactType::Reaction => UserPostfix::ReactionMessage,
            FactType::Link => UserPostfix::LinkMessage,
            FactType::Verification => UserPostfix::VerificationMessage,
            FactType::Signer => UserPostfix::SignerMessage,
            FactType::UserData => UserPostfix::UserDataMessage,
        }
    }

    /// Postfix of the adds index.
    #[must_use]
    pub fn adds_postfix(self) -> UserPostfix {
        match self {
            FactType::Cast => UserPostfix::CastAdds,
            FactType::Reaction => UserPostfix::ReactionAdds,
            FactType::Link => UserPostfix::LinkAdds,
            FactType::Verification => UserPostfix::VerificationAdds,
            FactType::Signer => UserPostfix::SignerAdds,
            FactType::UserData => UserPostfix::UserDataAdds,
        }
    }

    /// Postfix of the removes index, if the fact has removes.
    #[must_use]
    pub fn removes_postfix(self) -> Option<UserPostfix> {
        match self {
            FactType::Cast => Some(UserPostfix::CastRemoves),
            FactType::Reaction => Some(UserPostfix::ReactionRemoves),
            FactType::Link => Some(UserPostfix::LinkRemoves),
            FactType::Verification => Some(UserPostfix::VerificationRemoves),
            FactType::Signer => Some(UserPostfix::SignerRemoves),
            FactType::UserData => None,
        }
    }
}

/// `User ‖ be64(fid)`.
#[must_use]
pub fn user_prefix(fid: Fid) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8 + 1 + TS_HASH_LENGTH);
    key.push(RootPrefix::User as u8);
    key.extend_from_slice(&fid.to_be_bytes());
    key
}

/// `User ‖ fid ‖ postfix`.
#[must_use]
pub fn user_postfix_prefix(fid: Fid, postfix: UserPostfix) -> Vec<u8> {
    let mut key = user_prefix(fid);
    key.push(postfix as u8);
    key
}

/// Primary index key.
#[must_use]
pub fn message_key(fid: Fid, postfix: UserPostfix, ts_hash: &TsHash) -> Vec<u8> {
    let mut key = user_postfix_prefix(fid, postfix);
    key.extend_from_slice(ts_hash.as_bytes());
    key
}

/// Adds or removes index key.
#[must_use]
pub fn target_index_key(fid: Fid, postfix: UserPostfix, target: &[u8]) -> Vec<u8> {
    let mut key = user_postfix_prefix(fid, postfix);
    key.extend_from_slice(target);
    key
}

/// `User ‖ fid ‖ BySigner ‖ signer`.
#[must_use]
pub fn by_signer_prefix(fid: Fid, signer: &[u8]) -> Vec<u8> {
    let mut key = user_postfix_prefix(fid, UserPostfix::BySigner);
    key.extend_from_slice(signer);
    key
}

/// By-signer index key.
#[must_use]
pub fn by_signer_key(fid: Fid, signer: &[u8], postfix: UserPostfix, ts_hash: &TsHash) -> Vec<u8> {
    let mut key = by_signer_prefix(fid, signer);
    key.push(postfix as u8);
    key.extend_from_slice(ts_hash.as_bytes());
    key
}

/// `ByTarget ‖ postfix ‖ reverse target`.
#[must_use]
pub fn by_target_prefix(postfix: UserPostfix, reverse_target: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + reverse_target.len() + 8 + TS_HASH_LENGTH);
    key.push(RootPrefix::ByTarget as u8);
    key.push(postfix as u8);
    key.extend_from_slice(reverse_target);
    key
}

/// By-target index key.
#[must_use]
pub fn by_target_key(
    postfix: UserPostfix,
    reverse_target: &[u8],
    fid: Fid,
    ts_hash: &TsHash,
) -> Vec<u8> {
    let mut key = by_target_prefix(postfix, reverse_target);
    key.extend_from_slice(&fid.to_be_bytes());
    key.extend_from_slice(ts_hash.as_bytes());
    key
}

/// Id registry key.
#[must_use]
pub fn id_registry_key(fid: Fid) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(RootPrefix::IdRegistry as u8);
    key.extend_from_slice(&fid.to_be_bytes());
    key
}

/// Split the fid and tsHash off the tail of a by-target key.
///
/// # Errors
///
/// Returns error if the key is shorter than `fid ‖ tsHash`.
pub fn split_by_target_key(key: &[u8]) -> Result<(Fid, TsHash), HubError> {
    let tail = 8 + TS_HASH_LENGTH;
    if key.len() < tail {
        return Err(HubError::storage("by-target key too short"));
    }
    let start = key.len() - tail;
    let mut fid = [0u8; 8];
    fid.copy_from_slice(&key[start..start + 8]);
    let ts_hash = TsHash::from_slice(&key[start + 8..])?;
    Ok((Fid::from_be_bytes(fid), ts_hash))
}

/// `be64(fid) ‖ hash` identifying a cast.
#[must_use]
pub fn cast_id_key(fid: Fid, hash: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + hash.len());
    key.extend_from_slice(&fid.to_be_bytes());
    key.extend_from_slice(hash);
    key
}

/// Link type zero-padded to [`LINK_TYPE_KEY_LENGTH`].
///
/// # Errors
///
/// Returns error if the link type is longer than the key width.
pub fn link_type_key(link_type: &str) -> Result<[u8; LINK_TYPE_KEY_LENGTH], HubError> {
    let bytes = link_type.as_bytes();
    if bytes.len() > LINK_TYPE_KEY_LENGTH {
        return Err(HubError::validation(format!(
            "link type longer than {LINK_TYPE_KEY_LENGTH} bytes"
        )));
    }
    let mut key = [0u8; LINK_TYPE_KEY_LENGTH];
    key[..bytes.len()].copy_from_slice(bytes);
    Ok(key)
}

/// Conflict target of a message body.
///
/// Two messages of one fid and fact type conflict exactly when their targets
/// are equal. A `CastAdd` targets its own hash, so `hash` must be the hash of
/// the message carrying `body`.
///
/// # Errors
///
/// Returns error if a link type is too long to key.
pub fn conflict_target(body: &MessageBody, hash: &[u8]) -> Result<Vec<u8>, HubError> {
    let target = match body {
        MessageBody::CastAdd(_) => hash.to_vec(),
        MessageBody::CastRemove(remove) => remove.target_hash.clone(),
        MessageBody::ReactionAdd(reaction) | MessageBody::ReactionRemove(reaction) => {
            let mut key = vec![reaction.reaction_type as u8];
            key.extend_from_slice(&cast_id_key(reaction.target.fid, &reaction.target.hash));
            key
        }
        MessageBody::LinkAdd(link) | MessageBody::LinkRemove(link) => {
            let mut key = link_type_key(&link.link_type)?.to_vec();
            key.extend_from_slice(&link.target_fid.to_be_bytes());
            key
        }
        MessageBody::VerificationAddEthAddress(add) => add.address.clone(),
        MessageBody::VerificationRemove(remove) => remove.address.clone(),
        MessageBody::SignerAdd(signer) | MessageBody::SignerRemove(signer) => {
            signer.signer.clone()
        }
        MessageBody::UserDataAdd(user_data) => vec![user_data.data_type as u8],
    };
    Ok(target)
}

/// What a message points at outside its own fid, for the by-target index.
#[must_use]
pub fn reverse_target(body: &MessageBody) -> Option<Vec<u8>> {
    match body {
        MessageBody::CastAdd(cast) => cast
            .parent
            .as_ref()
            .map(|parent| cast_id_key(parent.fid, &parent.hash)),
        MessageBody::ReactionAdd(reaction) | MessageBody::ReactionRemove(reaction) => {
            Some(cast_id_key(reaction.target.fid, &reaction.target.hash))
        }
        MessageBody::LinkAdd(link) | MessageBody::LinkRemove(link) => {
            Some(link.target_fid.to_be_bytes().to_vec())
        }
        _ => None,
    }
}
