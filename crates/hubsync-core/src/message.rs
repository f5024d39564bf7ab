//! Signed user messages.
//!
//! A [`Message`] wraps [`MessageData`] with its hash and an Ed25519 signature
//! over that hash. The message type is derived from the [`MessageBody`]
//! variant, so a body and its type can never disagree.
//!
//! # Fact types
//!
//! | Fact | Add | Remove |
//! |------|-----|--------|
//! | Cast | `CastAdd` | `CastRemove` |
//! | Reaction | `ReactionAdd` | `ReactionRemove` |
//! | Link | `LinkAdd` | `LinkRemove` |
//! | Verification | `VerificationAddEthAddress` | `VerificationRemove` |
//! | Signer | `SignerAdd` | `SignerRemove` |
//! | UserData | `UserDataAdd` | none |

use crate::error::HubError;
use crate::keys::TsHash;
use serde::{Deserialize, Serialize};

/// Numeric user-account identifier.
pub type Fid = u64;

/// Hash scheme used for `Message::hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HashScheme {
    /// First 20 bytes of BLAKE3
    #[default]
    Blake3,
}

/// Signature scheme used for `Message::signature`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignatureScheme {
    /// Ed25519 over the message hash
    #[default]
    Ed25519,
}

/// Network a message was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Network {
    /// Production network
    #[default]
    Mainnet,
    /// Public test network
    Testnet,
    /// Local development network
    Devnet,
}

/// Every message type understood by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Publish a cast
    CastAdd = 1,
    /// Delete a cast
    CastRemove = 2,
    /// React to a cast
    ReactionAdd = 3,
    /// Undo a reaction
    ReactionRemove = 4,
    /// Follow-style link to another fid
    LinkAdd = 5,
    /// Undo a link
    LinkRemove = 6,
    /// Prove ownership of an Ethereum address
    VerificationAddEthAddress = 7,
    /// Withdraw a verification
    VerificationRemove = 8,
    /// Authorize a signer key
    SignerAdd = 9,
    /// Revoke a signer key
    SignerRemove = 10,
    /// Set a profile field
    UserDataAdd = 11,
}

/// Whether a message asserts or retracts a fact.
///
/// The derived order (`Add < Remove`) is the tie-break used by the CRDT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageKind {
    /// Asserts a fact
    Add,
    /// Retracts a fact
    Remove,
}

/// Logical fact families, each backed by one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FactType {
    /// Casts
    Cast,
    /// Reactions
    Reaction,
    /// Links
    Link,
    /// Verifications
    Verification,
    /// Signers
    Signer,
    /// Profile fields
    UserData,
}

impl FactType {
    /// All fact types in store order.
    pub const ALL: [FactType; 6] = [
        FactType::Cast,
        FactType::Reaction,
        FactType::Link,
        FactType::Verification,
        FactType::Signer,
        FactType::UserData,
    ];

    /// Lowercase name used in logs and configuration.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FactType::Cast => "cast",
            FactType::Reaction => "reaction",
            FactType::Link => "link",
            FactType::Verification => "verification",
            FactType::Signer => "signer",
            FactType::UserData => "user_data",
        }
    }

    /// Parse a lowercase name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|fact| fact.as_str() == name)
    }
}

impl MessageType {
    /// Wire byte for this type.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Add or Remove.
    #[must_use]
    pub fn kind(self) -> MessageKind {
        match self {
            MessageType::CastRemove
            | MessageType::ReactionRemove
            | MessageType::LinkRemove
            | MessageType::VerificationRemove
            | MessageType::SignerRemove => MessageKind::Remove,
            MessageType::CastAdd
            | MessageType::ReactionAdd
            | MessageType::LinkAdd
            | MessageType::VerificationAddEthAddress
            | MessageType::SignerAdd
            | MessageType::UserDataAdd => MessageKind::Add,
        }
    }

    /// Fact family this type belongs to.
    #[must_use]
    pub fn fact_type(self) -> FactType {
        match self {
            MessageType::CastAdd | MessageType::CastRemove => FactType::Cast,
            MessageType::ReactionAdd | MessageType::ReactionRemove => FactType::Reaction,
            MessageType::LinkAdd | MessageType::LinkRemove => FactType::Link,
            MessageType::VerificationAddEthAddress | MessageType::VerificationRemove => {
                FactType::Verification
            }
            MessageType::SignerAdd | MessageType::SignerRemove => FactType::Signer,
            MessageType::UserDataAdd => FactType::UserData,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = HubError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let message_type = match value {
            1 => MessageType::CastAdd,
            2 => MessageType::CastRemove,
            3 => MessageType::ReactionAdd,
            4 => MessageType::ReactionRemove,
            5 => MessageType::LinkAdd,
            6 => MessageType::LinkRemove,
            7 => MessageType::VerificationAddEthAddress,
            8 => MessageType::VerificationRemove,
            9 => MessageType::SignerAdd,
            10 => MessageType::SignerRemove,
            11 => MessageType::UserDataAdd,
            other => {
                return Err(HubError::InvalidParam(format!(
                    "unknown message type {other}"
                )))
            }
        };
        Ok(message_type)
    }
}

/// Reference to a cast by author and hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CastId {
    /// Author fid
    pub fid: Fid,
    /// Cast message hash (20 bytes)
    pub hash: Vec<u8>,
}

/// Body of a `CastAdd`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastAddBody {
    /// Cast text
    pub text: String,
    /// Embedded URLs
    pub embeds: Vec<String>,
    /// Mentioned fids
    pub mentions: Vec<Fid>,
    /// Parent cast when this is a reply
    pub parent: Option<CastId>,
}

/// Body of a `CastRemove`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastRemoveBody {
    /// Hash of the removed cast
    pub target_hash: Vec<u8>,
}

/// Kind of reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReactionType {
    /// Like
    Like = 1,
    /// Recast
    Recast = 2,
}

/// Body shared by `ReactionAdd` and `ReactionRemove`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionBody {
    /// Reaction kind
    pub reaction_type: ReactionType,
    /// Cast reacted to
    pub target: CastId,
}

/// Body shared by `LinkAdd` and `LinkRemove`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkBody {
    /// Link kind, e.g. `follow` (at most 8 bytes)
    pub link_type: String,
    /// Fid linked to
    pub target_fid: Fid,
}

/// Body of a `VerificationAddEthAddress`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationAddBody {
    /// Ethereum address (20 bytes)
    pub address: Vec<u8>,
    /// Claim signature produced by the address
    pub eth_signature: Vec<u8>,
    /// Block hash the claim references (32 bytes)
    pub block_hash: Vec<u8>,
}

/// Body of a `VerificationRemove`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRemoveBody {
    /// Ethereum address (20 bytes)
    pub address: Vec<u8>,
}

/// Body shared by `SignerAdd` and `SignerRemove`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerBody {
    /// Ed25519 public key (32 bytes)
    pub signer: Vec<u8>,
    /// Optional human-readable name
    pub name: Option<String>,
}

/// Profile field kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum UserDataType {
    /// Profile picture URL
    Pfp = 1,
    /// Display name
    Display = 2,
    /// Bio
    Bio = 3,
    /// Website
    Url = 5,
    /// Username
    Username = 6,
}

/// Body of a `UserDataAdd`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDataBody {
    /// Field being set
    pub data_type: UserDataType,
    /// New value (at most 256 bytes)
    pub value: String,
}

/// Fact-type specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// See [`MessageType::CastAdd`]
    CastAdd(CastAddBody),
    /// See [`MessageType::CastRemove`]
    CastRemove(CastRemoveBody),
    /// See [`MessageType::ReactionAdd`]
    ReactionAdd(ReactionBody),
    /// See [`MessageType::ReactionRemove`]
    ReactionRemove(ReactionBody),
    /// See [`MessageType::LinkAdd`]
    LinkAdd(LinkBody),
    /// See [`MessageType::LinkRemove`]
    LinkRemove(LinkBody),
    /// See [`MessageType::VerificationAddEthAddress`]
    VerificationAddEthAddress(VerificationAddBody),
    /// See [`MessageType::VerificationRemove`]
    VerificationRemove(VerificationRemoveBody),
    /// See [`MessageType::SignerAdd`]
    SignerAdd(SignerBody),
    /// See [`MessageType::SignerRemove`]
    SignerRemove(SignerBody),
    /// See [`MessageType::UserDataAdd`]
    UserDataAdd(UserDataBody),
}

impl MessageBody {
    /// Message type implied by this body.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageBody::CastAdd(_) => MessageType::CastAdd,
            MessageBody::CastRemove(_) => MessageType::CastRemove,
            MessageBody::ReactionAdd(_) => MessageType::ReactionAdd,
            MessageBody::ReactionRemove(_) => MessageType::ReactionRemove,
            MessageBody::LinkAdd(_) => MessageType::LinkAdd,
            MessageBody::LinkRemove(_) => MessageType::LinkRemove,
            MessageBody::VerificationAddEthAddress(_) => MessageType::VerificationAddEthAddress,
            MessageBody::VerificationRemove(_) => MessageType::VerificationRemove,
            MessageBody::SignerAdd(_) => MessageType::SignerAdd,
            MessageBody::SignerRemove(_) => MessageType::SignerRemove,
            MessageBody::UserDataAdd(_) => MessageType::UserDataAdd,
        }
    }
}

/// The signed portion of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    /// Author fid
    pub fid: Fid,
    /// Network time in seconds
    pub timestamp: u32,
    /// Target network
    pub network: Network,
    /// Payload
    pub body: MessageBody,
}

impl MessageData {
    /// Message type implied by the body.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }
}

/// A signed, hashed user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Signed payload
    pub data: MessageData,
    /// Hash of `data` (20 bytes)
    pub hash: Vec<u8>,
    /// Scheme used for `hash`
    pub hash_scheme: HashScheme,
    /// Signature over `hash` (64 bytes)
    pub signature: Vec<u8>,
    /// Scheme used for `signature`
    pub signature_scheme: SignatureScheme,
    /// Public key of the signer (32 bytes)
    pub signer: Vec<u8>,
}

impl Message {
    /// Author fid.
    #[must_use]
    pub fn fid(&self) -> Fid {
        self.data.fid
    }

    /// Network time in seconds.
    #[must_use]
    pub fn timestamp(&self) -> u32 {
        self.data.timestamp
    }

    /// Message type implied by the body.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.data.message_type()
    }

    /// Add or Remove.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.message_type().kind()
    }

    /// Fact family.
    #[must_use]
    pub fn fact_type(&self) -> FactType {
        self.message_type().fact_type()
    }

    /// Timestamp-prefixed ordering key.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the hash is not 20 bytes.
    pub fn ts_hash(&self) -> Result<TsHash, HubError> {
        TsHash::new(self.data.timestamp, &self.hash)
    }

    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, HubError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| HubError::storage(format!("encode message: {e}")))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HubError> {
        ciborium::from_reader(bytes).map_err(|e| HubError::storage(format!("decode message: {e}")))
    }
}

/// Custody assignment of a fid, as observed on chain.
///
/// Signer messages of the fid must be signed by `custody_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRegistryEvent {
    /// Registered fid
    pub fid: Fid,
    /// Ed25519 key of the custody account (32 bytes)
    pub custody_key: Vec<u8>,
    /// Block the event was observed in; later blocks win
    pub block_number: u64,
}

impl IdRegistryEvent {
    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, HubError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| HubError::storage(format!("encode id registry event: {e}")))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not an event.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HubError> {
        ciborium::from_reader(bytes)
            .map_err(|e| HubError::storage(format!("decode id registry event: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_byte_roundtrip() {
        for byte in 1..=11u8 {
            let message_type = MessageType::try_from(byte).unwrap();
            assert_eq!(message_type.as_u8(), byte);
        }
        assert!(MessageType::try_from(0).is_err());
        assert!(MessageType::try_from(12).is_err());
    }

    #[test]
    fn kinds_and_facts() {
        assert_eq!(MessageType::CastRemove.kind(), MessageKind::Remove);
        assert_eq!(MessageType::UserDataAdd.kind(), MessageKind::Add);
        assert_eq!(
            MessageType::VerificationRemove.fact_type(),
            FactType::Verification
        );
        assert!(MessageKind::Remove > MessageKind::Add);
    }

    #[test]
    fn body_determines_type() {
        let body = MessageBody::LinkAdd(LinkBody {
            link_type: "follow".to_string(),
            target_fid: 9,
        });
        assert_eq!(body.message_type(), MessageType::LinkAdd);
    }

    #[test]
    fn fact_names_parse() {
        for fact in FactType::ALL {
            assert_eq!(FactType::from_name(fact.as_str()), Some(fact));
        }
        assert_eq!(FactType::from_name("casts"), None);
    }
}
