//! Sync identifiers.
//!
//! `ascii10(timestamp) ‖ be64(fid) ‖ type ‖ hash`, 39 bytes in total.

use hubsync_core::{Fid, HubError, Message, MessageType, TsHash, HASH_LENGTH};
use std::fmt;

/// Width of the zero-padded decimal timestamp.
pub const TIMESTAMP_LENGTH: usize = 10;

/// Total length of a sync id.
pub const SYNC_ID_LENGTH: usize = TIMESTAMP_LENGTH + 8 + 1 + HASH_LENGTH;

const FID_OFFSET: usize = TIMESTAMP_LENGTH;
const TYPE_OFFSET: usize = FID_OFFSET + 8;
const HASH_OFFSET: usize = TYPE_OFFSET + 1;

/// Ten ASCII digits of `timestamp`, zero-padded.
#[must_use]
pub fn timestamp_to_prefix(timestamp: u32) -> Vec<u8> {
    format!("{timestamp:0width$}", width = TIMESTAMP_LENGTH).into_bytes()
}

/// Trie key derived from a merged message.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncId([u8; SYNC_ID_LENGTH]);

impl SyncId {
    /// Sync id of a message.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the message hash is not 20 bytes.
    pub fn new(message: &Message) -> Result<Self, HubError> {
        Self::from_parts(
            message.timestamp(),
            message.fid(),
            message.message_type(),
            &message.hash,
        )
    }

    /// Assemble a sync id from its parts.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `hash` is not 20 bytes.
    pub fn from_parts(
        timestamp: u32,
        fid: Fid,
        message_type: MessageType,
        hash: &[u8],
    ) -> Result<Self, HubError> {
        if hash.len() != HASH_LENGTH {
            return Err(HubError::validation(format!(
                "hash must be {HASH_LENGTH} bytes, got {}",
                hash.len()
            )));
        }
        let mut bytes = [0u8; SYNC_ID_LENGTH];
        bytes[..TIMESTAMP_LENGTH].copy_from_slice(&timestamp_to_prefix(timestamp));
        bytes[FID_OFFSET..TYPE_OFFSET].copy_from_slice(&fid.to_be_bytes());
        bytes[TYPE_OFFSET] = message_type.as_u8();
        bytes[HASH_OFFSET..].copy_from_slice(hash);
        Ok(Self(bytes))
    }

    /// Parse and check raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an invalid-parameter error on a bad length, a non-digit
    /// timestamp or an unknown message type.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HubError> {
        let bytes: [u8; SYNC_ID_LENGTH] = bytes.try_into().map_err(|_| {
            HubError::InvalidParam(format!(
                "sync id must be {SYNC_ID_LENGTH} bytes, got {}",
                bytes.len()
            ))
        })?;
        if !bytes[..TIMESTAMP_LENGTH].iter().all(u8::is_ascii_digit) {
            return Err(HubError::InvalidParam(
                "sync id timestamp must be decimal digits".to_string(),
            ));
        }
        MessageType::try_from(bytes[TYPE_OFFSET])?;
        let id = Self(bytes);
        id.parse_timestamp()?;
        Ok(id)
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Network time of the message.
    #[must_use]
    pub fn timestamp(&self) -> u32 {
        self.parse_timestamp().unwrap_or_default()
    }

    /// Author fid.
    #[must_use]
    pub fn fid(&self) -> Fid {
        let mut fid = [0u8; 8];
        fid.copy_from_slice(&self.0[FID_OFFSET..TYPE_OFFSET]);
        Fid::from_be_bytes(fid)
    }

    /// Message type.
    ///
    /// # Errors
    ///
    /// Returns error if the type byte is unknown.
    pub fn message_type(&self) -> Result<MessageType, HubError> {
        MessageType::try_from(self.0[TYPE_OFFSET])
    }

    /// Message hash.
    #[must_use]
    pub fn hash(&self) -> &[u8] {
        &self.0[HASH_OFFSET..]
    }

    /// Ordering key of the message.
    ///
    /// # Errors
    ///
    /// Never fails for a well-formed id; the hash length is fixed.
    pub fn ts_hash(&self) -> Result<TsHash, HubError> {
        TsHash::new(self.timestamp(), self.hash())
    }

    fn parse_timestamp(&self) -> Result<u32, HubError> {
        std::str::from_utf8(&self.0[..TIMESTAMP_LENGTH])
            .ok()
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| HubError::InvalidParam("sync id timestamp out of range".to_string()))
    }
}

impl fmt::Debug for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SyncId({}:{}:{}:{})",
            self.timestamp(),
            self.fid(),
            self.0[TYPE_OFFSET],
            hex::encode(self.hash())
        )
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
