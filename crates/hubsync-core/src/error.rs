//! Error taxonomy shared by stores, the trie and the sync engine.

use crate::message::Fid;

/// Result alias used across hubsync.
pub type HubResult<T> = Result<T, HubError>;

/// Why a message cannot be merged yet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockedReason {
    /// The id registry has no custody key for the fid
    #[error("unknown fid {fid}")]
    UnknownFid {
        /// The fid that is missing
        fid: Fid,
    },
    /// The signer has not been added for the fid
    #[error("unknown signer {} for fid {fid}", hex::encode(.signer))]
    UnknownSigner {
        /// Owning fid
        fid: Fid,
        /// Signer public key
        signer: Vec<u8>,
    },
}

/// Errors surfaced by hubsync operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The message failed structural, hash or signature checks
    #[error("validation failure: {0}")]
    Validation(String),

    /// A caller passed a malformed argument
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// A stored message wins over the incoming one
    #[error("conflict: {0}")]
    Conflict(String),

    /// The message is already stored
    #[error("duplicate message")]
    Duplicate,

    /// The message would be pruned immediately
    #[error("prunable: {0}")]
    Prunable(String),

    /// A dependency (fid or signer) is missing
    #[error("blocked: {0}")]
    Blocked(BlockedReason),

    /// The requested entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The KV store or a lock failed
    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// A peer RPC failed
    #[error("transport failure: {0}")]
    Transport(String),
}

impl HubError {
    /// Stable dotted error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            HubError::Validation(_) => "bad_request.validation_failure",
            HubError::InvalidParam(_) => "bad_request.invalid_param",
            HubError::Conflict(_) => "bad_request.conflict",
            HubError::Duplicate => "bad_request.duplicate",
            HubError::Prunable(_) => "bad_request.prunable",
            HubError::Blocked(BlockedReason::UnknownFid { .. }) => "blocked.unknown_fid",
            HubError::Blocked(BlockedReason::UnknownSigner { .. }) => "blocked.unknown_signer",
            HubError::NotFound(_) => "not_found",
            HubError::StorageFailure(_) => "unavailable.storage_failure",
            HubError::Transport(_) => "unavailable.network_failure",
        }
    }

    /// Whether retrying the same operation later can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HubError::StorageFailure(_) | HubError::Transport(_) | HubError::Blocked(_)
        )
    }

    /// Shorthand for a validation failure.
    pub fn validation(msg: impl Into<String>) -> Self {
        HubError::Validation(msg.into())
    }

    /// Shorthand for a storage failure.
    pub fn storage(msg: impl Into<String>) -> Self {
        HubError::StorageFailure(msg.into())
    }
}
