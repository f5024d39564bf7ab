//! Structural, hash and signature validation of incoming messages.

use crate::crypto::{hash_message_data, verify_signature, HASH_LENGTH};
use crate::error::HubError;
use crate::keys::LINK_TYPE_KEY_LENGTH;
use crate::message::{CastId, Message, MessageBody};

/// Messages may be at most this far ahead of local network time.
pub const ALLOWED_CLOCK_SKEW_SECONDS: u32 = 10 * 60;

/// Maximum cast text length in bytes.
pub const MAX_CAST_TEXT_BYTES: usize = 320;
/// Maximum number of cast embeds.
pub const MAX_CAST_EMBEDS: usize = 2;
/// Maximum number of cast mentions.
pub const MAX_CAST_MENTIONS: usize = 10;
/// Maximum length of an embed URL in bytes.
pub const MAX_EMBED_BYTES: usize = 256;
/// Maximum user data value length in bytes.
pub const MAX_USER_DATA_BYTES: usize = 256;
/// Maximum signer name length in bytes.
pub const MAX_SIGNER_NAME_BYTES: usize = 32;

const ETH_ADDRESS_LENGTH: usize = 20;
const BLOCK_HASH_LENGTH: usize = 32;
const SIGNER_KEY_LENGTH: usize = 32;

/// Validate a message against the current network time `now`.
///
/// Checks the fid, the recomputed hash, the signature over the hash, the
/// timestamp skew and the body limits. Dependencies (custody key, active
/// signer) are checked by the engine, not here.
///
/// # Errors
///
/// Returns [`HubError::Validation`] describing the first failing check.
pub fn validate_message(message: &Message, now: u32) -> Result<(), HubError> {
    check_message(message, now).map_err(|err| {
        tracing::debug!(
            fid = message.data.fid,
            timestamp = message.data.timestamp,
            error = %err,
            "Message failed validation"
        );
        err
    })
}

fn check_message(message: &Message, now: u32) -> Result<(), HubError> {
    if message.data.fid == 0 {
        return Err(HubError::validation("fid must be non-zero"));
    }

    if message.data.timestamp > now.saturating_add(ALLOWED_CLOCK_SKEW_SECONDS) {
        return Err(HubError::validation(format!(
            "timestamp {} more than {ALLOWED_CLOCK_SKEW_SECONDS}s in the future",
            message.data.timestamp
        )));
    }

    if message.hash.len() != HASH_LENGTH {
        return Err(HubError::validation("hash must be 20 bytes"));
    }
    let computed = hash_message_data(&message.data)?;
    if computed.as_slice() != message.hash.as_slice() {
        return Err(HubError::validation("hash does not match message data"));
    }

    verify_signature(&message.signer, &message.hash, &message.signature)?;

    validate_body(&message.data.body)
}

fn validate_body(body: &MessageBody) -> Result<(), HubError> {
    match body {
        MessageBody::CastAdd(cast) => {
            if cast.text.len() > MAX_CAST_TEXT_BYTES {
                return Err(HubError::validation("cast text too long"));
            }
            if cast.embeds.len() > MAX_CAST_EMBEDS {
                return Err(HubError::validation("too many embeds"));
            }
            if cast.embeds.iter().any(|embed| embed.len() > MAX_EMBED_BYTES) {
                return Err(HubError::validation("embed too long"));
            }
            if cast.mentions.len() > MAX_CAST_MENTIONS {
                return Err(HubError::validation("too many mentions"));
            }
            if let Some(parent) = &cast.parent {
                validate_cast_id(parent)?;
            }
            Ok(())
        }
        MessageBody::CastRemove(remove) => expect_len(&remove.target_hash, HASH_LENGTH, "target hash"),
        MessageBody::ReactionAdd(reaction) | MessageBody::ReactionRemove(reaction) => {
            validate_cast_id(&reaction.target)
        }
        MessageBody::LinkAdd(link) | MessageBody::LinkRemove(link) => {
            if link.link_type.is_empty() || link.link_type.len() > LINK_TYPE_KEY_LENGTH {
                return Err(HubError::validation("link type must be 1 to 8 bytes"));
            }
            if link.target_fid == 0 {
                return Err(HubError::validation("target fid must be non-zero"));
            }
            Ok(())
        }
        MessageBody::VerificationAddEthAddress(add) => {
            expect_len(&add.address, ETH_ADDRESS_LENGTH, "address")?;
            expect_len(&add.block_hash, BLOCK_HASH_LENGTH, "block hash")?;
            // Only presence is checked; verifying the claim needs chain access.
            if add.eth_signature.is_empty() {
                return Err(HubError::validation("missing eth signature"));
            }
            Ok(())
        }
        MessageBody::VerificationRemove(remove) => {
            expect_len(&remove.address, ETH_ADDRESS_LENGTH, "address")
        }
        MessageBody::SignerAdd(signer) | MessageBody::SignerRemove(signer) => {
            expect_len(&signer.signer, SIGNER_KEY_LENGTH, "signer")?;
            if signer
                .name
                .as_ref()
                .is_some_and(|name| name.len() > MAX_SIGNER_NAME_BYTES)
            {
                return Err(HubError::validation("signer name too long"));
            }
            Ok(())
        }
        MessageBody::UserDataAdd(user_data) => {
            if user_data.value.len() > MAX_USER_DATA_BYTES {
                return Err(HubError::validation("user data value too long"));
            }
            Ok(())
        }
    }
}

fn validate_cast_id(cast_id: &CastId) -> Result<(), HubError> {
    if cast_id.fid == 0 {
        return Err(HubError::validation("cast id fid must be non-zero"));
    }
    expect_len(&cast_id.hash, HASH_LENGTH, "cast id hash")
}

fn expect_len(bytes: &[u8], expected: usize, what: &str) -> Result<(), HubError> {
    if bytes.len() == expected {
        Ok(())
    } else {
        Err(HubError::validation(format!(
            "{what} must be {expected} bytes, got {}",
            bytes.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sign_message;
    use crate::message::{
        CastAddBody, LinkBody, MessageData, Network, SignerBody, UserDataBody, UserDataType,
    };
    use ed25519_dalek::SigningKey;

    fn key() -> SigningKey {
        SigningKey::from_bytes(&[3u8; 32])
    }

    fn signed(body: MessageBody, timestamp: u32) -> Message {
        sign_message(
            MessageData {
                fid: 11,
                timestamp,
                network: Network::Devnet,
                body,
            },
            &key(),
        )
        .unwrap()
    }

    fn cast(text: &str) -> MessageBody {
        MessageBody::CastAdd(CastAddBody {
            text: text.to_string(),
            embeds: vec![],
            mentions: vec![],
            parent: None,
        })
    }

    #[test]
    fn valid_message_passes() {
        tokio_test::assert_ok!(validate_message(&signed(cast("gm"), 100), 100));
    }

    #[test]
    fn tampered_data_fails_hash_check() {
        let mut message = signed(cast("gm"), 100);
        message.data.timestamp = 101;
        let err = validate_message(&message, 200).unwrap_err();
        assert_eq!(err, HubError::validation("hash does not match message data"));
    }

    #[test]
    fn foreign_signature_fails() {
        let mut message = signed(cast("gm"), 100);
        message.signer = SigningKey::from_bytes(&[4u8; 32])
            .verifying_key()
            .to_bytes()
            .to_vec();
        assert!(validate_message(&message, 100).is_err());
    }

    #[test]
    fn future_timestamp_rejected() {
        let message = signed(cast("gm"), 100 + ALLOWED_CLOCK_SKEW_SECONDS + 1);
        assert!(validate_message(&message, 100).is_err());
        let message = signed(cast("gm"), 100 + ALLOWED_CLOCK_SKEW_SECONDS);
        assert!(validate_message(&message, 100).is_ok());
    }

    #[test]
    fn body_limits_enforced() {
        let long = "x".repeat(MAX_CAST_TEXT_BYTES + 1);
        assert!(validate_message(&signed(cast(&long), 1), 1).is_err());

        let link = MessageBody::LinkAdd(LinkBody {
            link_type: "friendship".into(),
            target_fid: 1,
        });
        assert!(validate_message(&signed(link, 1), 1).is_err());

        let signer = MessageBody::SignerAdd(SignerBody {
            signer: vec![1; 31],
            name: None,
        });
        assert!(validate_message(&signed(signer, 1), 1).is_err());

        let user_data = MessageBody::UserDataAdd(UserDataBody {
            data_type: UserDataType::Bio,
            value: "y".repeat(MAX_USER_DATA_BYTES + 1),
        });
        assert!(validate_message(&signed(user_data, 1), 1).is_err());
    }
}
