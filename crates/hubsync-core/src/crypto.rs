//! Message hashing and signing.

use crate::error::HubError;
use crate::message::{HashScheme, Message, MessageData, SignatureScheme};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Length of message hashes and trie digests.
pub const HASH_LENGTH: usize = 20;

/// First 20 bytes of BLAKE3.
#[must_use]
pub fn blake3_20(bytes: &[u8]) -> [u8; HASH_LENGTH] {
    let digest = blake3::hash(bytes);
    let mut out = [0u8; HASH_LENGTH];
    out.copy_from_slice(&digest.as_bytes()[..HASH_LENGTH]);
    out
}

/// Hash the canonical CBOR encoding of message data.
///
/// # Errors
///
/// Returns error if the data cannot be encoded.
pub fn hash_message_data(data: &MessageData) -> Result<[u8; HASH_LENGTH], HubError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(data, &mut bytes)
        .map_err(|e| HubError::validation(format!("encode message data: {e}")))?;
    Ok(blake3_20(&bytes))
}

/// Hash and sign `data` with `key`.
///
/// # Errors
///
/// Returns error if the data cannot be encoded.
pub fn sign_message(data: MessageData, key: &SigningKey) -> Result<Message, HubError> {
    let hash = hash_message_data(&data)?;
    let signature = key.sign(&hash);
    Ok(Message {
        data,
        hash: hash.to_vec(),
        hash_scheme: HashScheme::Blake3,
        signature: signature.to_bytes().to_vec(),
        signature_scheme: SignatureScheme::Ed25519,
        signer: key.verifying_key().to_bytes().to_vec(),
    })
}

/// Verify an Ed25519 signature over `hash`.
///
/// # Errors
///
/// Returns a validation error if the key or signature is malformed or does not verify.
pub fn verify_signature(signer: &[u8], hash: &[u8], signature: &[u8]) -> Result<(), HubError> {
    let signer: [u8; 32] = signer
        .try_into()
        .map_err(|_| HubError::validation("signer must be 32 bytes"))?;
    let key = VerifyingKey::from_bytes(&signer)
        .map_err(|e| HubError::validation(format!("invalid signer key: {e}")))?;
    let signature = Signature::from_slice(signature)
        .map_err(|e| HubError::validation(format!("invalid signature: {e}")))?;
    key.verify(hash, &signature)
        .map_err(|_| HubError::validation("signature does not verify"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageBody, Network, UserDataBody, UserDataType};

    fn data() -> MessageData {
        MessageData {
            fid: 42,
            timestamp: 1_000,
            network: Network::Devnet,
            body: MessageBody::UserDataAdd(UserDataBody {
                data_type: UserDataType::Bio,
                value: "hello".to_string(),
            }),
        }
    }

    #[test]
    fn blake3_20_truncates() {
        let full = blake3::hash(b"abc");
        assert_eq!(blake3_20(b"abc"), full.as_bytes()[..20]);
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(
            hash_message_data(&data()).unwrap(),
            hash_message_data(&data()).unwrap()
        );
        let mut other = data();
        other.timestamp += 1;
        assert_ne!(
            hash_message_data(&data()).unwrap(),
            hash_message_data(&other).unwrap()
        );
    }

    #[test]
    fn signed_message_verifies() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let message = sign_message(data(), &key).unwrap();
        assert_eq!(message.hash.len(), HASH_LENGTH);
        verify_signature(&message.signer, &message.hash, &message.signature).unwrap();

        let other = SigningKey::from_bytes(&[8u8; 32]);
        let wrong_signer = other.verifying_key().to_bytes();
        assert!(verify_signature(&wrong_signer, &message.hash, &message.signature).is_err());
    }
}
