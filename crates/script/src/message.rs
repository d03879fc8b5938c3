//! Compact-signature signed messages, as used by masternode pings and announcements.

use hodld_consensus::constants::SIGNED_MESSAGE_MAGIC;
use hodld_consensus::Hash256;
use hodld_primitives::encoding::Encoder;
use hodld_primitives::hash::sha256d;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey};

use crate::secp::secp256k1_verify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignedMessageError {
    InvalidPubkey,
    InvalidSignature,
    InvalidRecoveryId,
    RecoverFailed,
    PubkeyMismatch,
}

impl std::fmt::Display for SignedMessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignedMessageError::InvalidPubkey => write!(f, "invalid pubkey"),
            SignedMessageError::InvalidSignature => write!(f, "invalid signature"),
            SignedMessageError::InvalidRecoveryId => write!(f, "invalid recovery id"),
            SignedMessageError::RecoverFailed => write!(f, "failed to recover pubkey"),
            SignedMessageError::PubkeyMismatch => write!(f, "pubkey mismatch"),
        }
    }
}

impl std::error::Error for SignedMessageError {}

pub fn signed_message_hash(message: &[u8]) -> Hash256 {
    let mut encoder = Encoder::new();
    encoder.write_var_str(SIGNED_MESSAGE_MAGIC);
    encoder.write_var_bytes(message);
    sha256d(encoder.as_slice())
}

/// True for a well-formed compressed or uncompressed secp256k1 public key.
pub fn is_valid_pubkey(pubkey: &[u8]) -> bool {
    matches!(pubkey.len(), 33 | 65) && PublicKey::from_slice(pubkey).is_ok()
}

pub fn verify_signed_message(
    expected_pubkey: &[u8],
    signature: &[u8],
    message: &[u8],
) -> Result<(), SignedMessageError> {
    if expected_pubkey.is_empty() {
        return Err(SignedMessageError::InvalidPubkey);
    }
    let (recoverable, compressed) = decode_compact_signature(signature)?;
    let expected_compressed = expected_pubkey.len() == 33;
    if compressed != expected_compressed {
        return Err(SignedMessageError::PubkeyMismatch);
    }
    let msg = Message::from_digest(signed_message_hash(message));
    let pubkey =
        PublicKey::from_slice(expected_pubkey).map_err(|_| SignedMessageError::InvalidPubkey)?;
    let sig = recoverable.to_standard();
    secp256k1_verify()
        .verify_ecdsa(&msg, &sig, &pubkey)
        .map_err(|_| SignedMessageError::InvalidSignature)
}

pub fn recover_signed_message_pubkey(
    signature: &[u8],
    message: &[u8],
) -> Result<Vec<u8>, SignedMessageError> {
    let (recoverable, compressed) = decode_compact_signature(signature)?;
    let msg = Message::from_digest(signed_message_hash(message));
    let pubkey = secp256k1_verify()
        .recover_ecdsa(&msg, &recoverable)
        .map_err(|_| SignedMessageError::RecoverFailed)?;
    if compressed {
        Ok(pubkey.serialize().to_vec())
    } else {
        Ok(pubkey.serialize_uncompressed().to_vec())
    }
}

fn decode_compact_signature(
    signature: &[u8],
) -> Result<(RecoverableSignature, bool), SignedMessageError> {
    if signature.len() != 65 {
        return Err(SignedMessageError::InvalidSignature);
    }
    let header = signature[0];
    if !(27..=34).contains(&header) {
        return Err(SignedMessageError::InvalidSignature);
    }
    let compressed = header >= 31;
    let recovery = if compressed { header - 31 } else { header - 27 };
    let rec_id =
        RecoveryId::from_i32(recovery as i32).map_err(|_| SignedMessageError::InvalidRecoveryId)?;
    let sig = RecoverableSignature::from_compact(&signature[1..65], rec_id)
        .map_err(|_| SignedMessageError::InvalidSignature)?;
    Ok((sig, compressed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SigningKey;

    #[test]
    fn signature_verifies_against_signer_only() {
        let signer = SigningKey::from_secret([1u8; 32], true).expect("key");
        let other = SigningKey::from_secret([2u8; 32], true).expect("key");
        let sig = signer.sign_message(b"hello");

        verify_signed_message(signer.pubkey_bytes(), &sig, b"hello").expect("verify ok");
        assert_eq!(
            verify_signed_message(other.pubkey_bytes(), &sig, b"hello"),
            Err(SignedMessageError::InvalidSignature)
        );
        assert_eq!(
            verify_signed_message(signer.pubkey_bytes(), &sig, b"hellp"),
            Err(SignedMessageError::InvalidSignature)
        );
    }

    #[test]
    fn compression_must_match_pubkey_encoding() {
        let compressed = SigningKey::from_secret([1u8; 32], true).expect("key");
        let uncompressed = SigningKey::from_secret([1u8; 32], false).expect("key");
        let sig = compressed.sign_message(b"hello");
        assert_eq!(
            verify_signed_message(uncompressed.pubkey_bytes(), &sig, b"hello"),
            Err(SignedMessageError::PubkeyMismatch)
        );
    }

    #[test]
    fn recovered_pubkey_matches_signer() {
        let compressed = SigningKey::from_secret([3u8; 32], true).expect("key");
        let uncompressed = SigningKey::from_secret([3u8; 32], false).expect("key");

        let recovered =
            recover_signed_message_pubkey(&compressed.sign_message(b"m"), b"m").expect("recover");
        assert_eq!(recovered, compressed.pubkey_bytes());

        let recovered = recover_signed_message_pubkey(&uncompressed.sign_message(b"m"), b"m")
            .expect("recover");
        assert_eq!(recovered, uncompressed.pubkey_bytes());
    }

    #[test]
    fn malformed_signatures_are_rejected() {
        let signer = SigningKey::from_secret([1u8; 32], true).expect("key");
        let mut sig = signer.sign_message(b"hello");
        sig[0] = 40;
        assert_eq!(
            verify_signed_message(signer.pubkey_bytes(), &sig, b"hello"),
            Err(SignedMessageError::InvalidSignature)
        );
        assert_eq!(
            verify_signed_message(signer.pubkey_bytes(), &sig[..64], b"hello"),
            Err(SignedMessageError::InvalidSignature)
        );
    }

    #[test]
    fn pubkey_validation() {
        let signer = SigningKey::from_secret([1u8; 32], true).expect("key");
        assert!(is_valid_pubkey(signer.pubkey_bytes()));
        assert!(!is_valid_pubkey(&[0x05; 33]));
        assert!(!is_valid_pubkey(&[]));
    }
}
