//! Private keys used to sign masternode gossip.

use hodld_primitives::hash::hash160;
use secp256k1::{Message, PublicKey, SecretKey};

use crate::message::signed_message_hash;
use crate::secp::secp256k1_all;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    InvalidSecretKey,
}

impl std::fmt::Display for KeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyError::InvalidSecretKey => write!(f, "invalid secret key"),
        }
    }
}

impl std::error::Error for KeyError {}

/// A secp256k1 secret together with the public key serialization it signs for.
#[derive(Clone)]
pub struct SigningKey {
    secret: SecretKey,
    compressed: bool,
    pubkey_bytes: Vec<u8>,
}

impl SigningKey {
    pub fn from_secret(secret: [u8; 32], compressed: bool) -> Result<Self, KeyError> {
        let secret = SecretKey::from_slice(&secret).map_err(|_| KeyError::InvalidSecretKey)?;
        let pubkey = PublicKey::from_secret_key(secp256k1_all(), &secret);
        let pubkey_bytes = if compressed {
            pubkey.serialize().to_vec()
        } else {
            pubkey.serialize_uncompressed().to_vec()
        };
        Ok(Self {
            secret,
            compressed,
            pubkey_bytes,
        })
    }

    pub fn pubkey_bytes(&self) -> &[u8] {
        &self.pubkey_bytes
    }

    pub fn key_id(&self) -> [u8; 20] {
        hash160(&self.pubkey_bytes)
    }

    /// Produces a 65-byte compact recoverable signature over the signed-message digest.
    pub fn sign_message(&self, message: &[u8]) -> Vec<u8> {
        let digest = signed_message_hash(message);
        let msg = Message::from_digest(digest);
        let sig = secp256k1_all().sign_ecdsa_recoverable(&msg, &self.secret);
        let (rec_id, bytes) = sig.serialize_compact();
        let mut out = [0u8; 65];
        out[0] = 27u8
            .saturating_add(rec_id.to_i32() as u8)
            .saturating_add(if self.compressed { 4 } else { 0 });
        out[1..].copy_from_slice(&bytes);
        out.to_vec()
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("compressed", &self.compressed)
            .field("pubkey", &hodld_primitives::hash::bytes_to_hex(&self.pubkey_bytes))
            .finish()
    }
}
