//! Signed liveness proofs sent by running masternodes.

use std::fmt;

use hodld_consensus::constants::MASTERNODE_MAX_CLOCK_SKEW_SECONDS;
use hodld_consensus::Hash256;
use hodld_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use hodld_primitives::{hash256_to_hex, sha256d, OutPoint};
use hodld_script::keys::SigningKey;
use hodld_script::message::{verify_signed_message, SignedMessageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingError {
    FutureSigTime,
    ExpiredSigTime,
    UnknownMasternode,
    ProtocolTooOld,
    NotEnabled,
    /// Not newer than the ping already held for the masternode.
    Replay,
    /// Arrived sooner after the previous ping than the ping cadence allows.
    TooEarly,
    InvalidSignature(SignedMessageError),
    UnknownBlock,
    StaleBlock { height: i32 },
    OutpointMismatch,
}

impl PingError {
    /// Misbehavior score charged to the peer that sent the ping.
    pub fn dos(&self) -> i32 {
        match self {
            PingError::FutureSigTime | PingError::ExpiredSigTime => 1,
            PingError::InvalidSignature(_) | PingError::OutpointMismatch => 33,
            _ => 0,
        }
    }
}

impl fmt::Display for PingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PingError::FutureSigTime => write!(f, "signature time too far in the future"),
            PingError::ExpiredSigTime => write!(f, "signature time too far in the past"),
            PingError::UnknownMasternode => write!(f, "unknown masternode"),
            PingError::ProtocolTooOld => write!(f, "masternode protocol version too old"),
            PingError::NotEnabled => write!(f, "masternode not active"),
            PingError::Replay => write!(f, "ping not newer than the current one"),
            PingError::TooEarly => write!(f, "ping arrived before the ping interval elapsed"),
            PingError::InvalidSignature(err) => write!(f, "bad ping signature: {err}"),
            PingError::UnknownBlock => write!(f, "ping references an unknown block"),
            PingError::StaleBlock { height } => {
                write!(f, "ping references stale block at height {height}")
            }
            PingError::OutpointMismatch => write!(f, "ping collateral does not match announcement"),
        }
    }
}

impl std::error::Error for PingError {}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ping {
    pub outpoint: OutPoint,
    /// Recent block hash; pings referencing deep history are dropped.
    pub block_hash: Hash256,
    pub sig_time: i64,
    pub signature: Vec<u8>,
}

impl Ping {
    pub fn new(outpoint: OutPoint, block_hash: Hash256, sig_time: i64) -> Self {
        Self {
            outpoint,
            block_hash,
            sig_time,
            signature: Vec::new(),
        }
    }

    /// Placeholder held by records restored without a ping.
    pub fn empty(outpoint: OutPoint) -> Self {
        Self::new(outpoint, [0u8; 32], 0)
    }

    pub fn is_empty(&self) -> bool {
        self.sig_time == 0 && self.signature.is_empty()
    }

    /// De-duplication key: sha256d(outpoint || sig_time).
    pub fn hash(&self) -> Hash256 {
        identity_hash(&self.outpoint, self.sig_time)
    }

    pub fn signed_message(&self) -> String {
        format!(
            "{}{}{}",
            self.outpoint,
            hash256_to_hex(&self.block_hash),
            self.sig_time
        )
    }

    pub fn sign(&mut self, operator_key: &SigningKey, sig_time: i64) {
        self.sig_time = sig_time;
        self.signature = operator_key.sign_message(self.signed_message().as_bytes());
    }

    pub fn verify_signature(&self, operator_pubkey: &[u8]) -> Result<(), PingError> {
        verify_signed_message(
            operator_pubkey,
            &self.signature,
            self.signed_message().as_bytes(),
        )
        .map_err(PingError::InvalidSignature)
    }

    /// Signature time must sit within the clock-skew window around `now`.
    pub fn check_sig_time(&self, now: i64) -> Result<(), PingError> {
        if self.sig_time > now + MASTERNODE_MAX_CLOCK_SKEW_SECONDS {
            return Err(PingError::FutureSigTime);
        }
        if self.sig_time <= now - MASTERNODE_MAX_CLOCK_SKEW_SECONDS {
            return Err(PingError::ExpiredSigTime);
        }
        Ok(())
    }

    /// Checks applied to a ping embedded in an announcement: timing and the
    /// operator signature, without touching registry state.
    pub fn check_embedded(
        &self,
        outpoint: &OutPoint,
        operator_pubkey: &[u8],
        now: i64,
    ) -> Result<(), PingError> {
        if &self.outpoint != outpoint {
            return Err(PingError::OutpointMismatch);
        }
        self.check_sig_time(now)?;
        self.verify_signature(operator_pubkey)
    }
}

pub(crate) fn identity_hash(outpoint: &OutPoint, sig_time: i64) -> Hash256 {
    let mut encoder = Encoder::with_capacity(44);
    outpoint.consensus_encode(&mut encoder);
    encoder.write_i64_le(sig_time);
    sha256d(encoder.as_slice())
}

impl Encodable for Ping {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.outpoint.consensus_encode(encoder);
        encoder.write_hash_le(&self.block_hash);
        encoder.write_i64_le(self.sig_time);
        encoder.write_var_bytes(&self.signature);
    }
}

impl Decodable for Ping {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            outpoint: OutPoint::consensus_decode(decoder)?,
            block_hash: decoder.read_hash_le()?,
            sig_time: decoder.read_i64_le()?,
            signature: decoder.read_var_bytes()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodld_primitives::encoding::{decode, encode};

    fn operator() -> SigningKey {
        SigningKey::from_secret([0x21; 32], true).expect("key")
    }

    fn signed_ping(sig_time: i64) -> Ping {
        let mut ping = Ping::new(OutPoint::new([4u8; 32], 1), [9u8; 32], 0);
        ping.sign(&operator(), sig_time);
        ping
    }

    #[test]
    fn signature_covers_block_hash() {
        let ping = signed_ping(1_000_000);
        ping.verify_signature(operator().pubkey_bytes())
            .expect("valid");

        let mut moved = ping.clone();
        moved.block_hash = [8u8; 32];
        let err = moved
            .verify_signature(operator().pubkey_bytes())
            .unwrap_err();
        assert_eq!(err.dos(), 33);
    }

    #[test]
    fn sig_time_window() {
        let ping = signed_ping(1_000_000);
        assert!(ping.check_sig_time(1_000_000).is_ok());
        assert_eq!(
            ping.check_sig_time(1_000_000 - 3_601),
            Err(PingError::FutureSigTime)
        );
        assert_eq!(
            ping.check_sig_time(1_000_000 + 3_600),
            Err(PingError::ExpiredSigTime)
        );
        assert!(ping.check_sig_time(1_000_000 + 3_599).is_ok());
    }

    #[test]
    fn hash_ignores_signature_and_block() {
        let a = signed_ping(1_000_000);
        let mut b = a.clone();
        b.block_hash = [1u8; 32];
        b.signature.clear();
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), signed_ping(1_000_001).hash());
    }

    #[test]
    fn embedded_ping_must_match_outpoint() {
        let ping = signed_ping(1_000_000);
        let other = OutPoint::new([5u8; 32], 1);
        assert_eq!(
            ping.check_embedded(&other, operator().pubkey_bytes(), 1_000_000),
            Err(PingError::OutpointMismatch)
        );
        assert!(ping
            .check_embedded(&ping.outpoint, operator().pubkey_bytes(), 1_000_000)
            .is_ok());
    }

    #[test]
    fn codec_preserves_fields() {
        let ping = signed_ping(1_234_567);
        let decoded: Ping = decode(&encode(&ping)).expect("decode");
        assert_eq!(decoded, ping);
        assert!(!decoded.is_empty());
        assert!(Ping::empty(ping.outpoint.clone()).is_empty());
    }
}
