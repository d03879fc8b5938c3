//! Signed masternode announcements.

use std::fmt;

use hodld_consensus::constants::MASTERNODE_MAX_CLOCK_SKEW_SECONDS;
use hodld_consensus::{ChainParams, Hash256, Network};
use hodld_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use hodld_primitives::hash::{bytes_to_hex, hash160};
use hodld_primitives::{NetAddress, OutPoint};
use hodld_script::keys::SigningKey;
use hodld_script::message::{is_valid_pubkey, verify_signed_message, SignedMessageError};

use crate::collateral::CollateralStatus;
use crate::masternode::{Identity, Masternode};
use crate::ping::{Ping, PingError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    FutureSigTime,
    InvalidPing(PingError),
    ProtocolTooOld { version: i32 },
    InvalidCollateralPubkey,
    InvalidOperatorPubkey,
    InvalidSignature(SignedMessageError),
    WrongPort { port: u16 },
    /// Not newer than the announcement already applied for this collateral.
    Replay,
    /// A re-announcement arrived within the minimum broadcast interval.
    TooFrequent,
    Collateral(CollateralStatus),
    /// The collateral output does not pay the announcing collateral key.
    CollateralNotOwned,
    Immature { confirmations: i32 },
    SigTimeBeforeCollateral,
    InvalidAddress,
    /// The collateral's record is PoSe-banned and cannot be re-announced.
    Banned,
}

impl BroadcastError {
    /// Misbehavior score charged to the peer that relayed the announcement.
    pub fn dos(&self) -> i32 {
        match self {
            BroadcastError::FutureSigTime => 1,
            BroadcastError::InvalidPing(err) => err.dos(),
            BroadcastError::InvalidCollateralPubkey
            | BroadcastError::InvalidOperatorPubkey
            | BroadcastError::InvalidSignature(_) => 100,
            BroadcastError::CollateralNotOwned => 33,
            _ => 0,
        }
    }

    /// Chain-dependent failures that may succeed later; the announcement is
    /// dropped from the seen cache so a re-delivery is evaluated again.
    pub fn retry_later(&self) -> bool {
        matches!(
            self,
            BroadcastError::Collateral(_) | BroadcastError::Immature { .. }
        )
    }
}

impl fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastError::FutureSigTime => write!(f, "signature time too far in the future"),
            BroadcastError::InvalidPing(err) => write!(f, "invalid embedded ping: {err}"),
            BroadcastError::ProtocolTooOld { version } => {
                write!(f, "protocol version {version} below payment minimum")
            }
            BroadcastError::InvalidCollateralPubkey => write!(f, "invalid collateral pubkey"),
            BroadcastError::InvalidOperatorPubkey => write!(f, "invalid operator pubkey"),
            BroadcastError::InvalidSignature(err) => write!(f, "bad announcement signature: {err}"),
            BroadcastError::WrongPort { port } => write!(f, "port {port} not allowed on this network"),
            BroadcastError::Replay => write!(f, "announcement not newer than the current one"),
            BroadcastError::TooFrequent => write!(f, "re-announced within the minimum interval"),
            BroadcastError::Collateral(status) => write!(f, "collateral rejected: {}", status.as_str()),
            BroadcastError::CollateralNotOwned => write!(f, "collateral not owned by announcing key"),
            BroadcastError::Immature { confirmations } => {
                write!(f, "collateral has only {confirmations} confirmations")
            }
            BroadcastError::SigTimeBeforeCollateral => {
                write!(f, "signature time precedes collateral maturity")
            }
            BroadcastError::InvalidAddress => write!(f, "address not valid for a public service"),
            BroadcastError::Banned => write!(f, "masternode is PoSe-banned"),
        }
    }
}

impl std::error::Error for BroadcastError {}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Broadcast {
    pub identity: Identity,
    pub last_ping: Ping,
    /// Sender's mixing-queue sequence; carried on the wire, never applied.
    pub last_dsq: i64,
}

impl Broadcast {
    /// Builds and signs an announcement together with its first ping. The
    /// ping is signed by the operator key, the announcement by the
    /// collateral key, both at `sig_time`.
    pub fn create(
        outpoint: OutPoint,
        addr: NetAddress,
        collateral_key: &SigningKey,
        operator_key: &SigningKey,
        protocol_version: i32,
        block_hash: Hash256,
        sig_time: i64,
    ) -> Self {
        let mut ping = Ping::new(outpoint.clone(), block_hash, sig_time);
        ping.sign(operator_key, sig_time);

        let mut broadcast = Self {
            identity: Identity {
                outpoint,
                addr,
                collateral_pubkey: collateral_key.pubkey_bytes().to_vec(),
                operator_pubkey: operator_key.pubkey_bytes().to_vec(),
                signature: Vec::new(),
                sig_time,
                protocol_version,
            },
            last_ping: ping,
            last_dsq: 0,
        };
        broadcast.sign(collateral_key, sig_time);
        broadcast
    }

    /// Re-creates the announcement a record was built from, with its newest ping.
    pub fn from_record(record: &Masternode) -> Self {
        Self {
            identity: record.identity.clone(),
            last_ping: record.last_ping.clone(),
            last_dsq: record.last_dsq,
        }
    }

    pub fn outpoint(&self) -> &OutPoint {
        &self.identity.outpoint
    }

    pub fn sig_time(&self) -> i64 {
        self.identity.sig_time
    }

    pub fn hash(&self) -> Hash256 {
        self.identity.announce_hash()
    }

    pub fn signed_message(&self) -> String {
        let identity = &self.identity;
        format!(
            "{}{}{}{}{}{}",
            identity.outpoint,
            identity.addr,
            identity.sig_time,
            key_id_hex(&identity.collateral_pubkey),
            key_id_hex(&identity.operator_pubkey),
            identity.protocol_version
        )
    }

    pub fn sign(&mut self, collateral_key: &SigningKey, sig_time: i64) {
        self.identity.sig_time = sig_time;
        self.identity.signature = collateral_key.sign_message(self.signed_message().as_bytes());
    }

    pub fn verify_signature(&self) -> Result<(), BroadcastError> {
        verify_signed_message(
            &self.identity.collateral_pubkey,
            &self.identity.signature,
            self.signed_message().as_bytes(),
        )
        .map_err(BroadcastError::InvalidSignature)
    }

    /// Checks that need no registry or UTXO state: clock skew, the embedded
    /// ping, protocol floor, keys, signature and port policy.
    pub fn check_basics(&self, now: i64, params: &ChainParams) -> Result<(), BroadcastError> {
        let identity = &self.identity;
        if identity.sig_time > now + MASTERNODE_MAX_CLOCK_SKEW_SECONDS {
            return Err(BroadcastError::FutureSigTime);
        }
        if identity.protocol_version < params.masternode.min_payment_protocol {
            return Err(BroadcastError::ProtocolTooOld {
                version: identity.protocol_version,
            });
        }
        if !is_valid_pubkey(&identity.collateral_pubkey) {
            return Err(BroadcastError::InvalidCollateralPubkey);
        }
        if !is_valid_pubkey(&identity.operator_pubkey) {
            return Err(BroadcastError::InvalidOperatorPubkey);
        }
        self.last_ping
            .check_embedded(&identity.outpoint, &identity.operator_pubkey, now)
            .map_err(BroadcastError::InvalidPing)?;
        self.verify_signature()?;

        let port = identity.addr.port();
        let port_ok = match params.network {
            Network::Mainnet => port == params.default_port,
            Network::Testnet | Network::Regtest => port != params.mainnet_port,
        };
        if !port_ok {
            return Err(BroadcastError::WrongPort { port });
        }
        Ok(())
    }
}

fn key_id_hex(pubkey: &[u8]) -> String {
    let mut id = hash160(pubkey);
    id.reverse();
    bytes_to_hex(&id)
}

impl Encodable for Broadcast {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.identity.consensus_encode(encoder);
        self.last_ping.consensus_encode(encoder);
        encoder.write_i64_le(self.last_dsq);
    }
}

impl Decodable for Broadcast {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            identity: Identity::consensus_decode(decoder)?,
            last_ping: Ping::consensus_decode(decoder)?,
            last_dsq: decoder.read_i64_le()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodld_consensus::constants::PROTOCOL_VERSION;
    use hodld_consensus::chain_params;

    const NOW: i64 = 1_700_000_000;

    fn keys() -> (SigningKey, SigningKey) {
        (
            SigningKey::from_secret([0x11; 32], true).expect("collateral"),
            SigningKey::from_secret([0x22; 32], true).expect("operator"),
        )
    }

    fn sample(port: u16) -> Broadcast {
        let (collateral, operator) = keys();
        Broadcast::create(
            OutPoint::new([7u8; 32], 0),
            NetAddress::parse(&format!("8.8.4.4:{port}"), port).expect("addr"),
            &collateral,
            &operator,
            PROTOCOL_VERSION,
            [3u8; 32],
            NOW,
        )
    }

    #[test]
    fn created_broadcast_passes_basic_checks() {
        let params = chain_params(Network::Mainnet);
        sample(params.default_port)
            .check_basics(NOW, &params)
            .expect("valid");
    }

    #[test]
    fn tampered_address_breaks_signature() {
        let params = chain_params(Network::Mainnet);
        let mut broadcast = sample(params.default_port);
        broadcast.identity.addr = NetAddress::parse("8.8.8.8", params.default_port).expect("addr");
        let err = broadcast.check_basics(NOW, &params).unwrap_err();
        assert!(matches!(err, BroadcastError::InvalidSignature(_)));
        assert_eq!(err.dos(), 100);
    }

    #[test]
    fn port_policy_depends_on_network() {
        let mainnet = chain_params(Network::Mainnet);
        let testnet = chain_params(Network::Testnet);
        assert_eq!(
            sample(9_999).check_basics(NOW, &mainnet),
            Err(BroadcastError::WrongPort { port: 9_999 })
        );
        assert_eq!(
            sample(mainnet.default_port).check_basics(NOW, &testnet),
            Err(BroadcastError::WrongPort {
                port: mainnet.default_port
            })
        );
        assert!(sample(testnet.default_port).check_basics(NOW, &testnet).is_ok());
    }

    #[test]
    fn future_announcement_is_penalized_lightly() {
        let params = chain_params(Network::Mainnet);
        let err = sample(params.default_port)
            .check_basics(NOW - 3_601, &params)
            .unwrap_err();
        assert_eq!(err, BroadcastError::FutureSigTime);
        assert_eq!(err.dos(), 1);
    }

    #[test]
    fn old_protocol_is_rejected_without_penalty() {
        let params = chain_params(Network::Mainnet);
        let mut broadcast = sample(params.default_port);
        broadcast.identity.protocol_version = PROTOCOL_VERSION - 1;
        let err = broadcast.check_basics(NOW, &params).unwrap_err();
        assert_eq!(err.dos(), 0);
    }

    #[test]
    fn record_roundtrip_keeps_identity() {
        let broadcast = sample(8_801);
        let record = Masternode::from_broadcast(&broadcast);
        let again = Broadcast::from_record(&record);
        assert_eq!(again.hash(), broadcast.hash());
        assert_eq!(again.identity, broadcast.identity);
    }
}
