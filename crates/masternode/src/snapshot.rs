//! On-disk registry snapshot.
//!
//! Layout: `var_str(magic) || message_start || payload || sha256d(preceding bytes)`.
//! The file is rewritten atomically through a temporary sibling.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::net::{IpAddr, Ipv6Addr};
use std::path::Path;

use hodld_consensus::constants::MASTERNODE_CACHE_MAGIC;
use hodld_consensus::{ChainParams, Hash256};
use hodld_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use hodld_primitives::{sha256d, OutPoint};

use crate::broadcast::Broadcast;
use crate::manager::RegistryState;
use crate::masternode::Masternode;
use crate::ping::Ping;

#[derive(Debug)]
pub enum SnapshotError {
    Io(std::io::Error),
    FileTooShort,
    ChecksumMismatch,
    BadMagic,
    WrongNetwork,
    Decode(DecodeError),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Io(err) => write!(f, "{err}"),
            SnapshotError::FileTooShort => write!(f, "snapshot file is truncated"),
            SnapshotError::ChecksumMismatch => write!(f, "snapshot checksum mismatch"),
            SnapshotError::BadMagic => write!(f, "not a masternode snapshot"),
            SnapshotError::WrongNetwork => write!(f, "snapshot belongs to a different network"),
            SnapshotError::Decode(err) => write!(f, "invalid snapshot payload: {err}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

impl From<std::io::Error> for SnapshotError {
    fn from(err: std::io::Error) -> Self {
        SnapshotError::Io(err)
    }
}

impl From<DecodeError> for SnapshotError {
    fn from(err: DecodeError) -> Self {
        SnapshotError::Decode(err)
    }
}

pub fn encode_snapshot(params: &ChainParams, state: &RegistryState) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.write_var_str(MASTERNODE_CACHE_MAGIC);
    encoder.write_bytes(&params.message_start);
    state.consensus_encode(&mut encoder);
    let checksum = sha256d(encoder.as_slice());
    encoder.write_bytes(&checksum);
    encoder.into_inner()
}

pub fn decode_snapshot(params: &ChainParams, bytes: &[u8]) -> Result<RegistryState, SnapshotError> {
    if bytes.len() < 32 {
        return Err(SnapshotError::FileTooShort);
    }
    let (body, checksum) = bytes.split_at(bytes.len() - 32);
    if sha256d(body).as_slice() != checksum {
        return Err(SnapshotError::ChecksumMismatch);
    }

    let mut decoder = Decoder::new(body);
    let magic = decoder.read_var_str().map_err(|_| SnapshotError::BadMagic)?;
    if magic != MASTERNODE_CACHE_MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let message_start = decoder
        .read_fixed::<4>()
        .map_err(|_| SnapshotError::FileTooShort)?;
    if message_start != params.message_start {
        return Err(SnapshotError::WrongNetwork);
    }
    let state = RegistryState::consensus_decode(&mut decoder)?;
    if !decoder.is_empty() {
        return Err(SnapshotError::Decode(DecodeError::TrailingBytes));
    }
    Ok(state)
}

/// Reads the snapshot at `path`. A missing file is not an error.
pub fn load_snapshot(
    path: &Path,
    params: &ChainParams,
) -> Result<Option<RegistryState>, SnapshotError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    decode_snapshot(params, &bytes).map(Some)
}

pub fn save_snapshot(
    path: &Path,
    params: &ChainParams,
    state: &RegistryState,
) -> Result<(), SnapshotError> {
    write_file_atomic(path, &encode_snapshot(params, state))?;
    Ok(())
}

fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    if fs::rename(&tmp, path).is_err() {
        let _ = fs::remove_file(path);
        fs::rename(&tmp, path)?;
    }
    Ok(())
}

fn write_ip(encoder: &mut Encoder, ip: &IpAddr) {
    let octets = match ip {
        IpAddr::V4(ip) => ip.to_ipv6_mapped().octets(),
        IpAddr::V6(ip) => ip.octets(),
    };
    encoder.write_bytes(&octets);
}

fn read_ip(decoder: &mut Decoder) -> Result<IpAddr, DecodeError> {
    let ip = Ipv6Addr::from(decoder.read_fixed::<16>()?);
    Ok(match ip.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(ip),
    })
}

fn read_count(decoder: &mut Decoder) -> Result<u64, DecodeError> {
    let count = decoder.read_varint()?;
    if count > decoder.remaining() as u64 {
        return Err(DecodeError::UnexpectedEof);
    }
    Ok(count)
}

impl Encodable for RegistryState {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(self.records.len() as u64);
        for record in self.records.values() {
            record.consensus_encode(encoder);
        }

        for cooldowns in [&self.asked_us, &self.we_asked] {
            encoder.write_varint(cooldowns.len() as u64);
            for (ip, until) in cooldowns {
                write_ip(encoder, ip);
                encoder.write_i64_le(*until);
            }
        }

        encoder.write_varint(self.we_asked_entry.len() as u64);
        for ((outpoint, ip), until) in &self.we_asked_entry {
            outpoint.consensus_encode(encoder);
            write_ip(encoder, ip);
            encoder.write_i64_le(*until);
        }

        encoder.write_varint(self.seen_broadcasts.len() as u64);
        for (hash, broadcast) in &self.seen_broadcasts {
            encoder.write_hash_le(hash);
            broadcast.consensus_encode(encoder);
        }

        encoder.write_varint(self.seen_pings.len() as u64);
        for (hash, ping) in &self.seen_pings {
            encoder.write_hash_le(hash);
            ping.consensus_encode(encoder);
        }

        encoder.write_i64_le(self.dsq_count);
    }
}

fn read_cooldowns(decoder: &mut Decoder) -> Result<BTreeMap<IpAddr, i64>, DecodeError> {
    let mut cooldowns = BTreeMap::new();
    for _ in 0..read_count(decoder)? {
        let ip = read_ip(decoder)?;
        cooldowns.insert(ip, decoder.read_i64_le()?);
    }
    Ok(cooldowns)
}

impl Decodable for RegistryState {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let mut records = BTreeMap::new();
        for _ in 0..read_count(decoder)? {
            let record = Masternode::consensus_decode(decoder)?;
            records.insert(record.outpoint().clone(), record);
        }

        let asked_us = read_cooldowns(decoder)?;
        let we_asked = read_cooldowns(decoder)?;

        let mut we_asked_entry = BTreeMap::new();
        for _ in 0..read_count(decoder)? {
            let outpoint = OutPoint::consensus_decode(decoder)?;
            let ip = read_ip(decoder)?;
            we_asked_entry.insert((outpoint, ip), decoder.read_i64_le()?);
        }

        let mut seen_broadcasts: BTreeMap<Hash256, Broadcast> = BTreeMap::new();
        for _ in 0..read_count(decoder)? {
            let hash = decoder.read_hash_le()?;
            seen_broadcasts.insert(hash, Broadcast::consensus_decode(decoder)?);
        }

        let mut seen_pings: BTreeMap<Hash256, Ping> = BTreeMap::new();
        for _ in 0..read_count(decoder)? {
            let hash = decoder.read_hash_le()?;
            seen_pings.insert(hash, Ping::consensus_decode(decoder)?);
        }

        Ok(Self {
            records,
            asked_us,
            we_asked,
            we_asked_entry,
            seen_broadcasts,
            seen_pings,
            dsq_count: decoder.read_i64_le()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodld_consensus::{chain_params, Network};
    use std::net::Ipv4Addr;

    fn sample_state() -> RegistryState {
        let mut state = RegistryState::default();
        state
            .asked_us
            .insert(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 1_700_010_800);
        state
            .we_asked
            .insert("2a01:4f8::1".parse().expect("ip"), 1_700_000_600);
        state.we_asked_entry.insert(
            (OutPoint::new([3u8; 32], 1), IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))),
            1_700_000_600,
        );
        let ping = Ping::new(OutPoint::new([3u8; 32], 1), [9u8; 32], 1_700_000_000);
        state.seen_pings.insert(ping.hash(), ping);
        state.dsq_count = 42;
        state
    }

    #[test]
    fn empty_state_layout() {
        let params = chain_params(Network::Mainnet);
        let bytes = encode_snapshot(&params, &RegistryState::default());
        assert_eq!(bytes[0] as usize, MASTERNODE_CACHE_MAGIC.len());
        assert_eq!(&bytes[1..16], MASTERNODE_CACHE_MAGIC.as_bytes());
        assert_eq!(&bytes[16..20], &params.message_start);
        let decoded = decode_snapshot(&params, &bytes).expect("decode");
        assert_eq!(decoded, RegistryState::default());
    }

    #[test]
    fn cooldowns_and_caches_survive() {
        let params = chain_params(Network::Testnet);
        let state = sample_state();
        let decoded =
            decode_snapshot(&params, &encode_snapshot(&params, &state)).expect("decode");
        assert_eq!(decoded, state);
    }

    #[test]
    fn foreign_network_is_rejected() {
        let bytes = encode_snapshot(&chain_params(Network::Testnet), &sample_state());
        assert!(matches!(
            decode_snapshot(&chain_params(Network::Mainnet), &bytes),
            Err(SnapshotError::WrongNetwork)
        ));
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let params = chain_params(Network::Mainnet);
        let mut bytes = encode_snapshot(&params, &sample_state());
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0x01;
        assert!(matches!(
            decode_snapshot(&params, &bytes),
            Err(SnapshotError::ChecksumMismatch)
        ));
        assert!(matches!(
            decode_snapshot(&params, &bytes[..10]),
            Err(SnapshotError::FileTooShort)
        ));
    }
}
