//! Per-masternode record, lifecycle state machine and payment scoring.

use hodld_consensus::constants::{
    MASTERNODE_CHECK_SECONDS, MASTERNODE_EXPIRATION_SECONDS, MASTERNODE_LAST_PAID_OFFSET_SECONDS,
    MASTERNODE_MIN_MNP_SECONDS, MASTERNODE_POSE_BAN_MAX_SCORE, MASTERNODE_REMOVAL_SECONDS,
    MASTERNODE_UNPAID_FLOOR_SECONDS, MASTERNODE_WATCHDOG_MAX_SECONDS,
};
use hodld_consensus::{Hash256, MasternodeParams};
use hodld_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use hodld_primitives::uint::{hash_to_u256, u256_to_compact, u256_to_hash};
use hodld_primitives::{sha256d, NetAddress, OutPoint};
use hodld_script::message::is_valid_pubkey;
use hodld_script::standard::p2pkh_script_for_pubkey;
use primitive_types::U256;

use crate::broadcast::Broadcast;
use crate::chain::ChainView;
use crate::collateral::{check_collateral, CollateralStatus};
use crate::ping::{identity_hash, Ping};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MasternodeState {
    PreEnabled,
    Enabled,
    Expired,
    OutpointSpent,
    Remove,
    WatchdogExpired,
    PoseBan,
    VinSpent,
    PosError,
}

impl MasternodeState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreEnabled => "PRE_ENABLED",
            Self::Enabled => "ENABLED",
            Self::Expired => "EXPIRED",
            Self::OutpointSpent => "OUTPOINT_SPENT",
            Self::Remove => "REMOVE",
            Self::WatchdogExpired => "WATCHDOG_EXPIRED",
            Self::PoseBan => "POSE_BAN",
            Self::VinSpent => "VIN_SPENT",
            Self::PosError => "POS_ERROR",
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::PreEnabled => 0,
            Self::Enabled => 1,
            Self::Expired => 2,
            Self::OutpointSpent => 3,
            Self::Remove => 4,
            Self::WatchdogExpired => 5,
            Self::PoseBan => 6,
            Self::VinSpent => 7,
            Self::PosError => 8,
        }
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::PreEnabled,
            1 => Self::Enabled,
            2 => Self::Expired,
            3 => Self::OutpointSpent,
            4 => Self::Remove,
            5 => Self::WatchdogExpired,
            6 => Self::PoseBan,
            7 => Self::VinSpent,
            8 => Self::PosError,
            _ => return None,
        })
    }

    /// States in which pings are still accepted.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::PreEnabled | Self::Enabled | Self::WatchdogExpired
        )
    }

    /// Swept from the registry on the next maintenance pass.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Remove | Self::OutpointSpent | Self::VinSpent)
    }

    fn is_absorbing(self) -> bool {
        matches!(self, Self::OutpointSpent | Self::VinSpent | Self::PosError)
    }
}

/// Fields fixed by a signed announcement, shared by [`Broadcast`] and [`Masternode`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Identity {
    pub outpoint: OutPoint,
    pub addr: NetAddress,
    pub collateral_pubkey: Vec<u8>,
    pub operator_pubkey: Vec<u8>,
    pub signature: Vec<u8>,
    pub sig_time: i64,
    pub protocol_version: i32,
}

impl Identity {
    /// Hash of (outpoint, announce time); keys the seen-broadcast cache.
    pub fn announce_hash(&self) -> Hash256 {
        identity_hash(&self.outpoint, self.sig_time)
    }

    /// Script that receives this masternode's payments.
    pub fn payee_script(&self) -> Vec<u8> {
        p2pkh_script_for_pubkey(&self.collateral_pubkey)
    }
}

impl Encodable for Identity {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.outpoint.consensus_encode(encoder);
        self.addr.consensus_encode(encoder);
        encoder.write_var_bytes(&self.collateral_pubkey);
        encoder.write_var_bytes(&self.operator_pubkey);
        encoder.write_var_bytes(&self.signature);
        encoder.write_i64_le(self.sig_time);
        encoder.write_i32_le(self.protocol_version);
    }
}

impl Decodable for Identity {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            outpoint: OutPoint::consensus_decode(decoder)?,
            addr: NetAddress::consensus_decode(decoder)?,
            collateral_pubkey: decoder.read_var_bytes()?,
            operator_pubkey: decoder.read_var_bytes()?,
            signature: decoder.read_var_bytes()?,
            sig_time: decoder.read_i64_le()?,
            protocol_version: decoder.read_i32_le()?,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Masternode {
    pub identity: Identity,
    pub state: MasternodeState,
    pub last_ping: Ping,
    /// Collateral confirmations observed at `cache_input_age_block`.
    pub cache_input_age: i32,
    pub cache_input_age_block: i32,
    /// Mixing-queue sequence of this node's last accepted queue event.
    pub last_dsq: i64,
    pub scanning_error_count: i32,
    pub last_scanning_error_height: i32,
    pub last_checked: i64,
}

impl Masternode {
    /// New record for a freshly accepted announcement. The queue sequence a
    /// broadcast carries is not trusted.
    pub fn from_broadcast(broadcast: &Broadcast) -> Self {
        Self {
            identity: broadcast.identity.clone(),
            state: MasternodeState::PreEnabled,
            last_ping: broadcast.last_ping.clone(),
            cache_input_age: 0,
            cache_input_age_block: 0,
            last_dsq: 0,
            scanning_error_count: 0,
            last_scanning_error_height: 0,
            last_checked: 0,
        }
    }

    pub fn outpoint(&self) -> &OutPoint {
        &self.identity.outpoint
    }

    pub fn sig_time(&self) -> i64 {
        self.identity.sig_time
    }

    pub fn is_enabled(&self) -> bool {
        self.state == MasternodeState::Enabled
    }

    pub fn status(&self) -> &'static str {
        self.state.as_str()
    }

    pub fn is_pinged_within(&self, seconds: i64, now: i64) -> bool {
        !self.last_ping.is_empty() && now - self.last_ping.sig_time < seconds
    }

    pub fn is_broadcasted_within(&self, seconds: i64, now: i64) -> bool {
        now - self.identity.sig_time < seconds
    }

    /// Address is acceptable for a public service on this network.
    pub fn is_valid_net_addr(&self, params: &MasternodeParams) -> bool {
        params.allow_local_addresses || self.identity.addr.is_routable()
    }

    /// Fresh record for a re-announced collateral. The queue sequence and
    /// scanning errors of `previous` carry over, as does its ping when newer.
    pub fn replacing(previous: &Masternode, broadcast: &Broadcast) -> Self {
        let mut next = Self::from_broadcast(broadcast);
        next.last_dsq = previous.last_dsq;
        next.scanning_error_count = previous.scanning_error_count;
        next.last_scanning_error_height = previous.last_scanning_error_height;
        if previous.last_ping.sig_time > next.last_ping.sig_time {
            next.last_ping = previous.last_ping.clone();
        }
        next
    }

    /// Record updated from a strictly newer announcement. Caches, the queue
    /// sequence and scanning errors carry over. The embedded ping only
    /// replaces an older one.
    pub fn updated_from_broadcast(&self, broadcast: &Broadcast) -> Option<Self> {
        if broadcast.identity.sig_time <= self.identity.sig_time {
            return None;
        }
        let mut next = self.clone();
        next.identity = broadcast.identity.clone();
        if broadcast.last_ping.sig_time > self.last_ping.sig_time {
            next.last_ping = broadcast.last_ping.clone();
        }
        next.last_checked = 0;
        Some(next)
    }

    pub fn with_ping(&self, ping: Ping) -> Self {
        let mut next = self.clone();
        next.last_ping = ping;
        next
    }

    /// Collateral confirmations, cached and advanced with the tip.
    pub fn input_age<C: ChainView + ?Sized>(&mut self, chain: &C) -> i32 {
        let tip = chain.tip_height();
        if tip < 0 {
            return 0;
        }
        if self.cache_input_age == 0 {
            self.cache_input_age = chain.confirmations(&self.identity.outpoint);
            self.cache_input_age_block = tip;
        }
        self.cache_input_age + (tip - self.cache_input_age_block)
    }

    /// Re-evaluates the lifecycle state from current chain facts and returns
    /// the updated record. Skipped within `MASTERNODE_CHECK_SECONDS` of the
    /// previous evaluation unless `force` is set.
    pub fn check<C: ChainView + ?Sized>(
        &self,
        chain: &C,
        params: &MasternodeParams,
        force: bool,
    ) -> Self {
        let mut next = self.clone();
        if self.state.is_absorbing() {
            return next;
        }
        let now = chain.adjusted_time();
        if !force && now - self.last_checked < MASTERNODE_CHECK_SECONDS {
            return next;
        }
        next.last_checked = now;
        next.state = next.evaluate(chain, params, now);
        next
    }

    fn evaluate<C: ChainView + ?Sized>(
        &mut self,
        chain: &C,
        params: &MasternodeParams,
        now: i64,
    ) -> MasternodeState {
        if !is_valid_pubkey(&self.identity.operator_pubkey)
            || !is_valid_pubkey(&self.identity.collateral_pubkey)
            || self.last_ping.outpoint != self.identity.outpoint
        {
            return MasternodeState::PosError;
        }

        match check_collateral(chain, params, &self.identity.outpoint).status {
            CollateralStatus::Ok => {}
            CollateralStatus::UtxoNotFound => return MasternodeState::OutpointSpent,
            CollateralStatus::InvalidAmount => return MasternodeState::VinSpent,
        }

        if self.scanning_error_count >= MASTERNODE_POSE_BAN_MAX_SCORE {
            return MasternodeState::PoseBan;
        }
        if !self.is_pinged_within(MASTERNODE_REMOVAL_SECONDS, now) {
            return MasternodeState::Remove;
        }
        if !self.is_pinged_within(MASTERNODE_EXPIRATION_SECONDS, now) {
            return MasternodeState::Expired;
        }
        if !self.is_pinged_within(MASTERNODE_WATCHDOG_MAX_SECONDS, now) {
            return MasternodeState::WatchdogExpired;
        }
        if self.last_ping.sig_time - self.identity.sig_time < MASTERNODE_MIN_MNP_SECONDS
            || self.input_age(chain) < params.min_confirmations
        {
            return MasternodeState::PreEnabled;
        }
        MasternodeState::Enabled
    }

    /// Deterministic score against the block at `height` rounded down to a
    /// multiple of `modulus`: |sha256d(block || txid + index) - sha256d(block)|.
    /// Zero when the anchor block is unknown.
    pub fn calculate_score<C: ChainView + ?Sized>(
        &self,
        chain: &C,
        modulus: i32,
        height: i32,
    ) -> U256 {
        score_outpoint(chain, &self.identity.outpoint, modulus, height)
    }

    /// sha256d(outpoint || announce time), used for the last-paid tie-break.
    pub fn identity_hash(&self) -> Hash256 {
        self.identity.announce_hash()
    }

    /// Seconds added to the last payment time so equal payment blocks still order.
    pub fn last_paid_offset(&self) -> i64 {
        let compact = u256_to_compact(hash_to_u256(&self.identity_hash()));
        i64::from(compact % MASTERNODE_LAST_PAID_OFFSET_SECONDS)
    }

    /// Time of the last payment plus the tie-break offset, or zero if never paid.
    pub fn last_paid<C: ChainView + ?Sized>(&self, chain: &C) -> i64 {
        match chain.last_payment_time(&self.identity.payee_script()) {
            Some(time) => time + self.last_paid_offset(),
            None => 0,
        }
    }

    /// Primary payment-queue key: larger means waited longer.
    pub fn seconds_since_payment<C: ChainView + ?Sized>(&self, chain: &C) -> i64 {
        let seconds = chain.adjusted_time() - self.last_paid(chain);
        if seconds < MASTERNODE_UNPAID_FLOOR_SECONDS {
            return seconds;
        }
        let compact = u256_to_compact(hash_to_u256(&self.identity_hash()));
        MASTERNODE_UNPAID_FLOOR_SECONDS + i64::from(compact)
    }
}

pub(crate) fn score_outpoint<C: ChainView + ?Sized>(
    chain: &C,
    outpoint: &OutPoint,
    modulus: i32,
    height: i32,
) -> U256 {
    let modulus = modulus.max(1);
    let anchor = height - height.rem_euclid(modulus);
    let Some(block_hash) = chain.block_hash_at(anchor) else {
        return U256::zero();
    };
    let (aux, _) = hash_to_u256(&outpoint.hash).overflowing_add(U256::from(outpoint.index));

    let mut preimage = Vec::with_capacity(64);
    preimage.extend_from_slice(&block_hash);
    preimage.extend_from_slice(&u256_to_hash(aux));

    let base = hash_to_u256(&sha256d(&block_hash));
    let mixed = hash_to_u256(&sha256d(&preimage));
    if mixed > base {
        mixed - base
    } else {
        base - mixed
    }
}

impl Encodable for Masternode {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.identity.consensus_encode(encoder);
        encoder.write_u8(self.state.as_u8());
        self.last_ping.consensus_encode(encoder);
        encoder.write_i32_le(self.cache_input_age);
        encoder.write_i32_le(self.cache_input_age_block);
        encoder.write_i64_le(self.last_dsq);
        encoder.write_i32_le(self.scanning_error_count);
        encoder.write_i32_le(self.last_scanning_error_height);
        encoder.write_i64_le(self.last_checked);
    }
}

impl Decodable for Masternode {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let identity = Identity::consensus_decode(decoder)?;
        let state = MasternodeState::from_u8(decoder.read_u8()?)
            .ok_or(DecodeError::InvalidData("invalid masternode state"))?;
        Ok(Self {
            identity,
            state,
            last_ping: Ping::consensus_decode(decoder)?,
            cache_input_age: decoder.read_i32_le()?,
            cache_input_age_block: decoder.read_i32_le()?,
            last_dsq: decoder.read_i64_le()?,
            scanning_error_count: decoder.read_i32_le()?,
            last_scanning_error_height: decoder.read_i32_le()?,
            last_checked: decoder.read_i64_le()?,
        })
    }
}
