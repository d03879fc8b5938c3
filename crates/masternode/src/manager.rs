//! The masternode registry: record set, gossip de-duplication, payment
//! ranking and list synchronization.
//!
//! All state lives behind one mutex. Gossip handling additionally holds the
//! processing lock so two copies of the same message cannot both be accepted
//! as first. Outbound traffic is collected while the state lock is held and
//! handed to the [`PeerNetwork`] after it is released.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hodld_consensus::constants::{
    MASTERNODES_DSEG_SECONDS, MASTERNODE_MIN_MNB_SECONDS, MASTERNODE_MIN_MNP_SECONDS,
    MASTERNODE_MIN_WINNER_AGE_SECONDS, MASTERNODE_PING_MAX_BLOCK_DEPTH, MASTERNODE_PING_SECONDS,
    MASTERNODE_REMOVAL_SECONDS, MASTERNODE_SIGTIME_FILTER_SECONDS_PER_NODE, MASTERNODE_SYNC_LIST,
};
use hodld_consensus::{ChainParams, Hash256, Network};
use hodld_log::{log_debug, log_info, log_trace, log_warn};
use hodld_primitives::{NetAddress, OutPoint};
use primitive_types::U256;
use rand::seq::SliceRandom;

use crate::broadcast::{Broadcast, BroadcastError};
use crate::chain::ChainView;
use crate::collateral::{check_collateral, CollateralStatus};
use crate::config::RegistryConfig;
use crate::masternode::{Masternode, MasternodeState};
use crate::message::MasternodeMessage;
use crate::net::{PeerId, PeerNetwork};
use crate::ping::{Ping, PingError};
use crate::snapshot::{load_snapshot, save_snapshot, SnapshotError};

/// Everything the registry persists between runs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryState {
    pub records: BTreeMap<OutPoint, Masternode>,
    /// Peer IP -> time after which it may request the whole list again.
    pub asked_us: BTreeMap<IpAddr, i64>,
    /// Peer IP -> time after which we may request its whole list again.
    pub we_asked: BTreeMap<IpAddr, i64>,
    /// (collateral, peer IP) -> time after which we may ask for that entry again.
    pub we_asked_entry: BTreeMap<(OutPoint, IpAddr), i64>,
    pub seen_broadcasts: BTreeMap<Hash256, Broadcast>,
    pub seen_pings: BTreeMap<Hash256, Ping>,
    /// Mixing-queue sequence counter.
    pub dsq_count: i64,
}

impl RegistryState {
    pub fn count_state(&self, state: MasternodeState) -> usize {
        self.records
            .values()
            .filter(|record| record.state == state)
            .count()
    }
}

/// What happened to an inbound gossip message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageOutcome {
    Accepted { relayed: bool },
    /// Already in the seen cache; nothing changed.
    Duplicate,
    Rejected { misbehavior: i32 },
    /// A list request answered with `count` announcements.
    Served { count: usize },
    Ignored,
}

impl MessageOutcome {
    pub fn relayed(&self) -> bool {
        matches!(self, MessageOutcome::Accepted { relayed: true })
    }

    pub fn misbehavior(&self) -> i32 {
        match self {
            MessageOutcome::Rejected { misbehavior } => *misbehavior,
            _ => 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NetworkCounts {
    pub ipv4: usize,
    pub ipv6: usize,
}

enum Outbound {
    Relay(MasternodeMessage),
    Send(PeerId, MasternodeMessage),
    Misbehaving(PeerId, i32),
}

#[derive(Default)]
struct Outbox {
    items: Vec<Outbound>,
}

impl Outbox {
    fn relay(&mut self, message: MasternodeMessage) {
        self.items.push(Outbound::Relay(message));
    }

    fn send(&mut self, peer: PeerId, message: MasternodeMessage) {
        self.items.push(Outbound::Send(peer, message));
    }

    fn misbehaving(&mut self, peer: PeerId, score: i32) {
        self.items.push(Outbound::Misbehaving(peer, score));
    }
}

pub struct Registry {
    params: Arc<ChainParams>,
    config: RegistryConfig,
    chain: Arc<dyn ChainView>,
    network: Arc<dyn PeerNetwork>,
    state: Mutex<RegistryState>,
    processing: Mutex<()>,
}

impl Registry {
    pub fn new(
        params: Arc<ChainParams>,
        config: RegistryConfig,
        chain: Arc<dyn ChainView>,
        network: Arc<dyn PeerNetwork>,
    ) -> Self {
        Self {
            params,
            config,
            chain,
            network,
            state: Mutex::new(RegistryState::default()),
            processing: Mutex::new(()),
        }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // Every mutation replaces whole values, so a poisoned guard still holds
    // a consistent state.
    fn lock_state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_processing(&self) -> MutexGuard<'_, ()> {
        self.processing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> i64 {
        self.chain.adjusted_time()
    }

    fn min_protocol(&self, requested: Option<i32>) -> i32 {
        requested.unwrap_or(self.params.masternode.min_payment_protocol)
    }

    fn flush(&self, outbox: Outbox) {
        for item in outbox.items {
            match item {
                Outbound::Relay(message) => self.network.relay(&message),
                Outbound::Send(peer, message) => self.network.send(&peer, message),
                Outbound::Misbehaving(peer, score) => self.network.misbehaving(&peer, score),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock_state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().records.is_empty()
    }

    /// Inserts a record whose collateral is not yet known. Records with an
    /// address unfit for a public service are refused.
    pub fn add(&self, record: Masternode) -> bool {
        let mut state = self.lock_state();
        self.add_locked(&mut state, record)
    }

    fn add_locked(&self, state: &mut RegistryState, record: Masternode) -> bool {
        if !record.is_valid_net_addr(&self.params.masternode) {
            log_debug!(
                "Refusing masternode {} with unroutable address {}",
                record.outpoint(),
                record.identity.addr
            );
            return false;
        }
        if state.records.contains_key(record.outpoint()) {
            return false;
        }
        log_info!(
            "Adding masternode {} at {} ({} known)",
            record.outpoint(),
            record.identity.addr,
            state.records.len() + 1
        );
        state.records.insert(record.outpoint().clone(), record);
        true
    }

    pub fn remove(&self, outpoint: &OutPoint) -> bool {
        let removed = self.lock_state().records.remove(outpoint);
        if let Some(record) = &removed {
            log_info!("Removed masternode {} ({})", outpoint, record.status());
        }
        removed.is_some()
    }

    pub fn clear(&self) {
        *self.lock_state() = RegistryState::default();
    }

    pub fn find(&self, outpoint: &OutPoint) -> Option<Masternode> {
        self.lock_state().records.get(outpoint).cloned()
    }

    pub fn find_by_operator_pubkey(&self, pubkey: &[u8]) -> Option<Masternode> {
        self.lock_state()
            .records
            .values()
            .find(|record| record.identity.operator_pubkey == pubkey)
            .cloned()
    }

    pub fn find_by_payee(&self, script_pubkey: &[u8]) -> Option<Masternode> {
        self.lock_state()
            .records
            .values()
            .find(|record| record.identity.payee_script() == script_pubkey)
            .cloned()
    }

    fn refresh_locked(&self, state: &mut RegistryState, force: bool) {
        let chain = self.chain.as_ref();
        for record in state.records.values_mut() {
            *record = record.check(chain, &self.params.masternode, force);
        }
    }

    /// Runs the lifecycle check on every record.
    pub fn check_all(&self) {
        let mut state = self.lock_state();
        self.refresh_locked(&mut state, false);
    }

    /// Checks every record, drops the ones that reached a terminal state and
    /// ages out gossip and cooldown bookkeeping. With `force_expired`,
    /// expired and failed records go too. Returns how many records were removed.
    pub fn check_and_remove(&self, force_expired: bool) -> usize {
        let now = self.now();
        let min_protocol = self.params.masternode.min_payment_protocol;
        let mut state = self.lock_state();
        self.refresh_locked(&mut state, false);

        let doomed: Vec<OutPoint> = state
            .records
            .values()
            .filter(|record| {
                record.state.is_terminal()
                    || (force_expired
                        && matches!(
                            record.state,
                            MasternodeState::Expired | MasternodeState::PosError
                        ))
                    || record.identity.protocol_version < min_protocol
            })
            .map(|record| record.outpoint().clone())
            .collect();

        for outpoint in &doomed {
            if let Some(record) = state.records.remove(outpoint) {
                log_info!("Removing masternode {} ({})", outpoint, record.status());
            }
            // Lets the node come back from a later ping without a fresh announcement.
            state
                .seen_broadcasts
                .retain(|_, broadcast| broadcast.outpoint() != outpoint);
            state
                .we_asked_entry
                .retain(|(entry, _), _| entry != outpoint);
        }

        state.asked_us.retain(|_, until| *until >= now);
        state.we_asked.retain(|_, until| *until >= now);
        state.we_asked_entry.retain(|_, until| *until >= now);

        let horizon = now - 2 * MASTERNODE_REMOVAL_SECONDS;
        state
            .seen_broadcasts
            .retain(|_, broadcast| broadcast.last_ping.sig_time >= horizon);
        state.seen_pings.retain(|_, ping| ping.sig_time >= horizon);
        self.enforce_seen_caps(&mut state);

        doomed.len()
    }

    fn remember_broadcast(&self, state: &mut RegistryState, broadcast: &Broadcast) {
        state
            .seen_broadcasts
            .insert(broadcast.hash(), broadcast.clone());
        if state.seen_broadcasts.len() > self.config.max_seen_broadcasts {
            self.enforce_seen_caps(state);
        }
    }

    fn remember_ping(&self, state: &mut RegistryState, ping: &Ping) {
        state.seen_pings.insert(ping.hash(), ping.clone());
        if state.seen_pings.len() > self.config.max_seen_pings {
            self.enforce_seen_caps(state);
        }
    }

    // Evicts oldest entries down to 90% of each cap.
    fn enforce_seen_caps(&self, state: &mut RegistryState) {
        let cap = self.config.max_seen_broadcasts;
        if state.seen_broadcasts.len() > cap {
            let keep = cap - cap / 10;
            let mut by_age: Vec<(i64, Hash256)> = state
                .seen_broadcasts
                .iter()
                .map(|(hash, broadcast)| (broadcast.last_ping.sig_time, *hash))
                .collect();
            by_age.sort_unstable();
            let excess = by_age.len().saturating_sub(keep);
            for (_, hash) in by_age.into_iter().take(excess) {
                state.seen_broadcasts.remove(&hash);
            }
        }

        let cap = self.config.max_seen_pings;
        if state.seen_pings.len() > cap {
            let keep = cap - cap / 10;
            let mut by_age: Vec<(i64, Hash256)> = state
                .seen_pings
                .iter()
                .map(|(hash, ping)| (ping.sig_time, *hash))
                .collect();
            by_age.sort_unstable();
            let excess = by_age.len().saturating_sub(keep);
            for (_, hash) in by_age.into_iter().take(excess) {
                state.seen_pings.remove(&hash);
            }
        }
    }

    pub fn count_enabled(&self, min_protocol: Option<i32>) -> usize {
        let min_protocol = self.min_protocol(min_protocol);
        let mut state = self.lock_state();
        self.refresh_locked(&mut state, false);
        count_enabled_locked(&state, min_protocol)
    }

    pub fn count_networks(&self, min_protocol: Option<i32>) -> NetworkCounts {
        let min_protocol = self.min_protocol(min_protocol);
        let mut state = self.lock_state();
        self.refresh_locked(&mut state, false);
        let mut counts = NetworkCounts::default();
        for record in state.records.values() {
            if record.identity.protocol_version < min_protocol {
                continue;
            }
            if record.identity.addr.is_ipv4() {
                counts.ipv4 += 1;
            } else {
                counts.ipv6 += 1;
            }
        }
        counts
    }

    /// Enabled records announced long enough ago to count as settled.
    pub fn stable_size(&self) -> usize {
        let now = self.now();
        let min_protocol = self.params.masternode.min_payment_protocol;
        let mut state = self.lock_state();
        self.refresh_locked(&mut state, false);
        state
            .records
            .values()
            .filter(|record| {
                record.identity.protocol_version >= min_protocol
                    && now - record.sig_time() >= MASTERNODE_MIN_WINNER_AGE_SECONDS
                    && record.is_enabled()
            })
            .count()
    }

    /// Checked copy of every record.
    pub fn full_list(&self) -> Vec<Masternode> {
        let mut state = self.lock_state();
        self.refresh_locked(&mut state, false);
        state.records.values().cloned().collect()
    }

    fn checked_snapshot(&self, min_protocol: i32, only_enabled: bool) -> Vec<Masternode> {
        let mut state = self.lock_state();
        self.refresh_locked(&mut state, false);
        state
            .records
            .values()
            .filter(|record| {
                record.identity.protocol_version >= min_protocol
                    && (!only_enabled || record.is_enabled())
            })
            .cloned()
            .collect()
    }

    /// Picks the payee for the block at `height`: among enabled records with
    /// enough collateral age, the one waiting longest since its last payment,
    /// ties broken by score. Also returns how many candidates were considered.
    pub fn get_next_masternode_in_queue_for_payment(
        &self,
        height: i32,
        filter_sig_time: bool,
    ) -> (Option<Masternode>, usize) {
        let min_protocol = self.params.masternode.min_payment_protocol;
        let (records, enabled) = {
            let mut state = self.lock_state();
            self.refresh_locked(&mut state, false);
            let enabled = count_enabled_locked(&state, min_protocol);
            (state.records.values().cloned().collect::<Vec<_>>(), enabled)
        };
        self.select_payee(records, height, filter_sig_time, enabled)
    }

    fn select_payee(
        &self,
        mut records: Vec<Masternode>,
        height: i32,
        filter_sig_time: bool,
        enabled: usize,
    ) -> (Option<Masternode>, usize) {
        let chain = self.chain.as_ref();
        let now = self.now();
        let params = &self.params.masternode;
        let enabled_i32 = i32::try_from(enabled).unwrap_or(i32::MAX);
        let min_age = params.min_confirmations.max(enabled_i32);
        let jump_window = i64::from(enabled_i32) * MASTERNODE_SIGTIME_FILTER_SECONDS_PER_NODE;

        let mut candidates = Vec::new();
        for record in records.iter_mut() {
            if !record.is_enabled() || record.identity.protocol_version < params.min_payment_protocol
            {
                continue;
            }
            if filter_sig_time && record.sig_time() + jump_window > now {
                continue;
            }
            if record.input_age(chain) < min_age {
                continue;
            }
            candidates.push(record.clone());
        }

        let count = candidates.len();
        if filter_sig_time && count < enabled / 3 {
            return self.select_payee(records, height, false, enabled);
        }

        let winner = candidates
            .into_iter()
            .map(|record| {
                (
                    record.seconds_since_payment(chain),
                    record.calculate_score(chain, 1, height),
                    record,
                )
            })
            .max_by(|a, b| {
                a.0.cmp(&b.0)
                    .then_with(|| a.1.cmp(&b.1))
                    .then_with(|| b.2.outpoint().cmp(a.2.outpoint()))
            })
            .map(|(_, _, record)| record);
        (winner, count)
    }

    fn ranked(&self, height: i32, min_protocol: i32, only_enabled: bool) -> Vec<(U256, Masternode)> {
        let chain = self.chain.as_ref();
        let mut scored: Vec<(U256, Masternode)> = self
            .checked_snapshot(min_protocol, only_enabled)
            .into_iter()
            .map(|record| (record.calculate_score(chain, 1, height), record))
            .collect();
        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| a.1.outpoint().cmp(b.1.outpoint()))
        });
        scored
    }

    /// Enabled records by descending score at `height`, ranks starting at 1.
    pub fn get_masternode_ranks(&self, height: i32, min_protocol: i32) -> Vec<(usize, Masternode)> {
        self.ranked(height, min_protocol, true)
            .into_iter()
            .enumerate()
            .map(|(index, (_, record))| (index + 1, record))
            .collect()
    }

    pub fn get_masternode_rank(
        &self,
        outpoint: &OutPoint,
        height: i32,
        min_protocol: i32,
        only_enabled: bool,
    ) -> Option<usize> {
        self.ranked(height, min_protocol, only_enabled)
            .iter()
            .position(|(_, record)| record.outpoint() == outpoint)
            .map(|index| index + 1)
    }

    pub fn get_masternode_by_rank(
        &self,
        rank: usize,
        height: i32,
        min_protocol: i32,
        only_enabled: bool,
    ) -> Option<Masternode> {
        let index = rank.checked_sub(1)?;
        self.ranked(height, min_protocol, only_enabled)
            .into_iter()
            .nth(index)
            .map(|(_, record)| record)
    }

    /// Highest `calculate_score(modulus, height)` among enabled records.
    pub fn get_current_masternode(
        &self,
        modulus: i32,
        height: i32,
        min_protocol: i32,
    ) -> Option<Masternode> {
        let chain = self.chain.as_ref();
        self.checked_snapshot(min_protocol, true)
            .into_iter()
            .map(|record| (record.calculate_score(chain, modulus, height), record))
            .max_by(|a, b| {
                a.0.cmp(&b.0)
                    .then_with(|| b.1.outpoint().cmp(a.1.outpoint()))
            })
            .map(|(_, record)| record)
    }

    pub fn find_random_not_in(
        &self,
        exclude: &[OutPoint],
        min_protocol: Option<i32>,
    ) -> Option<Masternode> {
        let candidates: Vec<Masternode> = self
            .checked_snapshot(self.min_protocol(min_protocol), true)
            .into_iter()
            .filter(|record| !exclude.contains(record.outpoint()))
            .collect();
        candidates.choose(&mut rand::thread_rng()).cloned()
    }

    /// Registers a mixing-queue event for `outpoint`. Refused when the node
    /// queued again before a fifth of the enabled set had their turn.
    pub fn record_queue_event(&self, outpoint: &OutPoint) -> bool {
        let min_protocol = self.params.masternode.min_payment_protocol;
        let mut state = self.lock_state();
        let enabled = count_enabled_locked(&state, min_protocol) as i64;
        let Some(record) = state.records.get(outpoint) else {
            return false;
        };
        if record.last_dsq != 0 && record.last_dsq + enabled / 5 > state.dsq_count {
            log_debug!("Masternode {outpoint} is sending queue events too quickly");
            return false;
        }
        let next = state.dsq_count + 1;
        let mut updated = record.clone();
        updated.last_dsq = next;
        state.dsq_count = next;
        state.records.insert(outpoint.clone(), updated);
        true
    }

    /// Counts a proof-of-service scanning error, at most one per block.
    pub fn report_scanning_error(&self, outpoint: &OutPoint, height: i32) -> bool {
        let mut state = self.lock_state();
        let Some(record) = state.records.get(outpoint) else {
            return false;
        };
        if record.scanning_error_count > 0 && record.last_scanning_error_height == height {
            return false;
        }
        let mut updated = record.clone();
        updated.scanning_error_count += 1;
        updated.last_scanning_error_height = height;
        let updated = updated.check(self.chain.as_ref(), &self.params.masternode, true);
        if updated.state == MasternodeState::PoseBan && record.state != MasternodeState::PoseBan {
            log_info!(
                "Masternode {outpoint} banned after {} scanning errors",
                updated.scanning_error_count
            );
        }
        state.records.insert(outpoint.clone(), updated);
        true
    }

    /// Requests the whole list from `peer`, once per cooldown on mainnet.
    pub fn dseg_update(&self, peer: &PeerId) -> bool {
        let now = self.now();
        {
            let mut state = self.lock_state();
            let ip = peer.ip();
            if self.params.network == Network::Mainnet && !is_private_peer(peer) {
                if let Some(until) = state.we_asked.get(&ip) {
                    if now < *until {
                        log_debug!("Already asked {peer} for the masternode list; skipping");
                        return false;
                    }
                }
            }
            state.we_asked.insert(ip, now + MASTERNODES_DSEG_SECONDS);
        }
        self.network
            .send(peer, MasternodeMessage::ListRequest(OutPoint::null()));
        true
    }

    /// Asks `peer` for the announcement of a masternode we only saw pings for.
    pub fn ask_for_mn(&self, peer: &PeerId, outpoint: &OutPoint) -> bool {
        let mut outbox = Outbox::default();
        let asked = {
            let mut state = self.lock_state();
            self.ask_for_mn_locked(&mut state, peer, outpoint, &mut outbox)
        };
        self.flush(outbox);
        asked
    }

    fn ask_for_mn_locked(
        &self,
        state: &mut RegistryState,
        peer: &PeerId,
        outpoint: &OutPoint,
        outbox: &mut Outbox,
    ) -> bool {
        let now = self.now();
        let key = (outpoint.clone(), peer.ip());
        if let Some(until) = state.we_asked_entry.get(&key) {
            if now < *until {
                return false;
            }
        }
        log_debug!("Asking {peer} for masternode entry {outpoint}");
        outbox.send(*peer, MasternodeMessage::ListRequest(outpoint.clone()));
        state
            .we_asked_entry
            .insert(key, now + MASTERNODE_MIN_MNP_SECONDS);
        true
    }

    /// Applies an announcement that has already been validated (or was built
    /// locally): inserts or updates the record, remembers the announcement
    /// and its ping, and relays it. Returns whether the registry changed.
    pub fn update_masternode_list(&self, broadcast: Broadcast) -> bool {
        let _processing = self.lock_processing();
        let mut outbox = Outbox::default();
        let applied = {
            let mut state = self.lock_state();
            match self.apply_broadcast(&mut state, &broadcast, false, &mut outbox) {
                Ok(_) => true,
                Err(err) => {
                    log_debug!("Masternode list update for {} refused: {err}", broadcast.outpoint());
                    false
                }
            }
        };
        self.flush(outbox);
        applied
    }

    /// Entry point for raw gossip from the transport.
    pub fn process_message(&self, peer: &PeerId, command: &str, payload: &[u8]) -> MessageOutcome {
        match MasternodeMessage::decode(command, payload) {
            Ok(Some(message)) => self.handle_message(peer, message),
            Ok(None) => MessageOutcome::Ignored,
            Err(err) => {
                log_debug!("Malformed {command} from {peer}: {err}");
                MessageOutcome::Rejected { misbehavior: 0 }
            }
        }
    }

    pub fn handle_message(&self, peer: &PeerId, message: MasternodeMessage) -> MessageOutcome {
        let _processing = self.lock_processing();
        let mut outbox = Outbox::default();
        let outcome = {
            let mut state = self.lock_state();
            match message {
                MasternodeMessage::Announce(broadcast) => {
                    self.process_broadcast(&mut state, peer, broadcast, &mut outbox)
                }
                MasternodeMessage::Ping(ping) => {
                    self.process_ping(&mut state, peer, ping, &mut outbox)
                }
                MasternodeMessage::ListRequest(outpoint) => {
                    self.process_list_request(&mut state, peer, &outpoint, &mut outbox)
                }
                MasternodeMessage::SyncStatusCount { item, count } => {
                    log_debug!("Peer {peer} reports {count} items for sync stage {item}");
                    MessageOutcome::Ignored
                }
            }
        };
        self.flush(outbox);
        outcome
    }

    fn process_broadcast(
        &self,
        state: &mut RegistryState,
        peer: &PeerId,
        broadcast: Broadcast,
        outbox: &mut Outbox,
    ) -> MessageOutcome {
        let hash = broadcast.hash();
        if state.seen_broadcasts.contains_key(&hash) {
            log_trace!("Already seen announcement for {}", broadcast.outpoint());
            return MessageOutcome::Duplicate;
        }
        self.remember_broadcast(state, &broadcast);

        match self.check_and_update_broadcast(state, &broadcast, outbox) {
            Ok(relayed) => MessageOutcome::Accepted { relayed },
            Err(err) => {
                let dos = err.dos();
                // The hash does not cover the signature, so a forged copy
                // must not shadow the genuine announcement.
                if err.retry_later() || dos > 0 {
                    state.seen_broadcasts.remove(&hash);
                }
                if dos > 0 {
                    log_warn!(
                        "Announcement for {} from {peer} rejected (misbehavior {dos}): {err}",
                        broadcast.outpoint()
                    );
                    outbox.misbehaving(*peer, dos);
                } else {
                    log_debug!("Announcement for {} rejected: {err}", broadcast.outpoint());
                }
                MessageOutcome::Rejected { misbehavior: dos }
            }
        }
    }

    fn check_and_update_broadcast(
        &self,
        state: &mut RegistryState,
        broadcast: &Broadcast,
        outbox: &mut Outbox,
    ) -> Result<bool, BroadcastError> {
        let now = self.now();
        broadcast.check_basics(now, &self.params)?;

        if let Some(existing) = state.records.get(broadcast.outpoint()) {
            if existing.sig_time() >= broadcast.sig_time() {
                return Err(BroadcastError::Replay);
            }
            if existing.state == MasternodeState::PoseBan {
                return Err(BroadcastError::Banned);
            }
            if existing.is_enabled()
                && existing.identity.collateral_pubkey == broadcast.identity.collateral_pubkey
            {
                if existing.is_broadcasted_within(MASTERNODE_MIN_MNB_SECONDS, now) {
                    return Err(BroadcastError::TooFrequent);
                }
                return self.apply_broadcast(state, broadcast, false, outbox);
            }
        }

        self.check_inputs(broadcast)?;
        self.apply_broadcast(state, broadcast, true, outbox)
    }

    fn check_inputs(&self, broadcast: &Broadcast) -> Result<(), BroadcastError> {
        let chain = self.chain.as_ref();
        let params = &self.params.masternode;
        let check = check_collateral(chain, params, broadcast.outpoint());
        if !check.is_ok() {
            return Err(BroadcastError::Collateral(check.status));
        }
        let coin = check
            .coin
            .ok_or(BroadcastError::Collateral(CollateralStatus::UtxoNotFound))?;
        if coin.script_pubkey != broadcast.identity.payee_script() {
            return Err(BroadcastError::CollateralNotOwned);
        }
        let confirmations = chain.tip_height() - coin.height + 1;
        if confirmations < params.min_confirmations {
            return Err(BroadcastError::Immature { confirmations });
        }
        if let Some(matured_at) = chain.block_time_at(coin.height + params.min_confirmations - 1) {
            if matured_at > broadcast.sig_time() {
                return Err(BroadcastError::SigTimeBeforeCollateral);
            }
        }
        Ok(())
    }

    /// Inserts or updates the record for `broadcast`. With `replace`, an
    /// existing record is swapped for a fresh one that keeps its penalties.
    /// Nothing changes when the announcement is refused.
    fn apply_broadcast(
        &self,
        state: &mut RegistryState,
        broadcast: &Broadcast,
        replace: bool,
        outbox: &mut Outbox,
    ) -> Result<bool, BroadcastError> {
        let chain = self.chain.as_ref();
        let params = &self.params.masternode;
        let outpoint = broadcast.outpoint().clone();
        let relayed = match state.records.get(&outpoint).cloned() {
            Some(existing) if !replace => {
                let updated = existing
                    .updated_from_broadcast(broadcast)
                    .ok_or(BroadcastError::Replay)?
                    .check(chain, params, true);
                log_info!(
                    "Updated masternode {outpoint} from new announcement ({})",
                    updated.status()
                );
                let relayed = updated.is_enabled();
                state.records.insert(outpoint, updated);
                relayed
            }
            Some(existing) => {
                let replacement = Masternode::replacing(&existing, broadcast);
                if !replacement.is_valid_net_addr(params) {
                    return Err(BroadcastError::InvalidAddress);
                }
                log_info!(
                    "Replacing {} masternode {outpoint} with announcement for {}",
                    existing.status(),
                    broadcast.identity.addr
                );
                state.records.insert(outpoint, replacement);
                !self.is_local_service(&broadcast.identity.addr)
            }
            None => {
                if !self.add_locked(state, Masternode::from_broadcast(broadcast)) {
                    return Err(BroadcastError::InvalidAddress);
                }
                !self.is_local_service(&broadcast.identity.addr)
            }
        };
        self.remember_ping(state, &broadcast.last_ping);
        self.remember_broadcast(state, broadcast);
        if relayed {
            outbox.relay(MasternodeMessage::Announce(broadcast.clone()));
        }
        Ok(relayed)
    }

    fn is_local_service(&self, addr: &NetAddress) -> bool {
        !self.params.masternode.allow_local_addresses && (addr.is_rfc1918() || addr.is_local())
    }

    fn process_ping(
        &self,
        state: &mut RegistryState,
        peer: &PeerId,
        ping: Ping,
        outbox: &mut Outbox,
    ) -> MessageOutcome {
        if state.seen_pings.contains_key(&ping.hash()) {
            return MessageOutcome::Duplicate;
        }

        match self.check_and_update_ping(state, &ping, true, outbox) {
            Ok(relayed) => MessageOutcome::Accepted { relayed },
            Err(err) => {
                let dos = err.dos();
                if dos > 0 {
                    log_warn!(
                        "Ping for {} from {peer} rejected (misbehavior {dos}): {err}",
                        ping.outpoint
                    );
                    outbox.misbehaving(*peer, dos);
                } else {
                    log_debug!("Ping for {} dropped: {err}", ping.outpoint);
                    if state.records.contains_key(&ping.outpoint) {
                        return MessageOutcome::Rejected { misbehavior: 0 };
                    }
                }
                self.ask_for_mn_locked(state, peer, &ping.outpoint, outbox);
                MessageOutcome::Rejected { misbehavior: dos }
            }
        }
    }

    fn check_and_update_ping(
        &self,
        state: &mut RegistryState,
        ping: &Ping,
        require_enabled: bool,
        outbox: &mut Outbox,
    ) -> Result<bool, PingError> {
        let chain = self.chain.as_ref();
        let params = &self.params.masternode;
        ping.check_sig_time(self.now())?;

        let record = state
            .records
            .get(&ping.outpoint)
            .ok_or(PingError::UnknownMasternode)?;
        if record.identity.protocol_version < params.min_payment_protocol {
            return Err(PingError::ProtocolTooOld);
        }
        if require_enabled && !record.state.is_active() {
            return Err(PingError::NotEnabled);
        }
        if ping.sig_time <= record.last_ping.sig_time {
            return Err(PingError::Replay);
        }
        if ping.sig_time - record.last_ping.sig_time < MASTERNODE_PING_SECONDS - 60 {
            return Err(PingError::TooEarly);
        }
        ping.verify_signature(&record.identity.operator_pubkey)?;

        let height = chain
            .block_height(&ping.block_hash)
            .ok_or(PingError::UnknownBlock)?;
        if height < chain.tip_height() - MASTERNODE_PING_MAX_BLOCK_DEPTH {
            return Err(PingError::StaleBlock { height });
        }

        let announce_hash = record.identity.announce_hash();
        let updated = record
            .with_ping(ping.clone())
            .check(chain, params, true);
        if let Some(seen) = state.seen_broadcasts.get_mut(&announce_hash) {
            seen.last_ping = ping.clone();
        }
        let relayed = updated.state.is_active();
        log_debug!(
            "Ping accepted for masternode {} ({})",
            ping.outpoint,
            updated.status()
        );
        state.records.insert(ping.outpoint.clone(), updated);
        self.remember_ping(state, ping);
        if relayed {
            outbox.relay(MasternodeMessage::Ping(ping.clone()));
        }
        Ok(relayed)
    }

    fn process_list_request(
        &self,
        state: &mut RegistryState,
        peer: &PeerId,
        outpoint: &OutPoint,
        outbox: &mut Outbox,
    ) -> MessageOutcome {
        let whole_list = outpoint.is_null();
        if whole_list && self.params.network == Network::Mainnet && !is_private_peer(peer) {
            let now = self.now();
            let ip = peer.ip();
            if let Some(until) = state.asked_us.get(&ip) {
                if now < *until {
                    log_warn!("Peer {peer} already asked for the masternode list");
                    outbox.misbehaving(*peer, 34);
                    return MessageOutcome::Rejected { misbehavior: 34 };
                }
            }
            state.asked_us.insert(ip, now + MASTERNODES_DSEG_SECONDS);
        }

        let answers: Vec<Broadcast> = state
            .records
            .values()
            .filter(|record| !record.identity.addr.is_rfc1918() && record.is_enabled())
            .filter(|record| whole_list || record.outpoint() == outpoint)
            .map(Broadcast::from_record)
            .collect();

        let mut sent = 0usize;
        for broadcast in answers {
            let hash = broadcast.hash();
            if !state.seen_broadcasts.contains_key(&hash) {
                self.remember_broadcast(state, &broadcast);
            }
            outbox.send(*peer, MasternodeMessage::Announce(broadcast));
            sent += 1;
            if !whole_list {
                break;
            }
        }

        if whole_list {
            outbox.send(
                *peer,
                MasternodeMessage::SyncStatusCount {
                    item: MASTERNODE_SYNC_LIST,
                    count: i32::try_from(sent).unwrap_or(i32::MAX),
                },
            );
            log_debug!("Sent {sent} masternode entries to {peer}");
        }
        MessageOutcome::Served { count: sent }
    }

    pub fn export_state(&self) -> RegistryState {
        self.lock_state().clone()
    }

    pub fn import_state(&self, state: RegistryState) {
        *self.lock_state() = state;
    }

    /// Writes the snapshot to the configured path. Returns false when
    /// persistence is disabled.
    pub fn dump(&self) -> Result<bool, SnapshotError> {
        let Some(path) = self.config.snapshot_path.as_ref() else {
            return Ok(false);
        };
        let state = self.export_state();
        save_snapshot(path, &self.params, &state)?;
        log_debug!(
            "Wrote masternode snapshot with {} records to {}",
            state.records.len(),
            path.display()
        );
        Ok(true)
    }

    /// Loads the snapshot from the configured path, if one exists.
    pub fn restore(&self) -> Result<bool, SnapshotError> {
        let Some(path) = self.config.snapshot_path.as_ref() else {
            return Ok(false);
        };
        let Some(state) = load_snapshot(path, &self.params)? else {
            return Ok(false);
        };
        log_info!(
            "Loaded {} masternodes from {}",
            state.records.len(),
            path.display()
        );
        self.import_state(state);
        Ok(true)
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        write!(
            f,
            "Masternodes: {}, peers who asked us for Masternode list: {}, peers we asked for Masternode list: {}, entries in Masternode list we asked for: {}, nDsqCount: {}",
            state.records.len(),
            state.asked_us.len(),
            state.we_asked.len(),
            state.we_asked_entry.len(),
            state.dsq_count
        )
    }
}

fn count_enabled_locked(state: &RegistryState, min_protocol: i32) -> usize {
    state
        .records
        .values()
        .filter(|record| record.is_enabled() && record.identity.protocol_version >= min_protocol)
        .count()
}

fn is_private_peer(peer: &PeerId) -> bool {
    let addr = NetAddress::from(*peer);
    addr.is_rfc1918() || addr.is_local()
}
