#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use hodld_consensus::constants::PROTOCOL_VERSION;
use hodld_consensus::{chain_params, ChainParams, Hash256, Network, COIN};
use hodld_masternode::{
    Broadcast, ChainView, CollateralCoin, MasternodeMessage, PeerId, PeerNetwork, Ping, Registry,
    RegistryConfig,
};
use hodld_primitives::{sha256d, NetAddress, OutPoint};
use hodld_script::keys::SigningKey;
use hodld_script::standard::p2pkh_script_for_pubkey;

pub const T: i64 = 1_700_000_000;
pub const TIP: i32 = 1_000;
pub const BLOCK_SPACING: i64 = 120;

struct ChainInner {
    now: i64,
    blocks: Vec<(Hash256, i64)>,
    coins: HashMap<OutPoint, CollateralCoin>,
    payments: HashMap<Vec<u8>, i64>,
}

/// In-memory chain: block `h` is spaced `BLOCK_SPACING` seconds before the tip.
pub struct MockChain {
    inner: Mutex<ChainInner>,
}

fn block_hash(height: i32) -> Hash256 {
    let mut preimage = b"mock-block".to_vec();
    preimage.extend_from_slice(&height.to_le_bytes());
    sha256d(&preimage)
}

impl MockChain {
    pub fn new(now: i64, tip: i32) -> Arc<Self> {
        let blocks = (0..=tip)
            .map(|height| {
                (
                    block_hash(height),
                    now - i64::from(tip - height) * BLOCK_SPACING,
                )
            })
            .collect();
        Arc::new(Self {
            inner: Mutex::new(ChainInner {
                now,
                blocks,
                coins: HashMap::new(),
                payments: HashMap::new(),
            }),
        })
    }

    pub fn now(&self) -> i64 {
        self.inner.lock().unwrap().now
    }

    pub fn set_time(&self, now: i64) {
        self.inner.lock().unwrap().now = now;
    }

    pub fn advance(&self, seconds: i64) {
        self.inner.lock().unwrap().now += seconds;
    }

    /// Appends `count` blocks stamped with the current time.
    pub fn mine(&self, count: i32) {
        let mut inner = self.inner.lock().unwrap();
        for _ in 0..count {
            let height = inner.blocks.len() as i32;
            let now = inner.now;
            inner.blocks.push((block_hash(height), now));
        }
    }

    pub fn tip_hash(&self) -> Hash256 {
        let inner = self.inner.lock().unwrap();
        inner.blocks[inner.blocks.len() - 1].0
    }

    pub fn hash_at(&self, height: i32) -> Hash256 {
        block_hash(height)
    }

    pub fn add_coin(&self, outpoint: OutPoint, value: i64, height: i32, script_pubkey: Vec<u8>) {
        self.inner.lock().unwrap().coins.insert(
            outpoint,
            CollateralCoin {
                value,
                height,
                script_pubkey,
            },
        );
    }

    pub fn spend(&self, outpoint: &OutPoint) {
        self.inner.lock().unwrap().coins.remove(outpoint);
    }

    pub fn set_last_payment(&self, payee_script: Vec<u8>, time: i64) {
        self.inner
            .lock()
            .unwrap()
            .payments
            .insert(payee_script, time);
    }
}

impl ChainView for MockChain {
    fn collateral_coin(&self, outpoint: &OutPoint) -> Option<CollateralCoin> {
        self.inner.lock().unwrap().coins.get(outpoint).cloned()
    }

    fn tip_height(&self) -> i32 {
        self.inner.lock().unwrap().blocks.len() as i32 - 1
    }

    fn block_hash_at(&self, height: i32) -> Option<Hash256> {
        let inner = self.inner.lock().unwrap();
        usize::try_from(height)
            .ok()
            .and_then(|height| inner.blocks.get(height))
            .map(|(hash, _)| *hash)
    }

    fn block_height(&self, hash: &Hash256) -> Option<i32> {
        let inner = self.inner.lock().unwrap();
        inner
            .blocks
            .iter()
            .position(|(candidate, _)| candidate == hash)
            .map(|height| height as i32)
    }

    fn block_time_at(&self, height: i32) -> Option<i64> {
        let inner = self.inner.lock().unwrap();
        usize::try_from(height)
            .ok()
            .and_then(|height| inner.blocks.get(height))
            .map(|(_, time)| *time)
    }

    fn adjusted_time(&self) -> i64 {
        self.now()
    }

    fn last_payment_time(&self, payee_script: &[u8]) -> Option<i64> {
        self.inner
            .lock()
            .unwrap()
            .payments
            .get(payee_script)
            .copied()
    }
}

#[derive(Default)]
pub struct RecordingNetwork {
    relayed: Mutex<Vec<MasternodeMessage>>,
    sent: Mutex<Vec<(PeerId, MasternodeMessage)>>,
    misbehavior: Mutex<Vec<(PeerId, i32)>>,
}

impl RecordingNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn relayed(&self) -> Vec<MasternodeMessage> {
        self.relayed.lock().unwrap().clone()
    }

    pub fn sent_to(&self, peer: &PeerId) -> Vec<MasternodeMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == peer)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn misbehavior_of(&self, peer: &PeerId) -> i32 {
        self.misbehavior
            .lock()
            .unwrap()
            .iter()
            .filter(|(from, _)| from == peer)
            .map(|(_, score)| *score)
            .sum()
    }

    pub fn clear(&self) {
        self.relayed.lock().unwrap().clear();
        self.sent.lock().unwrap().clear();
        self.misbehavior.lock().unwrap().clear();
    }
}

impl PeerNetwork for RecordingNetwork {
    fn relay(&self, message: &MasternodeMessage) {
        self.relayed.lock().unwrap().push(message.clone());
    }

    fn send(&self, peer: &PeerId, message: MasternodeMessage) {
        self.sent.lock().unwrap().push((*peer, message));
    }

    fn misbehaving(&self, peer: &PeerId, score: i32) {
        self.misbehavior.lock().unwrap().push((*peer, score));
    }
}

/// Keys, collateral and service address of one test masternode.
pub struct Operator {
    pub collateral: SigningKey,
    pub operator: SigningKey,
    pub outpoint: OutPoint,
    pub addr: NetAddress,
}

impl Operator {
    pub fn new(seed: u8, port: u16) -> Self {
        Self {
            collateral: SigningKey::from_secret([seed; 32], true).unwrap(),
            operator: SigningKey::from_secret([seed.wrapping_add(100); 32], true).unwrap(),
            outpoint: OutPoint::new([seed; 32], u32::from(seed % 3)),
            addr: NetAddress::parse(&format!("5.{seed}.0.1:{port}"), port).unwrap(),
        }
    }

    pub fn with_addr(mut self, raw: &str) -> Self {
        self.addr = NetAddress::parse(raw, 0).unwrap();
        self
    }

    pub fn payee_script(&self) -> Vec<u8> {
        p2pkh_script_for_pubkey(self.collateral.pubkey_bytes())
    }

    /// Funds the collateral at `height` with the network's collateral amount.
    pub fn fund(&self, chain: &MockChain, height: i32) {
        chain.add_coin(
            self.outpoint.clone(),
            10_000 * COIN,
            height,
            self.payee_script(),
        );
    }

    pub fn announce(&self, chain: &MockChain, sig_time: i64) -> Broadcast {
        Broadcast::create(
            self.outpoint.clone(),
            self.addr,
            &self.collateral,
            &self.operator,
            PROTOCOL_VERSION,
            chain.tip_hash(),
            sig_time,
        )
    }

    pub fn ping(&self, chain: &MockChain, sig_time: i64) -> Ping {
        let mut ping = Ping::new(self.outpoint.clone(), chain.tip_hash(), sig_time);
        ping.sign(&self.operator, sig_time);
        ping
    }
}

pub fn peer(raw: &str) -> PeerId {
    raw.parse::<SocketAddr>().unwrap()
}

pub struct Harness {
    pub params: Arc<ChainParams>,
    pub chain: Arc<MockChain>,
    pub network: Arc<RecordingNetwork>,
    pub registry: Arc<Registry>,
}

impl Harness {
    pub fn new(network: Network) -> Self {
        Self::with_config(network, RegistryConfig::default())
    }

    pub fn with_config(network: Network, config: RegistryConfig) -> Self {
        let params = Arc::new(chain_params(network));
        let chain = MockChain::new(T, TIP);
        let transport = RecordingNetwork::new();
        let registry = Arc::new(Registry::new(
            params.clone(),
            config,
            chain.clone(),
            transport.clone(),
        ));
        Self {
            params,
            chain,
            network: transport,
            registry,
        }
    }

    pub fn operator(&self, seed: u8) -> Operator {
        let operator = Operator::new(seed, self.params.default_port);
        operator.fund(&self.chain, TIP - 100);
        operator
    }

    /// Announces at the current time and pings 600 seconds later, leaving the
    /// record enabled.
    pub fn enable(&self, operators: &[&Operator], from: &PeerId) {
        let start = self.chain.now();
        for operator in operators {
            let broadcast = operator.announce(&self.chain, start);
            self.registry
                .handle_message(from, MasternodeMessage::Announce(broadcast));
        }
        self.chain.set_time(start + 600);
        for operator in operators {
            let ping = operator.ping(&self.chain, start + 600);
            self.registry.handle_message(from, MasternodeMessage::Ping(ping));
        }
    }
}
