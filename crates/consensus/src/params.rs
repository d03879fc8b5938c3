//! Network parameter definitions.

use crate::constants::{MASTERNODE_MIN_CONFIRMATIONS, PROTOCOL_VERSION};
use crate::money::{Amount, COIN};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Some(Self::Mainnet),
            "test" | "testnet" => Some(Self::Testnet),
            "regtest" => Some(Self::Regtest),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MasternodeParams {
    /// Exact value a collateral output must carry.
    pub collateral_amount: Amount,
    pub min_confirmations: i32,
    /// Announcements and records below this protocol version are dropped.
    pub min_payment_protocol: i32,
    /// Regtest accepts loopback and private addresses.
    pub allow_local_addresses: bool,
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    pub masternode: MasternodeParams,
    pub message_start: [u8; 4],
    pub default_port: u16,
    /// Port reserved for mainnet masternodes; other networks must not announce it.
    pub mainnet_port: u16,
}

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Mainnet => mainnet_chain_params(),
        Network::Testnet => testnet_chain_params(),
        Network::Regtest => regtest_chain_params(),
    }
}

const MAINNET_PORT: u16 = 8_801;

fn mainnet_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Mainnet,
        masternode: MasternodeParams {
            collateral_amount: 10_000 * COIN,
            min_confirmations: MASTERNODE_MIN_CONFIRMATIONS,
            min_payment_protocol: PROTOCOL_VERSION,
            allow_local_addresses: false,
        },
        message_start: [0xe4, 0xc2, 0xd8, 0xe6],
        default_port: MAINNET_PORT,
        mainnet_port: MAINNET_PORT,
    }
}

fn testnet_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Testnet,
        masternode: MasternodeParams {
            collateral_amount: 10_000 * COIN,
            min_confirmations: MASTERNODE_MIN_CONFIRMATIONS,
            min_payment_protocol: PROTOCOL_VERSION,
            allow_local_addresses: false,
        },
        message_start: [0x45, 0x76, 0x65, 0xba],
        default_port: 18_801,
        mainnet_port: MAINNET_PORT,
    }
}

fn regtest_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Regtest,
        masternode: MasternodeParams {
            collateral_amount: 10_000 * COIN,
            min_confirmations: MASTERNODE_MIN_CONFIRMATIONS,
            min_payment_protocol: PROTOCOL_VERSION,
            allow_local_addresses: true,
        },
        message_start: [0xa1, 0xcf, 0x7e, 0xac],
        default_port: 18_901,
        mainnet_port: MAINNET_PORT,
    }
}
