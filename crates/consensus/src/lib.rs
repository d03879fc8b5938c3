//! Consensus constants, network parameters, and money units.

pub mod constants;
pub mod money;
pub mod params;

pub use money::{Amount, COIN};
pub use params::{chain_params, ChainParams, MasternodeParams, Network};

pub type Hash256 = [u8; 32];
