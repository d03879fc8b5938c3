//! Masternode registry: records, signed gossip, payment ranking and list sync.

pub mod broadcast;
pub mod chain;
pub mod collateral;
pub mod config;
pub mod maintenance;
pub mod manager;
pub mod masternode;
pub mod message;
pub mod net;
pub mod ping;
pub mod snapshot;

pub use broadcast::{Broadcast, BroadcastError};
pub use chain::{ChainView, CollateralCoin};
pub use collateral::{check_collateral, CollateralCheck, CollateralStatus};
pub use config::RegistryConfig;
pub use maintenance::run_maintenance;
pub use manager::{MessageOutcome, NetworkCounts, Registry, RegistryState};
pub use masternode::{Identity, Masternode, MasternodeState};
pub use message::MasternodeMessage;
pub use net::{PeerId, PeerNetwork};
pub use ping::{Ping, PingError};
pub use snapshot::{load_snapshot, save_snapshot, SnapshotError};
