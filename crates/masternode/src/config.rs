use std::path::PathBuf;
use std::time::Duration;

use hodld_consensus::constants::MASTERNODES_DUMP_SECONDS;

pub const DEFAULT_MAX_SEEN_BROADCASTS: usize = 20_000;
pub const DEFAULT_MAX_SEEN_PINGS: usize = 60_000;
pub const DEFAULT_MAINTENANCE_SECS: u64 = 60;
pub const SNAPSHOT_FILE_NAME: &str = "mncache.dat";

/// Runtime knobs for the registry and its maintenance task.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Hard cap on the seen-broadcast cache; oldest entries go first.
    pub max_seen_broadcasts: usize,
    pub max_seen_pings: usize,
    pub maintenance_interval: Duration,
    pub dump_interval: Duration,
    /// Where the snapshot is written; `None` disables persistence.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_seen_broadcasts: DEFAULT_MAX_SEEN_BROADCASTS,
            max_seen_pings: DEFAULT_MAX_SEEN_PINGS,
            maintenance_interval: Duration::from_secs(DEFAULT_MAINTENANCE_SECS),
            dump_interval: Duration::from_secs(MASTERNODES_DUMP_SECONDS as u64),
            snapshot_path: None,
        }
    }
}

impl RegistryConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: Some(data_dir.into().join(SNAPSHOT_FILE_NAME)),
            ..Self::default()
        }
    }
}
