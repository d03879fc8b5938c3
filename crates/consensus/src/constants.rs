//! Masternode timing and protocol constants shared by the registry and tools.

/// Collateral must have at least this many confirmations before an announcement is accepted.
pub const MASTERNODE_MIN_CONFIRMATIONS: i32 = 15;
/// A masternode must have been announced at least this long before it can become enabled.
pub const MASTERNODE_MIN_MNP_SECONDS: i64 = 10 * 60;
/// Minimum spacing between two accepted announcements for the same collateral.
pub const MASTERNODE_MIN_MNB_SECONDS: i64 = 5 * 60;
/// Ping cadence expected from a running masternode.
pub const MASTERNODE_PING_SECONDS: i64 = 5 * 60;
/// Without a ping for this long the masternode is watchdog-expired.
pub const MASTERNODE_WATCHDOG_MAX_SECONDS: i64 = 60 * 60;
/// Without a ping for this long the masternode is expired.
pub const MASTERNODE_EXPIRATION_SECONDS: i64 = 120 * 60;
/// Without a ping for this long the masternode is marked for removal.
pub const MASTERNODE_REMOVAL_SECONDS: i64 = 130 * 60;
/// Lifecycle checks are skipped when repeated within this window (unless forced).
pub const MASTERNODE_CHECK_SECONDS: i64 = 5;
/// Signed gossip may not be further than this from adjusted time.
pub const MASTERNODE_MAX_CLOCK_SKEW_SECONDS: i64 = 60 * 60;
/// A ping must reference a block at most this many blocks below the tip.
pub const MASTERNODE_PING_MAX_BLOCK_DEPTH: i32 = 24;
/// Scanning errors needed before a masternode is PoSe-banned.
pub const MASTERNODE_POSE_BAN_MAX_SCORE: i32 = 5;
/// Masternodes announced longer ago than this count toward the stable size.
pub const MASTERNODE_MIN_WINNER_AGE_SECONDS: i64 = 8_000;
/// Queue-jump window per enabled masternode when filtering by signature time (2.6 minutes).
pub const MASTERNODE_SIGTIME_FILTER_SECONDS_PER_NODE: i64 = 156;

/// How often the registry snapshot is written.
pub const MASTERNODES_DUMP_SECONDS: i64 = 15 * 60;
/// Cooldown for whole-list requests, both directions.
pub const MASTERNODES_DSEG_SECONDS: i64 = 3 * 60 * 60;

/// Never-paid masternodes report at least this many seconds since payment.
pub const MASTERNODE_UNPAID_FLOOR_SECONDS: i64 = 60 * 60 * 24 * 30;
/// Upper bound of the deterministic last-paid tie-break offset.
pub const MASTERNODE_LAST_PAID_OFFSET_SECONDS: u32 = 150;

/// Sync item id reported with the count of a whole-list answer.
pub const MASTERNODE_SYNC_LIST: i32 = 2;

/// Current network protocol version for P2P messages.
pub const PROTOCOL_VERSION: i32 = 70_920;

/// Message magic used for `SignMessage`/`VerifyMessage` style signatures.
pub const SIGNED_MESSAGE_MAGIC: &str = "DarkNet Signed Message:\n";

/// Magic string at the head of the masternode snapshot file.
pub const MASTERNODE_CACHE_MAGIC: &str = "MasternodeCache";
