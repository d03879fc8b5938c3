//! Read-only chain queries the registry depends on.

use hodld_consensus::{Amount, Hash256};
use hodld_primitives::OutPoint;

/// An unspent output offered as masternode collateral.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CollateralCoin {
    pub value: Amount,
    /// Height of the block that created the output.
    pub height: i32,
    pub script_pubkey: Vec<u8>,
}

/// Chain tip, UTXO and clock view.
///
/// Implementations answer from in-memory indexes: the registry calls these
/// while holding its state lock.
pub trait ChainView: Send + Sync {
    /// The coin at `outpoint` if it exists and is unspent.
    fn collateral_coin(&self, outpoint: &OutPoint) -> Option<CollateralCoin>;

    fn tip_height(&self) -> i32;

    fn block_hash_at(&self, height: i32) -> Option<Hash256>;

    /// Height of a block on the active chain.
    fn block_height(&self, hash: &Hash256) -> Option<i32>;

    fn block_time_at(&self, height: i32) -> Option<i64>;

    /// Network-adjusted unix time in seconds.
    fn adjusted_time(&self) -> i64;

    /// Block time of the most recent masternode payment to `payee_script`.
    fn last_payment_time(&self, _payee_script: &[u8]) -> Option<i64> {
        None
    }

    /// Confirmations of an unspent output, zero when spent or unknown.
    fn confirmations(&self, outpoint: &OutPoint) -> i32 {
        match self.collateral_coin(outpoint) {
            Some(coin) => (self.tip_height() - coin.height + 1).max(0),
            None => 0,
        }
    }
}
