//! Collateral existence and amount checks.

use hodld_consensus::MasternodeParams;
use hodld_primitives::OutPoint;

use crate::chain::{ChainView, CollateralCoin};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CollateralStatus {
    Ok,
    UtxoNotFound,
    InvalidAmount,
}

impl CollateralStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::UtxoNotFound => "utxo not found",
            Self::InvalidAmount => "invalid collateral amount",
        }
    }
}

#[derive(Clone, Debug)]
pub struct CollateralCheck {
    pub status: CollateralStatus,
    pub coin: Option<CollateralCoin>,
}

impl CollateralCheck {
    pub fn is_ok(&self) -> bool {
        self.status == CollateralStatus::Ok
    }

    /// Height of the block that confirmed the collateral.
    pub fn height(&self) -> Option<i32> {
        self.coin.as_ref().map(|coin| coin.height)
    }
}

/// Only meaningful against the chain tip the caller is looking at; collateral
/// can be spent at any block.
pub fn check_collateral<C: ChainView + ?Sized>(
    chain: &C,
    params: &MasternodeParams,
    outpoint: &OutPoint,
) -> CollateralCheck {
    let Some(coin) = chain.collateral_coin(outpoint) else {
        return CollateralCheck {
            status: CollateralStatus::UtxoNotFound,
            coin: None,
        };
    };
    let status = if coin.value == params.collateral_amount {
        CollateralStatus::Ok
    } else {
        CollateralStatus::InvalidAmount
    };
    CollateralCheck {
        status,
        coin: Some(coin),
    }
}
