//! Stake records and reward-redistribution rules.

use crate::types::{Address, Coins};
use serde::{Deserialize, Serialize};

/// Maximum allowed reward split: 10.00% in basis points.
pub const MAX_SPLIT_BASIS_POINT: u16 = 1000;

/// One locked stake deposit.
///
/// `source` locked the funds; `holder` is the validator/lightning/edge
/// node the stake is delegated to.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Stake {
    pub source: Address,
    pub holder: Address,

    /// SCPT wei locked.
    pub amount: u128,

    pub withdrawn: bool,

    /// Height at which a withdrawn stake is returned to the source.
    pub return_height: u64,
}

impl Stake {
    pub fn new(source: Address, holder: Address, amount: u128) -> Self {
        Self {
            source,
            holder,
            amount,
            withdrawn: false,
            return_height: u64::MAX,
        }
    }
}

/// A holder's registered reward split.
///
/// When a reward is issued to `holder`, `floor(reward * split_basis_point
/// / 10000)` goes to `beneficiary` and the remainder to the holder.
/// A zero basis point is equivalent to no rule.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RewardDistribution {
    pub holder: Address,
    pub beneficiary: Address,
    pub split_basis_point: u16,
}

impl RewardDistribution {
    /// Apply the split to a SPAY reward; returns (holder share, beneficiary share).
    pub fn split(&self, reward: u128) -> (u128, u128) {
        let beneficiary_share = reward * u128::from(self.split_basis_point) / 10_000;
        (reward - beneficiary_share, beneficiary_share)
    }
}

/// A reward output destined for one account.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RewardOutput {
    pub address: Address,
    pub coins: Coins,
}
