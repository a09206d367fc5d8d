//! Checkpoint reward computation and coinbase execution.
//!
//! Rewards are deterministic: at every checkpoint the validator and
//! lightning sets as of the checkpoint each accrue a flat per-block
//! SPAY amount for the `CheckpointInterval` blocks since the previous
//! checkpoint. The coinbase transaction must reproduce the computed
//! output set exactly; any deviation invalidates the block.

use crate::errors::CoreError;
use crate::storage::store_view::StoreView;
use crate::types::address_set::AddressSet;
use crate::types::transaction::{CoinbaseTx, TxOutput};
use crate::types::{Address, Coins};
use std::collections::BTreeMap;
use tracing::debug;

/// SPAY wei minted per block for each validator (0.52 SPAY).
pub const VALIDATOR_REWARD_PER_BLOCK_WEI: u128 = 520_000_000_000_000_000;

/// SPAY wei minted per block for each lightning (~0.01484 SPAY).
pub const LIGHTNING_REWARD_PER_BLOCK_WEI: u128 = 14_843_750_000_000_000;

/// A block is a checkpoint iff `height mod interval == 1`.
pub fn is_checkpoint_height(interval: u64, height: u64) -> bool {
    height % interval == 1
}

/// Height of the last checkpoint at or below `height`.
pub fn last_checkpoint_height(interval: u64, height: u64) -> u64 {
    interval * (height / interval) + 1
}

/// Compute the per-address reward set for one checkpoint.
///
/// Registered redistribution rules split each holder's reward before
/// accumulation, so an address appearing as both holder and beneficiary
/// receives one combined output.
pub fn calculate_reward(
    view: &StoreView,
    validators: &AddressSet,
    lightnings: &AddressSet,
    interval: u64,
) -> BTreeMap<Address, Coins> {
    let mut rewards: BTreeMap<Address, Coins> = BTreeMap::new();
    let interval = u128::from(interval);

    let mut grant = |holder: &Address, amount: u128| {
        match view.get_reward_distribution(holder) {
            Some(rule) if rule.split_basis_point > 0 => {
                let (holder_share, beneficiary_share) = rule.split(amount);
                debug!(
                    %holder,
                    beneficiary = %rule.beneficiary,
                    holder_share,
                    beneficiary_share,
                    "applying reward split"
                );
                accrue(&mut rewards, *holder, holder_share);
                accrue(&mut rewards, rule.beneficiary, beneficiary_share);
            }
            _ => accrue(&mut rewards, *holder, amount),
        }
    };

    for validator in validators.iter() {
        grant(validator, VALIDATOR_REWARD_PER_BLOCK_WEI * interval);
    }
    for lightning in lightnings.iter() {
        grant(lightning, LIGHTNING_REWARD_PER_BLOCK_WEI * interval);
    }

    rewards
}

fn accrue(rewards: &mut BTreeMap<Address, Coins>, addr: Address, spay_wei: u128) {
    let entry = rewards.entry(addr).or_insert(Coins::ZERO);
    *entry = entry.plus(Coins::spay(spay_wei));
}

/// Render a reward map as coinbase outputs, sorted by address.
pub fn reward_outputs(rewards: &BTreeMap<Address, Coins>) -> Vec<TxOutput> {
    rewards
        .iter()
        .map(|(addr, coins)| TxOutput {
            address: *addr,
            coins: *coins,
        })
        .collect()
}

/// Sanity-check a coinbase transaction against the expected reward set.
///
/// `view` is the parent state; `validators`/`lightnings` are the sets as
/// of the checkpoint. Non-checkpoint blocks must carry an empty output
/// list.
pub fn sanity_check_coinbase(
    chain_id: &str,
    view: &StoreView,
    tx: &CoinbaseTx,
    validators: &AddressSet,
    lightnings: &AddressSet,
    interval: u64,
    block_height: u64,
) -> Result<(), CoreError> {
    if !validators.has(&tx.proposer) {
        return Err(CoreError::validation(format!(
            "coinbase proposer {} is not a validator",
            tx.proposer
        )));
    }
    if !tx.validate_signature(chain_id) {
        return Err(CoreError::validation("coinbase signature invalid"));
    }
    if view.coinbase_processed() {
        return Err(CoreError::validation(
            "another coinbase transaction has been processed for the current block",
        ));
    }
    if tx.block_height != block_height {
        return Err(CoreError::validation(format!(
            "coinbase height mismatch: tx {} vs block {}",
            tx.block_height, block_height
        )));
    }

    let expected = if is_checkpoint_height(interval, block_height) {
        reward_outputs(&calculate_reward(view, validators, lightnings, interval))
    } else {
        Vec::new()
    };

    if tx.outputs != expected {
        return Err(CoreError::validation(format!(
            "coinbase outputs diverge from the computed reward set ({} vs {} outputs)",
            tx.outputs.len(),
            expected.len()
        )));
    }
    Ok(())
}

/// Apply a coinbase: credit each output and mark the block's coinbase
/// as processed.
pub fn process_coinbase(view: &mut StoreView, tx: &CoinbaseTx) -> Result<(), CoreError> {
    if view.coinbase_processed() {
        return Err(CoreError::validation(
            "another coinbase transaction has been processed for the current block",
        ));
    }
    for output in &tx.outputs {
        let mut account = view.get_or_create_account(&output.address);
        account.balance = account.balance.plus(output.coins);
        view.set_account(&output.address, &account);
    }
    view.set_coinbase_processed(true);
    Ok(())
}
