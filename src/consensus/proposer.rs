//! Deterministic proposer selection.
//!
//! Two strategies exist and must never be mixed within a chain: the
//! fixed strategy always picks the lexicographically-first validator,
//! the rotating strategy draws pseudo-randomly from the sorted
//! validator list seeded by the epoch. Both are pure functions, so all
//! honest nodes compute the same proposer without communication.

use crate::types::address_set::AddressSet;
use crate::types::Address;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Proposer selection strategy, fixed at configuration time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum ProposerStrategy {
    /// The lexicographically-first validator proposes every block.
    Fixed,

    /// Deterministic pseudo-random selection seeded by epoch.
    #[default]
    Rotating,
}

/// Computes the proposer for `(validator set, epoch)`.
#[derive(Clone, Copy, Debug)]
pub struct ValidatorManager {
    strategy: ProposerStrategy,
}

impl ValidatorManager {
    pub fn new(strategy: ProposerStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ProposerStrategy {
        self.strategy
    }

    /// The expected proposer, or None for an empty validator set.
    pub fn get_proposer(&self, validators: &AddressSet, epoch: u64) -> Option<Address> {
        if validators.is_empty() {
            return None;
        }
        match self.strategy {
            ProposerStrategy::Fixed => validators.first(),
            ProposerStrategy::Rotating => {
                let sorted = validators.sorted();
                let mut rng = ChaCha8Rng::seed_from_u64(epoch);
                let index = rng.gen_range(0..sorted.len());
                Some(sorted[index])
            }
        }
    }
}
