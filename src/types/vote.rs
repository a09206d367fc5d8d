//! Validator votes, vote sets, and commit certificates.

use crate::crypto::{PrivateKey, Signature};
use crate::types::address_set::AddressSet;
use crate::types::block::Block;
use crate::types::{Address, Hash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A vote on a block by a validator.
///
/// The signed payload covers `{block, epoch, id}` only; `height` is a
/// hint for sync and is deliberately excluded from the signature.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    /// Hash of the tip as seen by the voter.
    pub block: Hash,

    /// Height of the tip (unsigned hint).
    pub height: u64,

    /// Voter's current epoch. It does not need to equal the epoch in the
    /// block voted on.
    pub epoch: u64,

    /// Voter's address.
    pub id: Address,

    pub signature: Option<Signature>,
}

/// The canonical signed payload of a vote.
#[derive(Serialize)]
struct VoteSignPayload {
    block: Hash,
    epoch: u64,
    id: Address,
}

impl Vote {
    pub fn new(block: Hash, height: u64, epoch: u64, id: Address) -> Self {
        Self {
            block,
            height,
            epoch,
            id,
            signature: None,
        }
    }

    /// Raw bytes to be signed.
    pub fn sign_bytes(&self) -> Vec<u8> {
        let payload = VoteSignPayload {
            block: self.block,
            epoch: self.epoch,
            id: self.id,
        };
        bincode::serialize(&payload).expect("vote payload serialization cannot fail")
    }

    /// Sign the vote with the given private key.
    pub fn sign(&mut self, key: &PrivateKey) {
        self.signature = Some(key.sign(&self.sign_bytes()));
    }

    /// Check the vote is legitimate: block and voter specified, signature
    /// present and verifying against the voter's address.
    pub fn validate(&self) -> bool {
        if self.block.is_empty() || self.id.is_empty() {
            return false;
        }
        match &self.signature {
            Some(sig) => sig.verify(&self.sign_bytes(), &self.id),
            None => false,
        }
    }
}

/// A keyed collection of votes.
///
/// Keyed by `(voter, block, epoch)`, so re-adding the same vote is a
/// no-op and a voter may appear once per (block, epoch) pair until
/// normalized via [`VoteSet::unique_voter`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VoteSet {
    votes: BTreeMap<(Address, Hash, u64), Vote>,
}

impl VoteSet {
    pub fn new() -> Self {
        Self {
            votes: BTreeMap::new(),
        }
    }

    /// Add a vote. Duplicate votes are ignored.
    pub fn add_vote(&mut self, vote: Vote) {
        self.votes
            .insert((vote.id, vote.block, vote.epoch), vote);
    }

    pub fn size(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// Votes sorted by voter address.
    pub fn votes(&self) -> Vec<Vote> {
        self.votes.values().cloned().collect()
    }

    /// All votes verify individually.
    pub fn validate(&self) -> bool {
        self.votes.values().all(|v| v.validate())
    }

    /// Union of two vote sets.
    pub fn merge(&self, other: &VoteSet) -> VoteSet {
        let mut ret = self.clone();
        for vote in other.votes.values() {
            ret.add_vote(vote.clone());
        }
        ret
    }

    /// Keep only the highest-epoch vote per voter.
    pub fn unique_voter(&self) -> VoteSet {
        let mut latest: BTreeMap<Address, Vote> = BTreeMap::new();
        for vote in self.votes.values() {
            match latest.get(&vote.id) {
                Some(prev) if prev.epoch >= vote.epoch => {}
                _ => {
                    latest.insert(vote.id, vote.clone());
                }
            }
        }
        let mut ret = VoteSet::new();
        for vote in latest.into_values() {
            ret.add_vote(vote);
        }
        ret
    }

    /// Keep only the highest-epoch vote per (voter, block) pair.
    pub fn unique_voter_and_block(&self) -> VoteSet {
        let mut latest: BTreeMap<(Address, Hash), Vote> = BTreeMap::new();
        for vote in self.votes.values() {
            let key = (vote.id, vote.block);
            match latest.get(&key) {
                Some(prev) if prev.epoch >= vote.epoch => {}
                _ => {
                    latest.insert(key, vote.clone());
                }
            }
        }
        let mut ret = VoteSet::new();
        for vote in latest.into_values() {
            ret.add_vote(vote);
        }
        ret
    }

    /// Remove votes from non-validators.
    pub fn filter_by_validators(&self, validators: &AddressSet) -> VoteSet {
        let mut ret = VoteSet::new();
        for vote in self.votes.values() {
            if validators.has(&vote.id) {
                ret.add_vote(vote.clone());
            }
        }
        ret
    }
}

impl Serialize for VoteSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.votes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VoteSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let votes = Vec::<Vote>::deserialize(deserializer)?;
        let mut set = VoteSet::new();
        for vote in votes {
            set.add_vote(vote);
        }
        Ok(set)
    }
}

/// Majority predicate: a vote set carries a majority against a validator
/// set V iff `|votes| * 3 > |V| * 2`. No stake weighting at this layer.
pub fn has_majority(validators: &AddressSet, votes: &VoteSet) -> bool {
    votes.size() * 3 > validators.len() * 2
}

/// A commit made by a majority of validators.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CommitCertificate {
    pub block_hash: Hash,
    pub votes: VoteSet,
}

impl CommitCertificate {
    pub fn new(block_hash: Hash, votes: VoteSet) -> Self {
        Self { block_hash, votes }
    }

    /// Check validity against a validator set:
    /// the vote set is non-empty, every vote targets the certificate's
    /// block, each vote verifies, each voter is a validator, and the
    /// distinct voters form a >2/3 majority.
    pub fn is_valid(&self, validators: &AddressSet) -> bool {
        if self.votes.is_empty() {
            return false;
        }
        let filtered = self.votes.unique_voter();
        // A voter appearing twice would inflate the count.
        if filtered.size() != self.votes.size() {
            return false;
        }
        for vote in filtered.votes() {
            if vote.block != self.block_hash {
                return false;
            }
            if !vote.validate() {
                return false;
            }
            if !validators.has(&vote.id) {
                return false;
            }
        }
        has_majority(validators, &filtered)
    }
}

/// A proposal of a new block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proposal {
    pub block: Block,
    pub proposer_id: Address,
    pub votes: VoteSet,
}
