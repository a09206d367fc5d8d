//! Aggregated lightning-committee votes.
//!
//! The lightning committee co-signs checkpoint blocks. An aggregate
//! carries one signature per committee member over the same payload;
//! merging two aggregates unions their signer maps, so merge order never
//! affects the final signature content.

use crate::crypto::{PrivateKey, Signature};
use crate::types::address_set::AddressSet;
use crate::types::Hash;
use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum AggregateError {
    #[error("cannot combine incompatible votes")]
    Incompatible,
}

/// A single aggregate vote signed by multiple lightning-committee members.
///
/// # Invariants
/// - `lightnings` equals the canonical hash of the committee the
///   signatures are checked against.
/// - Every signature verifies against its signer address over the
///   canonical serialization of `{block, lightnings}`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AggregatedVote {
    /// Hash of the block being co-signed.
    pub block: Hash,

    /// Canonical hash of the lightning set.
    pub lightnings: Hash,

    /// Signer address to signature.
    pub signatures: BTreeMap<Address, Signature>,
}

#[derive(Serialize)]
struct AggregateSignPayload {
    block: Hash,
    lightnings: Hash,
}

impl AggregatedVote {
    pub fn new(block: Hash, lightnings: &AddressSet) -> Self {
        Self {
            block,
            lightnings: lightnings.hash(),
            signatures: BTreeMap::new(),
        }
    }

    /// The bytes each committee member signs.
    pub fn sign_bytes(&self) -> Vec<u8> {
        let payload = AggregateSignPayload {
            block: self.block,
            lightnings: self.lightnings,
        };
        bincode::serialize(&payload).expect("aggregate payload serialization cannot fail")
    }

    /// Add the key holder's signature. Idempotent: returns false if the
    /// signer is already present.
    pub fn sign(&mut self, key: &PrivateKey) -> bool {
        let addr = key.address();
        if self.signatures.contains_key(&addr) {
            return false;
        }
        let sig = key.sign(&self.sign_bytes());
        self.signatures.insert(addr, sig);
        true
    }

    /// Number of signers in the aggregate.
    pub fn abs(&self) -> usize {
        self.signatures.len()
    }

    /// Signer addresses in ascending order.
    pub fn signers(&self) -> Vec<Address> {
        self.signatures.keys().copied().collect()
    }

    /// Combine two aggregates into a new one carrying the union of
    /// signatures. Returns `Ok(None)` when `other` adds no new signer.
    pub fn merge(&self, other: &AggregatedVote) -> Result<Option<AggregatedVote>, AggregateError> {
        if self.block != other.block || self.lightnings != other.lightnings {
            return Err(AggregateError::Incompatible);
        }
        let mut is_subset = true;
        let mut merged = self.clone();
        for (addr, sig) in &other.signatures {
            if !merged.signatures.contains_key(addr) {
                merged.signatures.insert(*addr, *sig);
                is_subset = false;
            }
        }
        if is_subset {
            return Ok(None);
        }
        Ok(Some(merged))
    }

    /// Select the aggregate carrying more signatures; ties keep `self`.
    pub fn pick<'a>(&'a self, other: &'a AggregatedVote) -> Result<&'a AggregatedVote, AggregateError> {
        if self.block != other.block || self.lightnings != other.lightnings {
            return Err(AggregateError::Incompatible);
        }
        if other.abs() > self.abs() {
            Ok(other)
        } else {
            Ok(self)
        }
    }

    /// Validate against a lightning set: the set-hash invariant, signer
    /// membership, and each signature individually.
    pub fn validate(&self, lightnings: &AddressSet) -> bool {
        if lightnings.hash() != self.lightnings {
            return false;
        }
        let payload = self.sign_bytes();
        for (addr, sig) in &self.signatures {
            if !lightnings.has(addr) {
                return false;
            }
            if !sig.verify(&payload, addr) {
                return false;
            }
        }
        true
    }

    /// True when the aggregate carries a >2/3 majority of the committee.
    pub fn has_majority(&self, lightnings: &AddressSet) -> bool {
        self.abs() * 3 > lightnings.len() * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committee(keys: &[PrivateKey]) -> AddressSet {
        AddressSet::from_addresses(keys.iter().map(|k| k.address()))
    }

    #[test]
    fn test_sign_is_idempotent() {
        let keys: Vec<_> = (0..2).map(|_| PrivateKey::generate()).collect();
        let set = committee(&keys);

        let mut vote = AggregatedVote::new(Hash([0x12; 32]), &set);
        assert!(vote.sign(&keys[0]));
        assert!(!vote.sign(&keys[0]));
        assert_eq!(vote.abs(), 1);
    }

    #[test]
    fn test_merge_unions_signers() {
        let keys: Vec<_> = (0..3).map(|_| PrivateKey::generate()).collect();
        let set = committee(&keys);
        let block = Hash([0x12; 32]);

        let mut v1 = AggregatedVote::new(block, &set);
        v1.sign(&keys[0]);
        let mut v2 = AggregatedVote::new(block, &set);
        v2.sign(&keys[1]);

        let v3 = v1.merge(&v2).unwrap().unwrap();
        assert!(v3.validate(&set));
        assert_eq!(
            v3.signers(),
            committee(&keys[..2]).sorted()
        );

        // v1 is a subset of v3: no new information.
        assert_eq!(v3.merge(&v1).unwrap(), None);
    }

    #[test]
    fn test_merge_commutative() {
        let keys: Vec<_> = (0..3).map(|_| PrivateKey::generate()).collect();
        let set = committee(&keys);
        let block = Hash([0x12; 32]);

        let mut v1 = AggregatedVote::new(block, &set);
        v1.sign(&keys[0]);
        v1.sign(&keys[2]);
        let mut v2 = AggregatedVote::new(block, &set);
        v2.sign(&keys[1]);

        let ab = v1.merge(&v2).unwrap().unwrap();
        let ba = v2.merge(&v1).unwrap().unwrap();
        assert_eq!(ab.signers(), ba.signers());
    }

    #[test]
    fn test_merge_monotone() {
        let keys: Vec<_> = (0..3).map(|_| PrivateKey::generate()).collect();
        let set = committee(&keys);
        let block = Hash([0x12; 32]);

        let mut v1 = AggregatedVote::new(block, &set);
        v1.sign(&keys[0]);
        let mut v2 = AggregatedVote::new(block, &set);
        v2.sign(&keys[1]);
        v2.sign(&keys[2]);

        let merged = v1.merge(&v2).unwrap().unwrap();
        assert!(merged.abs() >= v1.abs().max(v2.abs()));
    }

    #[test]
    fn test_merge_incompatible() {
        let keys: Vec<_> = (0..2).map(|_| PrivateKey::generate()).collect();
        let set = committee(&keys);

        let v1 = AggregatedVote::new(Hash([0x01; 32]), &set);
        let v2 = AggregatedVote::new(Hash([0x02; 32]), &set);

        assert_eq!(v1.merge(&v2), Err(AggregateError::Incompatible));
    }

    #[test]
    fn test_pick_prefers_larger() {
        let keys: Vec<_> = (0..3).map(|_| PrivateKey::generate()).collect();
        let set = committee(&keys);
        let block = Hash([0x12; 32]);

        let mut small = AggregatedVote::new(block, &set);
        small.sign(&keys[0]);
        let mut large = AggregatedVote::new(block, &set);
        large.sign(&keys[1]);
        large.sign(&keys[2]);

        assert_eq!(small.pick(&large).unwrap().abs(), 2);
        assert_eq!(large.pick(&small).unwrap().abs(), 2);
    }

    #[test]
    fn test_validate_rejects_outsider() {
        let keys: Vec<_> = (0..2).map(|_| PrivateKey::generate()).collect();
        let outsider = PrivateKey::generate();
        let set = committee(&keys);

        let mut vote = AggregatedVote::new(Hash([0x12; 32]), &set);
        vote.sign(&outsider);

        assert!(!vote.validate(&set));
    }

    #[test]
    fn test_validate_rejects_stale_committee_hash() {
        let keys: Vec<_> = (0..2).map(|_| PrivateKey::generate()).collect();
        let set = committee(&keys);

        let mut vote = AggregatedVote::new(Hash([0x12; 32]), &set);
        vote.sign(&keys[0]);

        let mut grown = set.clone();
        grown.add(PrivateKey::generate().address());

        assert!(!vote.validate(&grown));
    }
}
