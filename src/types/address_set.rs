//! Address membership sets with a canonical hash.
//!
//! Validator and lightning committees are plain address sets; stake
//! weighting happens upstream when the sets are selected at
//! validator-update checkpoints.

use crate::types::{keccak256_hash, Address, Hash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Unordered unique set of addresses.
///
/// # Invariants
/// - `hash()` is computed over members in ascending byte-lexicographic
///   order, regardless of insertion order. Two sets with equal membership
///   always hash identically.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct AddressSet {
    members: BTreeSet<Address>,
}

impl AddressSet {
    pub fn new() -> Self {
        Self {
            members: BTreeSet::new(),
        }
    }

    pub fn from_addresses(addrs: impl IntoIterator<Item = Address>) -> Self {
        Self {
            members: addrs.into_iter().collect(),
        }
    }

    /// Insert an address; returns false if it was already a member.
    pub fn add(&mut self, addr: Address) -> bool {
        self.members.insert(addr)
    }

    /// Remove an address; returns false if it was not a member.
    pub fn remove(&mut self, addr: &Address) -> bool {
        self.members.remove(addr)
    }

    pub fn has(&self, addr: &Address) -> bool {
        self.members.contains(addr)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in ascending byte-lexicographic order.
    pub fn sorted(&self) -> Vec<Address> {
        self.members.iter().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.members.iter()
    }

    /// The lexicographically-first member, if any.
    pub fn first(&self) -> Option<Address> {
        self.members.iter().next().copied()
    }

    /// Canonical set hash: Keccak-256 of member addresses concatenated in
    /// ascending byte-lexicographic order.
    pub fn hash(&self) -> Hash {
        let mut data = Vec::with_capacity(self.members.len() * 20);
        for addr in &self.members {
            data.extend_from_slice(addr.as_bytes());
        }
        keccak256_hash(&data)
    }
}

impl FromIterator<Address> for AddressSet {
    fn from_iter<T: IntoIterator<Item = Address>>(iter: T) -> Self {
        Self::from_addresses(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_addr(id: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[0] = id;
        Address(bytes)
    }

    #[test]
    fn test_membership() {
        let mut set = AddressSet::new();
        let a = make_addr(1);

        assert!(set.add(a));
        assert!(!set.add(a));
        assert!(set.has(&a));
        assert_eq!(set.len(), 1);

        assert!(set.remove(&a));
        assert!(!set.remove(&a));
        assert!(set.is_empty());
    }

    #[test]
    fn test_hash_is_order_independent() {
        let a = make_addr(1);
        let b = make_addr(2);
        let c = make_addr(3);

        let forward = AddressSet::from_addresses(vec![a, b, c]);
        let backward = AddressSet::from_addresses(vec![c, b, a]);

        assert_eq!(forward.hash(), backward.hash());
    }

    #[test]
    fn test_hash_distinguishes_membership() {
        let one = AddressSet::from_addresses(vec![make_addr(1)]);
        let two = AddressSet::from_addresses(vec![make_addr(1), make_addr(2)]);

        assert_ne!(one.hash(), two.hash());
    }

    #[test]
    fn test_first_is_lexicographic() {
        let set = AddressSet::from_addresses(vec![make_addr(9), make_addr(3), make_addr(7)]);
        assert_eq!(set.first(), Some(make_addr(3)));
    }
}
