//! Transaction mempool.
//!
//! Holds screened raw transactions ordered by effective gas price. The
//! consensus engine drains it through the [`TxProvider`] seam when
//! building proposals.

use crate::consensus::TxProvider;
use crate::errors::CoreError;
use crate::ledger::TxInfo;
use crate::types::{keccak256_hash, Hash};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

struct PendingTx {
    raw: Vec<u8>,
    info: TxInfo,
    received_at: Instant,
}

#[derive(Default)]
struct Inner {
    txs: HashMap<Hash, PendingTx>,

    /// Ascending (gas price, hash); drained from the back for best-first.
    by_price: BTreeMap<(u128, Hash), Hash>,
}

/// Bounded pool of screened transactions.
pub struct Mempool {
    inner: RwLock<Inner>,
    max_size: usize,
}

impl Mempool {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_size,
        }
    }

    /// Add a screened transaction; duplicates are rejected. When full,
    /// the lowest-priced entry is evicted if the newcomer pays more.
    pub fn add(&self, raw: Vec<u8>, info: TxInfo) -> Result<(), CoreError> {
        let hash = keccak256_hash(&raw);
        let mut inner = self.inner.write();

        if inner.txs.contains_key(&hash) {
            return Err(CoreError::validation("transaction already known"));
        }
        if inner.txs.len() >= self.max_size {
            let evict = inner
                .by_price
                .keys()
                .next()
                .copied()
                .filter(|(price, _)| *price < info.effective_gas_price);
            match evict {
                Some(key) => {
                    inner.by_price.remove(&key);
                    inner.txs.remove(&key.1);
                }
                None => {
                    return Err(CoreError::Fee(
                        "mempool full and fee too low to displace".to_string(),
                    ))
                }
            }
        }

        inner.by_price.insert((info.effective_gas_price, hash), hash);
        inner.txs.insert(
            hash,
            PendingTx {
                raw,
                info,
                received_at: Instant::now(),
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.read().txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().txs.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.read().txs.contains_key(hash)
    }

    /// Drop entries older than `max_age`.
    pub fn prune_stale(&self, max_age: std::time::Duration) -> usize {
        let mut inner = self.inner.write();
        let stale: Vec<(u128, Hash)> = inner
            .txs
            .iter()
            .filter(|(_, tx)| tx.received_at.elapsed() > max_age)
            .map(|(hash, tx)| (tx.info.effective_gas_price, *hash))
            .collect();
        for key in &stale {
            inner.by_price.remove(key);
            inner.txs.remove(&key.1);
        }
        stale.len()
    }
}

impl TxProvider for Mempool {
    fn pending(&self, max: usize) -> Vec<Vec<u8>> {
        let inner = self.inner.read();
        inner
            .by_price
            .values()
            .rev()
            .take(max)
            .filter_map(|hash| inner.txs.get(hash).map(|tx| tx.raw.clone()))
            .collect()
    }

    fn mark_included(&self, tx_hashes: &[Hash]) {
        let mut inner = self.inner.write();
        for hash in tx_hashes {
            if let Some(tx) = inner.txs.remove(hash) {
                inner
                    .by_price
                    .remove(&(tx.info.effective_gas_price, *hash));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Address;

    fn info(price: u128) -> TxInfo {
        TxInfo {
            address: Address([1; 20]),
            sequence: 1,
            effective_gas_price: price,
        }
    }

    #[test]
    fn test_add_and_order() {
        let pool = Mempool::new(10);
        pool.add(vec![1], info(10)).unwrap();
        pool.add(vec![2], info(30)).unwrap();
        pool.add(vec![3], info(20)).unwrap();

        let best = pool.pending(2);
        assert_eq!(best, vec![vec![2], vec![3]]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let pool = Mempool::new(10);
        pool.add(vec![1], info(10)).unwrap();
        assert!(pool.add(vec![1], info(10)).is_err());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_eviction_prefers_higher_fee() {
        let pool = Mempool::new(2);
        pool.add(vec![1], info(10)).unwrap();
        pool.add(vec![2], info(20)).unwrap();

        // Higher fee displaces the cheapest entry.
        pool.add(vec![3], info(30)).unwrap();
        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&keccak256_hash(&[1])));

        // Cheaper-than-everything is rejected outright.
        assert!(pool.add(vec![4], info(5)).is_err());
    }

    #[test]
    fn test_mark_included() {
        let pool = Mempool::new(10);
        pool.add(vec![1], info(10)).unwrap();
        pool.add(vec![2], info(20)).unwrap();

        pool.mark_included(&[keccak256_hash(&[2])]);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.pending(10), vec![vec![1]]);
    }
}
