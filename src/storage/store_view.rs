//! Versioned, Merkle-committed view over the ledger state.
//!
//! A view overlays staged writes on top of a committed root. `save`
//! commits the overlay and returns the post-commit root; `copy` yields
//! an independent view sharing the backing database; `revert_to_snapshot`
//! rewinds to any root that is still present in the database.

use crate::errors::CoreError;
use crate::storage::db::Database;
use crate::storage::keys;
use crate::storage::trie::{MerkleTrie, EMPTY_ROOT};
use crate::types::address_set::AddressSet;
use crate::types::stake::RewardDistribution;
use crate::types::{Address, Coins, Hash};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// An account record in the ledger state.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub balance: Coins,

    /// Sequence number of the last accepted transaction.
    pub sequence: u64,
}

/// Versioned view over the Merkle-committed ledger state.
pub struct StoreView {
    height: u64,
    root: Hash,
    db: Arc<dyn Database>,
    trie: MerkleTrie,

    /// Content as of `root`.
    committed: BTreeMap<Vec<u8>, Vec<u8>>,

    /// Staged overlay; `None` marks a deletion.
    staged: BTreeMap<Vec<u8>, Option<Vec<u8>>>,

    /// Per-block transient: set once the block's coinbase has executed.
    coinbase_processed: bool,
}

impl StoreView {
    /// Open a view at a committed root. The empty root yields an empty view.
    pub fn new(height: u64, root: Hash, db: Arc<dyn Database>) -> Result<Self, CoreError> {
        let trie = MerkleTrie::new(Arc::clone(&db));
        let committed = trie
            .materialize(root)
            .ok_or_else(|| CoreError::TransientIo(format!("missing state root {}", root)))?;
        Ok(Self {
            height,
            root,
            db,
            trie,
            committed,
            staged: BTreeMap::new(),
            coinbase_processed: false,
        })
    }

    /// A fresh empty view, used for genesis construction.
    pub fn empty(height: u64, db: Arc<dyn Database>) -> Self {
        Self::new(height, EMPTY_ROOT, db).expect("the empty root always materializes")
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn set_height(&mut self, height: u64) {
        self.height = height;
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.staged.get(key) {
            Some(entry) => entry.clone(),
            None => self.committed.get(key).cloned(),
        }
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.staged.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.staged.insert(key.to_vec(), None);
    }

    /// Current content with the overlay applied.
    fn content(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        let mut out = self.committed.clone();
        for (key, entry) in &self.staged {
            match entry {
                Some(value) => {
                    out.insert(key.clone(), value.clone());
                }
                None => {
                    out.remove(key);
                }
            }
        }
        out
    }

    /// Visit every `(key, value)` under a prefix, in key order.
    pub fn traverse(&self, prefix: &[u8], mut visitor: impl FnMut(&[u8], &[u8])) {
        for (key, value) in self.content() {
            if key.starts_with(prefix) {
                visitor(&key, &value);
            }
        }
    }

    /// Pure function of the current content; stable across equal content.
    pub fn hash(&self) -> Hash {
        if self.staged.is_empty() {
            return self.root;
        }
        MerkleTrie::root_of(&self.content())
    }

    /// Commit the overlay to the backing database. The returned root
    /// equals `hash()` at the moment of commit.
    pub fn save(&mut self) -> Hash {
        let content = self.content();
        let root = self.trie.commit(&content);
        self.committed = content;
        self.staged.clear();
        self.root = root;
        root
    }

    /// Independent view sharing the backing database, with its own
    /// staged writes.
    pub fn copy(&self) -> StoreView {
        StoreView {
            height: self.height,
            root: self.root,
            db: Arc::clone(&self.db),
            trie: self.trie.clone(),
            committed: self.committed.clone(),
            staged: self.staged.clone(),
            coinbase_processed: self.coinbase_processed,
        }
    }

    /// Replace the view's content with a previously committed root.
    pub fn revert_to_snapshot(&mut self, root: Hash) -> Result<(), CoreError> {
        let committed = self
            .trie
            .materialize(root)
            .ok_or_else(|| CoreError::TransientIo(format!("missing state root {}", root)))?;
        self.committed = committed;
        self.staged.clear();
        self.root = root;
        Ok(())
    }

    /// Drop trie nodes not reachable from any explicitly kept root.
    /// Only trie nodes (32-byte keys) are swept; other database records
    /// are untouched.
    pub fn prune(&self, kept_roots: &[Hash]) {
        let mut live = HashSet::new();
        for root in kept_roots {
            self.trie.reachable(*root, &mut live);
        }
        self.trie.reachable(self.root, &mut live);

        for key in self.db.keys() {
            if key.len() != 32 {
                continue;
            }
            let hash = Hash::from_slice(&key).expect("length checked above");
            if !live.contains(&hash) {
                self.db.delete(&key);
            }
        }
    }

    // ========================================================================
    // TYPED ACCESSORS
    // ========================================================================

    pub fn get_chain_id(&self) -> Option<String> {
        self.get(&keys::chain_id_key())
            .and_then(|raw| String::from_utf8(raw).ok())
    }

    pub fn set_chain_id(&mut self, chain_id: &str) {
        self.set(keys::chain_id_key(), chain_id.as_bytes().to_vec());
    }

    pub fn get_account(&self, addr: &Address) -> Option<Account> {
        self.get(&keys::account_key(addr))
            .and_then(|raw| bincode::deserialize(&raw).ok())
    }

    pub fn set_account(&mut self, addr: &Address, account: &Account) {
        let raw = bincode::serialize(account).expect("account serialization cannot fail");
        self.set(keys::account_key(addr), raw);
    }

    /// Existing account or a fresh zero-balance record.
    pub fn get_or_create_account(&self, addr: &Address) -> Account {
        self.get_account(addr).unwrap_or_default()
    }

    pub fn get_validators(&self) -> AddressSet {
        self.get(&keys::validators_key())
            .and_then(|raw| bincode::deserialize(&raw).ok())
            .unwrap_or_default()
    }

    pub fn set_validators(&mut self, validators: &AddressSet) {
        let raw = bincode::serialize(validators).expect("address set serialization cannot fail");
        self.set(keys::validators_key(), raw);
    }

    pub fn get_lightnings(&self) -> AddressSet {
        self.get(&keys::lightnings_key())
            .and_then(|raw| bincode::deserialize(&raw).ok())
            .unwrap_or_default()
    }

    pub fn set_lightnings(&mut self, lightnings: &AddressSet) {
        let raw = bincode::serialize(lightnings).expect("address set serialization cannot fail");
        self.set(keys::lightnings_key(), raw);
    }

    /// Heights at which validator-set transactions occurred.
    pub fn get_validator_tx_heights(&self) -> Vec<u64> {
        self.get(&keys::validator_tx_height_list_key())
            .and_then(|raw| bincode::deserialize(&raw).ok())
            .unwrap_or_default()
    }

    pub fn append_validator_tx_height(&mut self, height: u64) {
        let mut heights = self.get_validator_tx_heights();
        if heights.last() != Some(&height) {
            heights.push(height);
        }
        let raw = bincode::serialize(&heights).expect("height list serialization cannot fail");
        self.set(keys::validator_tx_height_list_key(), raw);
    }

    pub fn get_reward_distribution(&self, holder: &Address) -> Option<RewardDistribution> {
        self.get(&keys::reward_distribution_key(holder))
            .and_then(|raw| bincode::deserialize(&raw).ok())
    }

    pub fn set_reward_distribution(&mut self, rule: &RewardDistribution) {
        if rule.split_basis_point == 0 {
            // Zero basis point means "no rule".
            self.delete(&keys::reward_distribution_key(&rule.holder));
            return;
        }
        let raw = bincode::serialize(rule).expect("rule serialization cannot fail");
        self.set(keys::reward_distribution_key(&rule.holder), raw);
    }

    pub fn coinbase_processed(&self) -> bool {
        self.coinbase_processed
    }

    pub fn set_coinbase_processed(&mut self, processed: bool) {
        self.coinbase_processed = processed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::MemDatabase;

    fn new_view() -> StoreView {
        StoreView::empty(1, Arc::new(MemDatabase::new()))
    }

    #[test]
    fn test_get_set_delete() {
        let mut view = new_view();

        view.set(b"k".to_vec(), b"v".to_vec());
        assert_eq!(view.get(b"k"), Some(b"v".to_vec()));

        view.delete(b"k");
        assert_eq!(view.get(b"k"), None);
    }

    #[test]
    fn test_save_matches_hash() {
        let mut view = new_view();
        view.set(b"a".to_vec(), b"1".to_vec());
        view.set(b"b".to_vec(), b"2".to_vec());

        let expected = view.hash();
        let root = view.save();
        assert_eq!(root, expected);
        assert_eq!(view.hash(), root);
    }

    #[test]
    fn test_copy_is_independent() {
        let mut view = new_view();
        view.set(b"a".to_vec(), b"1".to_vec());
        view.save();

        let mut copy = view.copy();
        copy.set(b"a".to_vec(), b"2".to_vec());

        assert_eq!(view.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(copy.get(b"a"), Some(b"2".to_vec()));
    }

    #[test]
    fn test_revert_to_snapshot() {
        let mut view = new_view();
        view.set(b"a".to_vec(), b"1".to_vec());
        let root1 = view.save();

        view.set(b"a".to_vec(), b"2".to_vec());
        view.set(b"b".to_vec(), b"3".to_vec());
        let root2 = view.save();
        assert_ne!(root1, root2);

        view.revert_to_snapshot(root1).unwrap();
        assert_eq!(view.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(view.get(b"b"), None);
        assert_eq!(view.hash(), root1);
    }

    #[test]
    fn test_prune_keeps_live_roots() {
        let db = Arc::new(MemDatabase::new());
        let mut view = StoreView::empty(1, Arc::clone(&db) as Arc<dyn Database>);

        view.set(b"a".to_vec(), b"1".to_vec());
        let root1 = view.save();

        view.set(b"a".to_vec(), b"2".to_vec());
        let root2 = view.save();

        // Keep only the latest root; the old one becomes unreadable.
        view.prune(&[root2]);

        assert!(view.trie.materialize(root2).is_some());
        assert!(view.trie.materialize(root1).is_none());
    }

    #[test]
    fn test_traverse_prefix_in_order(){
        let mut view = new_view();
        let a1 = Address([0x01; 20]);
        let a2 = Address([0x02; 20]);
        view.set_account(&a2, &Account { balance: Coins::spay(2), sequence: 0 });
        view.set_account(&a1, &Account { balance: Coins::spay(1), sequence: 0 });
        view.set(b"other".to_vec(), b"x".to_vec());

        let mut seen = Vec::new();
        view.traverse(&keys::account_key_prefix(), |key, _| {
            seen.push(key.to_vec());
        });

        assert_eq!(seen, vec![keys::account_key(&a1), keys::account_key(&a2)]);
    }

    #[test]
    fn test_typed_accessors() {
        let mut view = new_view();

        view.set_chain_id("meridian-test");
        assert_eq!(view.get_chain_id().as_deref(), Some("meridian-test"));

        let validators = AddressSet::from_addresses(vec![Address([1; 20]), Address([2; 20])]);
        view.set_validators(&validators);
        assert_eq!(view.get_validators(), validators);

        view.append_validator_tx_height(10);
        view.append_validator_tx_height(10);
        view.append_validator_tx_height(20);
        assert_eq!(view.get_validator_tx_heights(), vec![10, 20]);

        let rule = RewardDistribution {
            holder: Address([1; 20]),
            beneficiary: Address([9; 20]),
            split_basis_point: 500,
        };
        view.set_reward_distribution(&rule);
        assert_eq!(view.get_reward_distribution(&Address([1; 20])), Some(rule.clone()));

        // Zero basis point clears the rule.
        view.set_reward_distribution(&RewardDistribution {
            split_basis_point: 0,
            ..rule
        });
        assert_eq!(view.get_reward_distribution(&Address([1; 20])), None);
    }
}
