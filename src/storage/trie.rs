//! Content-addressed Merkle trie over the ledger state.
//!
//! The trie commits a sorted key/value map as a balanced binary Merkle
//! tree. Every node is serialized and stored in the backing database
//! under its Keccak-256 hash, so equal content always produces equal
//! roots and historical roots stay readable until pruned.

use crate::types::{keccak256_hash, Hash};
use crate::storage::db::Database;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Root of the empty trie.
pub const EMPTY_ROOT: Hash = Hash::ZERO;

/// A node in the Merkle trie.
#[derive(Clone, Debug, Serialize, Deserialize)]
enum TrieNode {
    /// Terminal node holding one key/value pair.
    Leaf { key: Vec<u8>, value: Vec<u8> },

    /// Internal node with two children.
    Internal { left: Hash, right: Hash },
}

impl TrieNode {
    /// Node identity. Domain-separated by a marker byte so a leaf can
    /// never collide with an internal node.
    fn hash(&self) -> Hash {
        match self {
            TrieNode::Leaf { key, value } => {
                let mut data = Vec::with_capacity(1 + key.len() + value.len());
                data.push(0x00);
                data.extend_from_slice(key);
                data.extend_from_slice(value);
                keccak256_hash(&data)
            }
            TrieNode::Internal { left, right } => {
                let mut data = [0u8; 65];
                data[0] = 0x01;
                data[1..33].copy_from_slice(left.as_bytes());
                data[33..65].copy_from_slice(right.as_bytes());
                keccak256_hash(&data)
            }
        }
    }
}

/// Merkle trie bound to a backing database.
#[derive(Clone)]
pub struct MerkleTrie {
    db: Arc<dyn Database>,
}

impl MerkleTrie {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Pure root computation over content; stores nothing.
    pub fn root_of(content: &BTreeMap<Vec<u8>, Vec<u8>>) -> Hash {
        let leaves: Vec<_> = content.iter().collect();
        Self::subtree_hash(&leaves)
    }

    fn subtree_hash(leaves: &[(&Vec<u8>, &Vec<u8>)]) -> Hash {
        match leaves.len() {
            0 => EMPTY_ROOT,
            1 => TrieNode::Leaf {
                key: leaves[0].0.clone(),
                value: leaves[0].1.clone(),
            }
            .hash(),
            n => {
                let mid = n / 2;
                TrieNode::Internal {
                    left: Self::subtree_hash(&leaves[..mid]),
                    right: Self::subtree_hash(&leaves[mid..]),
                }
                .hash()
            }
        }
    }

    /// Commit content to the backing database, returning the new root.
    /// Always equal to [`MerkleTrie::root_of`] over the same content.
    pub fn commit(&self, content: &BTreeMap<Vec<u8>, Vec<u8>>) -> Hash {
        let leaves: Vec<_> = content.iter().collect();
        self.commit_subtree(&leaves)
    }

    fn commit_subtree(&self, leaves: &[(&Vec<u8>, &Vec<u8>)]) -> Hash {
        let node = match leaves.len() {
            0 => return EMPTY_ROOT,
            1 => TrieNode::Leaf {
                key: leaves[0].0.clone(),
                value: leaves[0].1.clone(),
            },
            n => {
                let mid = n / 2;
                TrieNode::Internal {
                    left: self.commit_subtree(&leaves[..mid]),
                    right: self.commit_subtree(&leaves[mid..]),
                }
            }
        };
        let hash = node.hash();
        let raw = bincode::serialize(&node).expect("trie node serialization cannot fail");
        self.db.put(hash.as_bytes().to_vec(), raw);
        hash
    }

    /// Reconstruct the full key/value content under a committed root.
    /// Returns None if any referenced node is missing.
    pub fn materialize(&self, root: Hash) -> Option<BTreeMap<Vec<u8>, Vec<u8>>> {
        let mut out = BTreeMap::new();
        if root == EMPTY_ROOT {
            return Some(out);
        }
        self.walk(root, &mut |key, value| {
            out.insert(key.to_vec(), value.to_vec());
        })?;
        Some(out)
    }

    fn walk(&self, node_hash: Hash, visit: &mut dyn FnMut(&[u8], &[u8])) -> Option<()> {
        let raw = self.db.get(node_hash.as_bytes())?;
        let node: TrieNode = bincode::deserialize(&raw).ok()?;
        match node {
            TrieNode::Leaf { key, value } => visit(&key, &value),
            TrieNode::Internal { left, right } => {
                self.walk(left, visit)?;
                self.walk(right, visit)?;
            }
        }
        Some(())
    }

    /// Collect every node hash reachable from a root.
    pub fn reachable(&self, root: Hash, out: &mut HashSet<Hash>) {
        if root == EMPTY_ROOT || out.contains(&root) {
            return;
        }
        let Some(raw) = self.db.get(root.as_bytes()) else {
            return;
        };
        out.insert(root);
        if let Ok(TrieNode::Internal { left, right }) = bincode::deserialize::<TrieNode>(&raw) {
            self.reachable(left, out);
            self.reachable(right, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::MemDatabase;

    fn content(pairs: &[(&str, &str)]) -> BTreeMap<Vec<u8>, Vec<u8>> {
        pairs
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_equal_content_equal_roots() {
        let a = MerkleTrie::root_of(&content(&[("a", "1"), ("b", "2")]));
        let b = MerkleTrie::root_of(&content(&[("b", "2"), ("a", "1")]));
        assert_eq!(a, b);

        let c = MerkleTrie::root_of(&content(&[("a", "1"), ("b", "3")]));
        assert_ne!(a, c);
    }

    #[test]
    fn test_empty_root() {
        assert_eq!(MerkleTrie::root_of(&BTreeMap::new()), EMPTY_ROOT);
    }

    #[test]
    fn test_commit_matches_pure_root() {
        let db = Arc::new(MemDatabase::new());
        let trie = MerkleTrie::new(db);
        let kv = content(&[("x", "10"), ("y", "20"), ("z", "30")]);

        assert_eq!(trie.commit(&kv), MerkleTrie::root_of(&kv));
    }

    #[test]
    fn test_materialize_roundtrip() {
        let db = Arc::new(MemDatabase::new());
        let trie = MerkleTrie::new(db);
        let kv = content(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")]);

        let root = trie.commit(&kv);
        assert_eq!(trie.materialize(root), Some(kv));
    }

    #[test]
    fn test_old_roots_stay_readable() {
        let db = Arc::new(MemDatabase::new());
        let trie = MerkleTrie::new(db);

        let v1 = content(&[("a", "1")]);
        let root1 = trie.commit(&v1);

        let v2 = content(&[("a", "2"), ("b", "1")]);
        let root2 = trie.commit(&v2);

        assert_eq!(trie.materialize(root1), Some(v1));
        assert_eq!(trie.materialize(root2), Some(v2));
    }

    #[test]
    fn test_reachable_collects_all_nodes() {
        let db = Arc::new(MemDatabase::new());
        let trie = MerkleTrie::new(Arc::clone(&db) as Arc<dyn Database>);
        let kv = content(&[("a", "1"), ("b", "2"), ("c", "3")]);

        let root = trie.commit(&kv);
        let mut reachable = HashSet::new();
        trie.reachable(root, &mut reachable);

        // 3 leaves + 2 internal nodes.
        assert_eq!(reachable.len(), 5);
    }
}
