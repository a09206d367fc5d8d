//! Backing key/value database abstraction.
//!
//! Trie nodes are stored under their 32-byte Keccak hash; block records
//! and indices live under short byte prefixes. The in-memory
//! implementation is the reference backend; a persistent engine can be
//! swapped in behind the same trait.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Minimal key/value store contract.
pub trait Database: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    fn put(&self, key: Vec<u8>, value: Vec<u8>);

    fn delete(&self, key: &[u8]);

    /// Snapshot of all keys; used by the pruner's sweep phase.
    fn keys(&self) -> Vec<Vec<u8>>;
}

/// In-memory reference database.
#[derive(Default)]
pub struct MemDatabase {
    inner: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl Database for MemDatabase {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.read().get(key).cloned()
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.inner.write().insert(key, value);
    }

    fn delete(&self, key: &[u8]) {
        self.inner.write().remove(key);
    }

    fn keys(&self) -> Vec<Vec<u8>> {
        self.inner.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let db = MemDatabase::new();

        db.put(b"k".to_vec(), b"v".to_vec());
        assert_eq!(db.get(b"k"), Some(b"v".to_vec()));

        db.delete(b"k");
        assert_eq!(db.get(b"k"), None);
        assert!(db.is_empty());
    }

    #[test]
    fn test_overwrite() {
        let db = MemDatabase::new();

        db.put(b"k".to_vec(), b"v1".to_vec());
        db.put(b"k".to_vec(), b"v2".to_vec());

        assert_eq!(db.get(b"k"), Some(b"v2".to_vec()));
        assert_eq!(db.len(), 1);
    }
}
