//! State storage: backing database, Merkle trie, versioned store views,
//! state-key conventions, and the genesis snapshot codec.

pub mod cache;
pub mod db;
pub mod keys;
pub mod snapshot;
pub mod store_view;
pub mod trie;

pub use cache::LruCache;
pub use db::{Database, MemDatabase};
pub use store_view::{Account, StoreView};
pub use trie::MerkleTrie;
