//! Append-only block DAG.
//!
//! Blocks are indexed by hash and by height, with parent/children links
//! kept as identifiers. Status labels are mutated only by the consensus
//! engine; a finalized block never changes again.

use crate::errors::CoreError;
use crate::types::block::{Block, BlockStatus, ExtendedBlock};
use crate::types::Hash;
use dashmap::DashMap;
use tracing::debug;

/// Thread-safe block DAG anchored at a root block (the genesis, or a
/// later truncated anchor when starting from a snapshot).
pub struct Chain {
    chain_id: String,
    root: Hash,

    /// Extended blocks by hash.
    blocks: DashMap<Hash, ExtendedBlock>,

    /// Secondary index for forks: height to block hashes.
    by_height: DashMap<u64, Vec<Hash>>,

    /// Transaction hash to containing block hash.
    tx_index: DashMap<Hash, Hash>,
}

impl Chain {
    /// Create a chain growing from a trusted anchor block.
    pub fn new(chain_id: &str, anchor: Block) -> Self {
        let anchor_hash = anchor.hash();
        let mut extended = ExtendedBlock::new(anchor);
        extended.status = BlockStatus::DirectlyFinalized;

        let chain = Self {
            chain_id: chain_id.to_string(),
            root: anchor_hash,
            blocks: DashMap::new(),
            by_height: DashMap::new(),
            tx_index: DashMap::new(),
        };
        chain
            .by_height
            .entry(extended.height())
            .or_default()
            .push(anchor_hash);
        chain.blocks.insert(anchor_hash, extended);
        chain
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// The snapshot anchor the chain grows from.
    pub fn root(&self) -> ExtendedBlock {
        self.blocks
            .get(&self.root)
            .map(|b| b.clone())
            .expect("the anchor block is always present")
    }

    /// Validate and store a block with initial status `Pending`.
    ///
    /// Rejected blocks are not stored. A block whose parent is not yet
    /// known is accepted as an orphan; height monotonicity is enforced
    /// once the parent is present.
    pub fn add_block(&self, block: Block) -> Result<ExtendedBlock, CoreError> {
        let hash = block.hash();

        if self.blocks.contains_key(&hash) {
            return Err(CoreError::validation(format!("block {hash} already known")));
        }
        if block.header.parent.is_empty() {
            return Err(CoreError::validation("block has no parent"));
        }
        if block.header.chain_id != self.chain_id {
            return Err(CoreError::validation(format!(
                "chain id mismatch: got {}, want {}",
                block.header.chain_id, self.chain_id
            )));
        }
        if !block.header.validate_signature() {
            return Err(CoreError::validation("proposer signature invalid"));
        }
        if let Some(mut parent) = self.blocks.get_mut(&block.header.parent) {
            if block.header.height != parent.height() + 1 {
                return Err(CoreError::validation(format!(
                    "non-monotonic height {} on parent at {}",
                    block.header.height,
                    parent.height()
                )));
            }
            if !parent.children.contains(&hash) {
                parent.children.push(hash);
            }
        }

        for tx in &block.txs {
            let tx_hash = crate::types::keccak256_hash(tx);
            self.tx_index.insert(tx_hash, hash);
        }

        let extended = ExtendedBlock::new(block);
        self.by_height
            .entry(extended.height())
            .or_default()
            .push(hash);
        self.blocks.insert(hash, extended.clone());

        // Adopt any orphans that were waiting for this block.
        if let Some(children) = self.by_height.get(&(extended.height() + 1)) {
            let orphans: Vec<Hash> = children
                .iter()
                .filter(|child| {
                    self.blocks
                        .get(*child)
                        .map(|c| c.parent() == hash)
                        .unwrap_or(false)
                })
                .copied()
                .collect();
            drop(children);
            if !orphans.is_empty() {
                let mut parent = self
                    .blocks
                    .get_mut(&hash)
                    .expect("block inserted just above");
                for orphan in orphans {
                    if !parent.children.contains(&orphan) {
                        debug!(block = %hash, child = %orphan, "adopted orphan block");
                        parent.children.push(orphan);
                    }
                }
            }
        }

        Ok(extended)
    }

    pub fn find_block(&self, hash: &Hash) -> Option<ExtendedBlock> {
        self.blocks.get(hash).map(|b| b.clone())
    }

    pub fn has_block(&self, hash: &Hash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn find_blocks_by_height(&self, height: u64) -> Vec<ExtendedBlock> {
        self.by_height
            .get(&height)
            .map(|hashes| {
                hashes
                    .iter()
                    .filter_map(|h| self.blocks.get(h).map(|b| b.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Locate a raw transaction by its hash.
    pub fn find_tx_by_hash(&self, tx_hash: &Hash) -> Option<(Vec<u8>, Block)> {
        let block_hash = *self.tx_index.get(tx_hash)?;
        let block = self.find_block(&block_hash)?.block;
        let raw = block
            .txs
            .iter()
            .find(|tx| crate::types::keccak256_hash(tx) == *tx_hash)?
            .clone();
        Some((raw, block))
    }

    /// Update a block's status label.
    ///
    /// Panics if the transition would mutate a finalized block; that is
    /// an internal invariant violation and continuing would fork the
    /// chain.
    pub fn set_status(&self, hash: &Hash, status: BlockStatus) {
        let mut block = match self.blocks.get_mut(hash) {
            Some(b) => b,
            None => return,
        };
        if block.status == status {
            return;
        }
        if block.status.is_finalized() {
            panic!(
                "attempted status change on finalized block {hash}: {:?} -> {:?}",
                block.status, status
            );
        }
        block.status = status;
    }

    pub fn set_has_validator_update(&self, hash: &Hash, value: bool) {
        if let Some(mut block) = self.blocks.get_mut(hash) {
            block.has_validator_update = value;
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
