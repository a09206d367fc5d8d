//! Block, block header, and the locally-annotated extended block.

use crate::crypto::{PrivateKey, Signature};
use crate::types::lightning::AggregatedVote;
use crate::types::vote::CommitCertificate;
use crate::types::{keccak256, keccak256_hash, Address, Hash};
use serde::{Deserialize, Serialize};

/// Block header. The header's hash is the Keccak-256 digest of its
/// canonical serialization and serves as the block's identity.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Textual chain identifier.
    pub chain_id: String,

    pub height: u64,

    /// Epoch in which the block was proposed.
    pub epoch: u64,

    pub parent: Hash,

    /// State root after applying this block's transactions.
    pub state_hash: Hash,

    /// Commitment over the ordered transaction blobs.
    pub transactions_hash: Hash,

    /// Unix timestamp in seconds.
    pub timestamp: u64,

    pub proposer: Address,

    /// Highest commit certificate known to the proposer, carried forward.
    pub hcc: CommitCertificate,

    /// Lightning-committee aggregate over this block's own hash;
    /// mandatory at checkpoint heights, absent elsewhere.
    pub lightning_votes: Option<AggregatedVote>,

    /// Proposer's signature over the header sans this field.
    pub signature: Option<Signature>,
}

impl BlockHeader {
    /// Block identity: Keccak-256 over the serialized header with the
    /// two late-bound fields cleared. The lightning aggregate co-signs
    /// this hash, so it cannot itself contribute to it; likewise the
    /// proposer signature.
    pub fn hash(&self) -> Hash {
        let mut identity = self.clone();
        identity.lightning_votes = None;
        identity.signature = None;
        let raw = bincode::serialize(&identity).expect("header serialization cannot fail");
        keccak256_hash(&raw)
    }

    /// Raw bytes the proposer signs: the header with the signature cleared.
    pub fn sign_bytes(&self) -> Vec<u8> {
        let mut unsigned = self.clone();
        unsigned.signature = None;
        bincode::serialize(&unsigned).expect("header serialization cannot fail")
    }

    pub fn sign(&mut self, key: &PrivateKey) {
        self.signature = Some(key.sign(&self.sign_bytes()));
    }

    /// Verify the proposer's signature.
    pub fn validate_signature(&self) -> bool {
        match &self.signature {
            Some(sig) => sig.verify(&self.sign_bytes(), &self.proposer),
            None => false,
        }
    }
}

/// A header plus the ordered transaction byte-blobs.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Vec<u8>>,
}

impl Block {
    pub fn new(header: BlockHeader, txs: Vec<Vec<u8>>) -> Self {
        Self { header, txs }
    }

    /// The genesis block sits at height 1 and anchors the chain.
    pub fn genesis(chain_id: &str) -> Self {
        Self {
            header: BlockHeader {
                chain_id: chain_id.to_string(),
                height: 1,
                epoch: 0,
                parent: Hash::ZERO,
                state_hash: Hash::ZERO,
                transactions_hash: compute_transactions_hash(&[]),
                timestamp: 0,
                proposer: Address::ZERO,
                hcc: CommitCertificate::default(),
                lightning_votes: None,
                signature: None,
            },
            txs: vec![],
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Canonical wire encoding.
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("block serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Option<Block> {
        bincode::deserialize(bytes).ok()
    }
}

/// Commitment over an ordered transaction list: Keccak-256 over the
/// concatenation of each blob's digest.
pub fn compute_transactions_hash(txs: &[Vec<u8>]) -> Hash {
    let mut data = Vec::with_capacity(txs.len() * 32);
    for tx in txs {
        data.extend_from_slice(&keccak256(tx));
    }
    keccak256_hash(&data)
}

/// Local status label of a stored block.
///
/// Transitions are performed only by the consensus engine and are
/// monotone: a finalized block never changes status or content again.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum BlockStatus {
    Pending,
    Valid,
    Invalid,
    Committed,
    DirectlyFinalized,
    IndirectlyFinalized,
}

impl BlockStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, BlockStatus::Pending)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, BlockStatus::Invalid)
    }

    /// Validated and not rejected: Valid or any later status.
    pub fn is_valid(&self) -> bool {
        matches!(
            self,
            BlockStatus::Valid
                | BlockStatus::Committed
                | BlockStatus::DirectlyFinalized
                | BlockStatus::IndirectlyFinalized
        )
    }

    pub fn is_committed(&self) -> bool {
        matches!(
            self,
            BlockStatus::Committed
                | BlockStatus::DirectlyFinalized
                | BlockStatus::IndirectlyFinalized
        )
    }

    pub fn is_finalized(&self) -> bool {
        matches!(
            self,
            BlockStatus::DirectlyFinalized | BlockStatus::IndirectlyFinalized
        )
    }
}

/// A block plus local metadata. Only extended blocks are persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtendedBlock {
    pub block: Block,
    pub status: BlockStatus,

    /// Hashes of known children; identifiers, not ownership links.
    pub children: Vec<Hash>,

    /// Whether this block carried a validator-set update transaction.
    pub has_validator_update: bool,
}

impl ExtendedBlock {
    pub fn new(block: Block) -> Self {
        Self {
            block,
            status: BlockStatus::Pending,
            children: Vec::new(),
            has_validator_update: false,
        }
    }

    pub fn hash(&self) -> Hash {
        self.block.hash()
    }

    pub fn height(&self) -> u64 {
        self.block.header.height
    }

    pub fn parent(&self) -> Hash {
        self.block.header.parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::address_set::AddressSet;

    fn make_block(height: u64, parent: Hash) -> Block {
        Block::new(
            BlockHeader {
                chain_id: "meridian-test".to_string(),
                height,
                epoch: height,
                parent,
                state_hash: Hash([0x10; 32]),
                transactions_hash: compute_transactions_hash(&[]),
                timestamp: 1_700_000_000,
                proposer: Address([0x01; 20]),
                hcc: CommitCertificate::default(),
                lightning_votes: None,
                signature: None,
            },
            vec![],
        )
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let block = make_block(2, Hash([0x0A; 32]));
        let decoded = Block::decode(&block.encode()).unwrap();
        assert_eq!(block, decoded);
        assert_eq!(block.hash(), decoded.hash());
    }

    #[test]
    fn test_roundtrip_with_lightning_votes() {
        let key = PrivateKey::generate();
        let set = AddressSet::from_addresses(vec![key.address()]);

        let mut block = make_block(101, Hash([0x0A; 32]));
        let mut agg = AggregatedVote::new(Hash([0x0B; 32]), &set);
        agg.sign(&key);
        block.header.lightning_votes = Some(agg);

        let decoded = Block::decode(&block.encode()).unwrap();
        assert_eq!(block, decoded);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = make_block(2, Hash([0x0A; 32]));
        let b = make_block(2, Hash([0x0A; 32]));
        assert_eq!(a.hash(), b.hash());

        let c = make_block(3, Hash([0x0A; 32]));
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_hash_stable_under_late_bound_fields() {
        let key = PrivateKey::generate();
        let set = AddressSet::from_addresses(vec![key.address()]);

        let mut block = make_block(101, Hash([0x0A; 32]));
        let before = block.hash();

        let mut agg = AggregatedVote::new(before, &set);
        agg.sign(&key);
        block.header.lightning_votes = Some(agg);
        block.header.sign(&key);

        // The aggregate co-signs the block's own hash, so neither it nor
        // the proposer signature may move the identity.
        assert_eq!(block.hash(), before);
    }

    #[test]
    fn test_header_signature() {
        let key = PrivateKey::generate();
        let mut block = make_block(2, Hash([0x0A; 32]));
        block.header.proposer = key.address();

        assert!(!block.header.validate_signature());
        block.header.sign(&key);
        assert!(block.header.validate_signature());

        // Any header mutation invalidates the signature.
        block.header.height = 3;
        assert!(!block.header.validate_signature());
    }

    #[test]
    fn test_status_predicates() {
        assert!(BlockStatus::Pending.is_pending());
        assert!(!BlockStatus::Pending.is_valid());
        assert!(BlockStatus::Valid.is_valid());
        assert!(BlockStatus::Committed.is_committed());
        assert!(BlockStatus::DirectlyFinalized.is_finalized());
        assert!(BlockStatus::IndirectlyFinalized.is_valid());
        assert!(!BlockStatus::Invalid.is_valid());
    }

    #[test]
    fn test_genesis_anchor() {
        let genesis = Block::genesis("meridian-test");
        assert_eq!(genesis.height(), 1);
        assert!(genesis.header.parent.is_empty());
    }
}
