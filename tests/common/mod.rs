//! Shared harness for consensus and sync scenarios.

use meridian_core::chain::Chain;
use meridian_core::consensus::{
    ConsensusConfig, ConsensusEngine, LightningConfig, LightningEngine, NoTxProvider,
    ProposerStrategy, ValidatorManager,
};
use meridian_core::crypto::PrivateKey;
use meridian_core::ledger::{build_genesis_state, Executor, Ledger, LicenseGate, NullVm};
use meridian_core::network::InProcessDispatcher;
use meridian_core::storage::{Database, MemDatabase};
use meridian_core::sync::{RequestManager, SyncConfig};
use meridian_core::types::address_set::AddressSet;
use meridian_core::types::block::{compute_transactions_hash, Block, BlockHeader};
use meridian_core::types::vote::{CommitCertificate, Vote, VoteSet};
use meridian_core::types::Hash;
use std::sync::Arc;

pub const CHAIN_ID: &str = "meridian-test";

/// A single-process node harness with direct component handles.
pub struct Harness {
    pub validator_keys: Vec<PrivateKey>,
    pub lightning_keys: Vec<PrivateKey>,
    pub chain: Arc<Chain>,
    pub ledger: Arc<Ledger>,
    pub consensus: Arc<ConsensusEngine>,
    pub lightning: Arc<LightningEngine>,
    pub dispatcher: Arc<InProcessDispatcher>,
    pub request_manager: Arc<RequestManager>,
    pub genesis: Block,
    pub checkpoint_interval: u64,
}

pub struct HarnessConfig {
    pub validators: usize,
    pub lightnings: usize,
    pub checkpoint_interval: u64,
    pub sync: SyncConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            validators: 1,
            lightnings: 0,
            checkpoint_interval: 100,
            sync: SyncConfig::default(),
        }
    }
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Self {
        let validator_keys: Vec<PrivateKey> =
            (0..config.validators).map(|_| PrivateKey::generate()).collect();
        let lightning_keys: Vec<PrivateKey> =
            (0..config.lightnings).map(|_| PrivateKey::generate()).collect();

        let db: Arc<dyn Database> = Arc::new(MemDatabase::new());
        let validators =
            AddressSet::from_addresses(validator_keys.iter().map(|k| k.address()));
        let lightnings =
            AddressSet::from_addresses(lightning_keys.iter().map(|k| k.address()));

        let root = build_genesis_state(Arc::clone(&db), CHAIN_ID, &validators, &lightnings, &[]);
        let mut genesis = Block::genesis(CHAIN_ID);
        genesis.header.state_hash = root;

        let chain = Arc::new(Chain::new(CHAIN_ID, genesis.clone()));

        let issuer = PrivateKey::generate();
        let executor = Executor::new(
            CHAIN_ID,
            config.checkpoint_interval,
            0,
            Arc::new(LicenseGate::new(CHAIN_ID, issuer.address())),
            Arc::new(NullVm),
        );
        let ledger = Arc::new(Ledger::new(Arc::clone(&chain), db, executor).unwrap());

        let lightning = Arc::new(LightningEngine::new(
            LightningConfig::default(),
            validator_keys[0].clone(),
            Arc::clone(&ledger),
        ));

        let dispatcher = Arc::new(InProcessDispatcher::new());

        let consensus = Arc::new(ConsensusEngine::new(
            ConsensusConfig {
                checkpoint_interval: config.checkpoint_interval,
                auto_propose: false,
                ..Default::default()
            },
            Arc::clone(&chain),
            Arc::clone(&ledger),
            Arc::clone(&lightning),
            dispatcher.clone(),
            ValidatorManager::new(ProposerStrategy::Fixed),
            Arc::new(NoTxProvider),
            validator_keys[0].clone(),
        ));

        let request_manager = Arc::new(RequestManager::new(
            config.sync,
            Arc::clone(&chain),
            Arc::clone(&consensus),
            dispatcher.clone(),
        ));

        Self {
            validator_keys,
            lightning_keys,
            chain,
            ledger,
            consensus,
            lightning,
            dispatcher,
            request_manager,
            genesis,
            checkpoint_interval: config.checkpoint_interval,
        }
    }

    /// The fixed-strategy proposer: the lexicographically-first validator.
    pub fn proposer_key(&self) -> &PrivateKey {
        let validators =
            AddressSet::from_addresses(self.validator_keys.iter().map(|k| k.address()));
        let first = validators.first().unwrap();
        self.validator_keys
            .iter()
            .find(|k| k.address() == first)
            .unwrap()
    }

    /// Build a signed child block with a ledger-consistent state root.
    pub fn build_child(&self, parent: &Block, epoch: u64, hcc: CommitCertificate) -> Block {
        let key = self.proposer_key();
        let height = parent.height() + 1;
        let (state_hash, txs) = self
            .ledger
            .propose_block_txs(
                &parent.hash(),
                height,
                key,
                self.checkpoint_interval,
                &[],
            )
            .unwrap();

        let mut block = Block::new(
            BlockHeader {
                chain_id: CHAIN_ID.to_string(),
                height,
                epoch,
                parent: parent.hash(),
                state_hash,
                transactions_hash: compute_transactions_hash(&txs),
                timestamp: 1_700_000_000 + height,
                proposer: key.address(),
                hcc,
                lightning_votes: None,
                signature: None,
            },
            txs,
        );
        block.header.sign(key);
        block
    }

    /// A commit certificate over `block`, signed by every validator.
    pub fn certificate_for(&self, block: &Block, epoch: u64) -> CommitCertificate {
        let mut votes = VoteSet::new();
        for key in &self.validator_keys {
            let mut vote = Vote::new(block.hash(), block.height(), epoch, key.address());
            vote.sign(key);
            votes.add_vote(vote);
        }
        CommitCertificate::new(block.hash(), votes)
    }

    /// A signed vote from validator `index`.
    pub fn vote(&self, index: usize, block: Hash, height: u64, epoch: u64) -> Vote {
        let key = &self.validator_keys[index];
        let mut vote = Vote::new(block, height, epoch, key.address());
        vote.sign(key);
        vote
    }
}
