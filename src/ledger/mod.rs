//! Ledger: transaction execution against the Merkle-committed state.
//!
//! Three views coexist: the delivered view tracks the last applied
//! block and is the only one ever committed; the checked view stages
//! block proposals; the screened view answers mempool admission. Block
//! application happens on a working copy that is committed or discarded
//! atomically per block.

pub mod coinbase;
pub mod executor;
pub mod license;

pub use executor::{Executor, NullVm, TxContext, TxInfo, Vm};
pub use license::{License, LicenseGate};

use crate::chain::Chain;
use crate::errors::CoreError;
use crate::storage::db::Database;
use crate::storage::store_view::StoreView;
use crate::types::address_set::AddressSet;
use crate::types::block::Block;
use crate::types::transaction::Transaction;
use crate::types::{Address, Coins, Hash};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Seed the genesis state: chain id, committee sets, and initial
/// account balances. Returns the genesis state root.
pub fn build_genesis_state(
    db: Arc<dyn Database>,
    chain_id: &str,
    validators: &AddressSet,
    lightnings: &AddressSet,
    balances: &[(Address, Coins)],
) -> Hash {
    let mut view = StoreView::empty(1, db);
    view.set_chain_id(chain_id);
    view.set_validators(validators);
    view.set_lightnings(lightnings);
    for (addr, coins) in balances {
        let mut account = view.get_or_create_account(addr);
        account.balance = account.balance.plus(*coins);
        view.set_account(addr, &account);
    }
    view.save()
}

struct Views {
    /// State as of the last applied block; the only view committed.
    delivered: StoreView,

    /// Working view for block proposals.
    checked: StoreView,

    /// Working view for mempool screening.
    screened: StoreView,
}

/// The ledger owns the state views and the transaction executor.
pub struct Ledger {
    chain: Arc<Chain>,
    db: Arc<dyn Database>,
    executor: Executor,
    views: Mutex<Views>,
}

impl Ledger {
    pub fn new(
        chain: Arc<Chain>,
        db: Arc<dyn Database>,
        executor: Executor,
    ) -> Result<Self, CoreError> {
        let anchor = chain.root();
        let delivered = StoreView::new(anchor.height(), anchor.block.header.state_hash, Arc::clone(&db))?;
        let checked = delivered.copy();
        let screened = delivered.copy();
        Ok(Self {
            chain,
            db,
            executor,
            views: Mutex::new(Views {
                delivered,
                checked,
                screened,
            }),
        })
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Open a read view over the state a block committed to.
    pub fn view_at(&self, block_hash: &Hash) -> Result<StoreView, CoreError> {
        let block = self
            .chain
            .find_block(block_hash)
            .ok_or_else(|| CoreError::not_ready(format!("no block {block_hash} yet")))?;
        StoreView::new(block.height(), block.block.header.state_hash, Arc::clone(&self.db))
    }

    /// Validator set as of a block.
    pub fn get_finalized_validators(&self, block_hash: &Hash) -> Result<AddressSet, CoreError> {
        Ok(self.view_at(block_hash)?.get_validators())
    }

    /// Lightning set as of a block.
    pub fn get_lightnings(&self, block_hash: &Hash) -> Result<AddressSet, CoreError> {
        Ok(self.view_at(block_hash)?.get_lightnings())
    }

    /// Screen a raw transaction for mempool admission.
    pub fn screen_tx(&self, raw: &[u8]) -> Result<TxInfo, CoreError> {
        let tx = Transaction::decode(raw)
            .ok_or_else(|| CoreError::validation("undecodable transaction"))?;
        if matches!(tx, Transaction::Coinbase(_)) {
            return Err(CoreError::validation(
                "coinbase transactions are proposer-only",
            ));
        }
        let views = self.views.lock();
        let validators = views.screened.get_validators();
        let lightnings = views.screened.get_lightnings();
        let ctx = TxContext {
            block_height: views.screened.height() + 1,
            validators: &validators,
            lightnings: &lightnings,
        };
        self.executor.sanity_check(&views.screened, &tx, &ctx)?;
        Ok(self.executor.tx_info(&tx))
    }

    /// Assemble the transaction list for a new block on `parent`:
    /// the coinbase first, then every screened transaction that still
    /// applies. Returns the resulting state root and the raw blobs.
    pub fn propose_block_txs(
        &self,
        parent_hash: &Hash,
        block_height: u64,
        proposer_key: &crate::crypto::PrivateKey,
        checkpoint_interval: u64,
        candidate_txs: &[Vec<u8>],
    ) -> Result<(Hash, Vec<Vec<u8>>), CoreError> {
        let mut view = self.view_at(parent_hash)?;
        view.set_height(block_height);
        let validators = view.get_validators();
        let lightnings = view.get_lightnings();

        let outputs = if coinbase::is_checkpoint_height(checkpoint_interval, block_height) {
            coinbase::reward_outputs(&coinbase::calculate_reward(
                &view,
                &validators,
                &lightnings,
                checkpoint_interval,
            ))
        } else {
            Vec::new()
        };
        let mut coinbase_tx =
            crate::types::transaction::CoinbaseTx::new(proposer_key.address(), outputs, block_height);
        coinbase_tx.sign(self.chain.chain_id(), proposer_key);

        let ctx = TxContext {
            block_height,
            validators: &validators,
            lightnings: &lightnings,
        };

        let coinbase_raw = Transaction::Coinbase(coinbase_tx.clone()).encode();
        self.executor
            .process(&mut view, &Transaction::Coinbase(coinbase_tx), &ctx)?;

        let mut raw_txs = vec![coinbase_raw];
        for raw in candidate_txs {
            let Some(tx) = Transaction::decode(raw) else {
                continue;
            };
            match self.executor.process(&mut view, &tx, &ctx) {
                Ok(_) => raw_txs.push(raw.clone()),
                Err(e) => debug!(error = %e, "dropping transaction from proposal"),
            }
        }

        // Persist the candidate state so descendants can be proposed on
        // top of it before this block is applied; storage is
        // content-addressed, so an abandoned candidate costs only the
        // nodes the pruner later sweeps.
        let root = view.save();
        let mut views = self.views.lock();
        views.checked = view;
        Ok((root, raw_txs))
    }

    /// Execute a block's transactions on a working copy of the parent
    /// state and commit iff the resulting root matches the header.
    pub fn apply_block_txs(&self, block: &Block) -> Result<(), CoreError> {
        let mut view = self.view_at(&block.header.parent)?;
        view.set_height(block.header.height);
        let validators = view.get_validators();
        let lightnings = view.get_lightnings();
        let ctx = TxContext {
            block_height: block.header.height,
            validators: &validators,
            lightnings: &lightnings,
        };

        for raw in &block.txs {
            let tx = Transaction::decode(raw)
                .ok_or_else(|| CoreError::validation("undecodable transaction in block"))?;
            self.executor.process(&mut view, &tx, &ctx)?;
        }

        let root = view.hash();
        if root != block.header.state_hash {
            return Err(CoreError::validation(format!(
                "state root mismatch: computed {root}, header {}",
                block.header.state_hash
            )));
        }

        view.save();
        let mut views = self.views.lock();
        views.screened = view.copy();
        views.delivered = view;
        Ok(())
    }

    /// Rewind the delivered view onto a block's committed state.
    pub fn reset_state(&self, block: &Block) -> Result<(), CoreError> {
        let mut views = self.views.lock();
        views.delivered.revert_to_snapshot(block.header.state_hash)?;
        views.delivered.set_height(block.header.height);
        views.screened = views.delivered.copy();
        views.checked = views.delivered.copy();
        Ok(())
    }

    /// Drop state not reachable from the given roots.
    pub fn prune_state(&self, kept_roots: &[Hash]) {
        self.views.lock().delivered.prune(kept_roots);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::storage::MemDatabase;
    use crate::types::block::{compute_transactions_hash, BlockHeader};
    use crate::types::transaction::{SendTx, TxInput, TxOutput};
    use crate::types::vote::CommitCertificate;

    const CHAIN_ID: &str = "meridian-test";
    const MIN_FEE: u128 = 1_000;
    const INTERVAL: u64 = 10;

    struct Fixture {
        key: PrivateKey,
        chain: Arc<Chain>,
        ledger: Ledger,
        genesis: Block,
    }

    fn make_fixture(balances: &[(Address, Coins)]) -> Fixture {
        let key = PrivateKey::generate();
        let issuer = PrivateKey::generate();
        let db: Arc<dyn Database> = Arc::new(MemDatabase::new());

        let validators = AddressSet::from_addresses(vec![key.address()]);
        let root = build_genesis_state(
            Arc::clone(&db),
            CHAIN_ID,
            &validators,
            &AddressSet::new(),
            balances,
        );

        let mut genesis = Block::genesis(CHAIN_ID);
        genesis.header.state_hash = root;

        let chain = Arc::new(Chain::new(CHAIN_ID, genesis.clone()));
        let executor = Executor::new(
            CHAIN_ID,
            INTERVAL,
            MIN_FEE,
            Arc::new(LicenseGate::new(CHAIN_ID, issuer.address())),
            Arc::new(NullVm),
        );
        let ledger = Ledger::new(Arc::clone(&chain), db, executor).unwrap();

        Fixture {
            key,
            chain,
            ledger,
            genesis,
        }
    }

    fn build_block(fix: &Fixture, parent: &Block, txs: Vec<Vec<u8>>, state_hash: Hash) -> Block {
        let mut block = Block::new(
            BlockHeader {
                chain_id: CHAIN_ID.to_string(),
                height: parent.height() + 1,
                epoch: parent.header.epoch + 1,
                parent: parent.hash(),
                state_hash,
                transactions_hash: compute_transactions_hash(&txs),
                timestamp: 1_700_000_000,
                proposer: fix.key.address(),
                hcc: CommitCertificate::default(),
                lightning_votes: None,
                signature: None,
            },
            txs,
        );
        block.header.sign(&fix.key);
        block
    }

    #[test]
    fn test_propose_and_apply_roundtrip() {
        let fix = make_fixture(&[]);

        let (root, txs) = fix
            .ledger
            .propose_block_txs(&fix.genesis.hash(), 2, &fix.key, INTERVAL, &[])
            .unwrap();
        // Height 2 is not a checkpoint: just the coinbase.
        assert_eq!(txs.len(), 1);

        let block = build_block(&fix, &fix.genesis, txs, root);
        fix.chain.add_block(block.clone()).unwrap();
        fix.ledger.apply_block_txs(&block).unwrap();
    }

    #[test]
    fn test_apply_rejects_state_root_mismatch() {
        let fix = make_fixture(&[]);

        let (_, txs) = fix
            .ledger
            .propose_block_txs(&fix.genesis.hash(), 2, &fix.key, INTERVAL, &[])
            .unwrap();

        let block = build_block(&fix, &fix.genesis, txs, Hash([0xEE; 32]));
        fix.chain.add_block(block.clone()).unwrap();
        assert!(fix.ledger.apply_block_txs(&block).is_err());
    }

    #[test]
    fn test_screen_tx() {
        let sender = PrivateKey::generate();
        let fix = make_fixture(&[(sender.address(), Coins::spay(100_000))]);

        let mut send = SendTx {
            fee: Coins::spay(MIN_FEE),
            inputs: vec![TxInput::new(sender.address(), Coins::spay(2_000), 1)],
            outputs: vec![TxOutput {
                address: Address([7; 20]),
                coins: Coins::spay(2_000 - MIN_FEE),
            }],
        };
        let sign_bytes = Transaction::Send(send.clone()).sign_bytes(CHAIN_ID);
        send.inputs[0].signature = Some(sender.sign(&sign_bytes));
        let raw = Transaction::Send(send).encode();

        let info = fix.ledger.screen_tx(&raw).unwrap();
        assert_eq!(info.address, sender.address());
        assert_eq!(info.effective_gas_price, MIN_FEE);

        // Coinbase is proposer-only.
        let cb = Transaction::Coinbase(crate::types::transaction::CoinbaseTx::new(
            sender.address(),
            vec![],
            2,
        ));
        assert!(fix.ledger.screen_tx(&cb.encode()).is_err());
    }

    #[test]
    fn test_committee_lookups() {
        let fix = make_fixture(&[]);
        let validators = fix
            .ledger
            .get_finalized_validators(&fix.genesis.hash())
            .unwrap();
        assert!(validators.has(&fix.key.address()));
        assert!(fix
            .ledger
            .get_lightnings(&fix.genesis.hash())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_checkpoint_proposal_carries_rewards() {
        let fix = make_fixture(&[]);

        // Fabricate a parent at height 10 (its own ancestry still in
        // flight) so the next height (11) is a checkpoint. It reuses the
        // genesis state root.
        let mut parent = fix.genesis.clone();
        parent.header.height = 10;
        parent.header.parent = Hash([0x55; 32]);
        parent.header.proposer = fix.key.address();
        parent.header.sign(&fix.key);
        fix.chain.add_block(parent.clone()).unwrap();

        let (_, txs) = fix
            .ledger
            .propose_block_txs(&parent.hash(), 11, &fix.key, INTERVAL, &[])
            .unwrap();

        let coinbase = Transaction::decode(&txs[0]).unwrap();
        match coinbase {
            Transaction::Coinbase(cb) => {
                assert_eq!(cb.outputs.len(), 1);
                assert_eq!(
                    cb.outputs[0].coins,
                    Coins::spay(u128::from(INTERVAL) * coinbase::VALIDATOR_REWARD_PER_BLOCK_WEI)
                );
            }
            other => panic!("expected coinbase, got {other:?}"),
        }
    }
}
