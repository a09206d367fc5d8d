//! Consensus engine: epoch progression, proposal handling, vote
//! aggregation, commit certificates, and finalization.
//!
//! The engine owns one main-loop task draining a bounded inbound queue
//! of proposals, votes, blocks, and lightning aggregates. Validation
//! errors drop the message with a debug log and never propagate upward.

use crate::chain::Chain;
use crate::consensus::lightning::LightningEngine;
use crate::consensus::proposer::ValidatorManager;
use crate::crypto::PrivateKey;
use crate::errors::CoreError;
use crate::ledger::coinbase::is_checkpoint_height;
use crate::ledger::Ledger;
use crate::network::{Dispatcher, Message};
use crate::types::address_set::AddressSet;
use crate::types::block::{Block, BlockStatus, ExtendedBlock};
use crate::types::lightning::AggregatedVote;
use crate::types::vote::{has_majority, CommitCertificate, Proposal, Vote, VoteSet};
use crate::types::{Address, Hash};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Candidate transactions for block proposals.
pub trait TxProvider: Send + Sync {
    /// Up to `max` screened raw transactions, best first.
    fn pending(&self, max: usize) -> Vec<Vec<u8>>;

    /// Drop transactions that made it into a block.
    fn mark_included(&self, tx_hashes: &[Hash]);
}

/// Provider used when the node carries no mempool.
pub struct NoTxProvider;

impl TxProvider for NoTxProvider {
    fn pending(&self, _max: usize) -> Vec<Vec<u8>> {
        Vec::new()
    }

    fn mark_included(&self, _tx_hashes: &[Hash]) {}
}

#[derive(Clone, Debug)]
pub struct ConsensusConfig {
    pub checkpoint_interval: u64,

    /// Capacity of the inbound message queue.
    pub message_queue_size: usize,

    /// Seconds without progress before the epoch advances.
    pub epoch_timeout_secs: u64,

    /// Whether this node builds proposals when selected.
    pub auto_propose: bool,

    /// Transactions pulled into one proposal.
    pub max_txs_per_block: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 100,
            message_queue_size: 1024,
            epoch_timeout_secs: 6,
            auto_propose: true,
            max_txs_per_block: 1024,
        }
    }
}

/// Inbound consensus messages.
#[derive(Clone, Debug)]
pub enum ConsensusMessage {
    Proposal(Proposal),
    Vote(Vote),
    Block(Block),
    AggregatedVote(AggregatedVote),
}

struct EngineState {
    epoch: u64,
    epoch_votes: VoteSet,

    /// Highest valid block (the tip consensus extends).
    tip: Hash,

    /// Highest block seen regardless of validation.
    highest_seen: Hash,

    last_finalized: Hash,

    /// Highest commit certificate assembled so far, carried into
    /// proposals as the HCC.
    highest_cc: CommitCertificate,

    epoch_start: Instant,
    last_proposed_height: u64,
}

/// The consensus state machine.
pub struct ConsensusEngine {
    config: ConsensusConfig,
    chain: Arc<Chain>,
    ledger: Arc<Ledger>,
    lightning: Arc<LightningEngine>,
    dispatcher: Arc<dyn Dispatcher>,
    validator_manager: ValidatorManager,
    tx_provider: Arc<dyn TxProvider>,
    private_key: PrivateKey,

    state: Mutex<EngineState>,

    incoming_tx: mpsc::Sender<ConsensusMessage>,
    incoming_rx: Mutex<Option<mpsc::Receiver<ConsensusMessage>>>,

    finalized_tx: mpsc::UnboundedSender<Block>,
    finalized_rx: Mutex<Option<mpsc::UnboundedReceiver<Block>>>,
}

impl ConsensusEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConsensusConfig,
        chain: Arc<Chain>,
        ledger: Arc<Ledger>,
        lightning: Arc<LightningEngine>,
        dispatcher: Arc<dyn Dispatcher>,
        validator_manager: ValidatorManager,
        tx_provider: Arc<dyn TxProvider>,
        private_key: PrivateKey,
    ) -> Self {
        let anchor = chain.root();
        let (incoming_tx, incoming_rx) = mpsc::channel(config.message_queue_size.max(1));
        let (finalized_tx, finalized_rx) = mpsc::unbounded_channel();

        let state = EngineState {
            epoch: anchor.block.header.epoch,
            epoch_votes: VoteSet::new(),
            tip: anchor.hash(),
            highest_seen: anchor.hash(),
            last_finalized: anchor.hash(),
            highest_cc: CommitCertificate::default(),
            epoch_start: Instant::now(),
            last_proposed_height: 0,
        };

        Self {
            config,
            chain,
            ledger,
            lightning,
            dispatcher,
            validator_manager,
            tx_provider,
            private_key,
            state: Mutex::new(state),
            incoming_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
            finalized_tx,
            finalized_rx: Mutex::new(Some(finalized_rx)),
        }
    }

    // ========================================================================
    // PUBLIC SURFACE
    // ========================================================================

    /// This node's address.
    pub fn id(&self) -> Address {
        self.private_key.address()
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn get_epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub fn get_ledger(&self) -> Arc<Ledger> {
        Arc::clone(&self.ledger)
    }

    /// The current chain tip. With `include_pending` the highest block
    /// seen is returned even if it has not been validated yet.
    pub fn get_tip(&self, include_pending: bool) -> ExtendedBlock {
        let state = self.state.lock();
        let hash = if include_pending {
            state.highest_seen
        } else {
            state.tip
        };
        self.chain
            .find_block(&hash)
            .expect("the tip always resolves to a stored block")
    }

    pub fn get_last_finalized_block(&self) -> ExtendedBlock {
        let hash = self.state.lock().last_finalized;
        self.chain
            .find_block(&hash)
            .expect("the finalized anchor always resolves to a stored block")
    }

    /// Stream of blocks reaching DirectlyFinalized, each exactly once.
    /// The receiver can be taken once.
    pub fn finalized_blocks(&self) -> mpsc::UnboundedReceiver<Block> {
        self.finalized_rx
            .lock()
            .take()
            .expect("finalized_blocks() receiver already taken")
    }

    /// Votes observed for the current epoch.
    pub fn get_epoch_votes(&self) -> VoteSet {
        self.state.lock().epoch_votes.clone()
    }

    /// Validator set as of a block.
    pub fn get_validators(&self, block_hash: &Hash) -> AddressSet {
        self.ledger
            .get_finalized_validators(block_hash)
            .unwrap_or_default()
    }

    /// Enqueue an inbound message; overflow drops the newest.
    pub fn add_message(&self, msg: ConsensusMessage) {
        if let Err(e) = self.incoming_tx.try_send(msg) {
            debug!(error = %e, "consensus queue full, discarding message");
        }
    }

    /// Spawn the main-loop task.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.main_loop(shutdown).await;
        });
    }

    async fn main_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut incoming = self
            .incoming_rx
            .lock()
            .take()
            .expect("consensus main loop started twice");
        let mut tick = tokio::time::interval(Duration::from_millis(500));
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                msg = incoming.recv() => {
                    match msg {
                        Some(msg) => self.process_message(msg),
                        None => return,
                    }
                }
                _ = tick.tick() => self.on_tick(),
            }
        }
    }

    // ========================================================================
    // MESSAGE PROCESSING
    // ========================================================================

    /// Process one message synchronously. The main loop drains the
    /// queue through this; harnesses may call it directly.
    pub fn process_message(&self, msg: ConsensusMessage) {
        match msg {
            ConsensusMessage::Proposal(proposal) => self.handle_proposal(proposal),
            ConsensusMessage::Vote(vote) => self.handle_vote(vote),
            ConsensusMessage::Block(block) => self.handle_block(block),
            ConsensusMessage::AggregatedVote(agg) => self.lightning.handle_vote(agg),
        }
    }

    fn handle_proposal(&self, proposal: Proposal) {
        let hash = proposal.block.hash();
        if !self.chain.has_block(&hash) {
            if let Err(e) = self.chain.add_block(proposal.block.clone()) {
                debug!(block = %hash, error = %e, "rejecting proposal block");
                return;
            }
        }
        for vote in proposal.votes.votes() {
            self.handle_vote(vote);
        }
        self.handle_block(proposal.block);
    }

    fn handle_block(&self, block: Block) {
        let hash = block.hash();
        if !self.chain.has_block(&hash) {
            if let Err(e) = self.chain.add_block(block.clone()) {
                debug!(block = %hash, error = %e, "rejecting block");
                return;
            }
        }
        match self.process_block(&hash) {
            Ok(()) => {}
            Err(CoreError::NotReady(reason)) => {
                debug!(block = %hash, reason, "block not ready, dropped");
            }
            Err(e) => {
                debug!(block = %hash, error = %e, "block invalid");
                self.chain.set_status(&hash, BlockStatus::Invalid);
            }
        }
    }

    /// Validate and adopt a stored block.
    fn process_block(&self, hash: &Hash) -> Result<(), CoreError> {
        let eb = self
            .chain
            .find_block(hash)
            .ok_or_else(|| CoreError::not_ready("block not stored"))?;
        if eb.status.is_valid() {
            return Ok(()); // already adopted
        }
        if eb.status.is_invalid() {
            return Err(CoreError::validation("block previously marked invalid"));
        }

        let parent = self
            .chain
            .find_block(&eb.parent())
            .ok_or_else(|| CoreError::not_ready("parent not stored yet"))?;
        if !parent.status.is_valid() {
            return Err(CoreError::not_ready("parent not validated yet"));
        }

        let header = &eb.block.header;
        let validators = self
            .ledger
            .get_finalized_validators(&parent.hash())?;

        let expected = self
            .validator_manager
            .get_proposer(&validators, header.epoch)
            .ok_or_else(|| CoreError::validation("empty validator set"))?;
        if header.proposer != expected {
            return Err(CoreError::validation(format!(
                "unexpected proposer {} for epoch {}, want {}",
                header.proposer, header.epoch, expected
            )));
        }

        // The HCC carried forward must hold against the validator set as
        // of the parent.
        if !header.hcc.votes.is_empty() && !header.hcc.is_valid(&validators) {
            return Err(CoreError::validation("invalid commit certificate in header"));
        }

        // Checkpoint blocks carry a majority lightning aggregate over
        // their own hash.
        if is_checkpoint_height(self.config.checkpoint_interval, header.height) {
            let lightnings = self.ledger.get_lightnings(&parent.hash())?;
            if !lightnings.is_empty() {
                let agg = header.lightning_votes.as_ref().ok_or_else(|| {
                    CoreError::validation("checkpoint block without lightning votes")
                })?;
                if agg.block != *hash {
                    return Err(CoreError::validation(
                        "lightning aggregate is not over the checkpoint's own hash",
                    ));
                }
                if !agg.validate(&lightnings) {
                    return Err(CoreError::validation("invalid lightning aggregate"));
                }
                if !agg.has_majority(&lightnings) {
                    return Err(CoreError::validation(
                        "lightning aggregate lacks a committee majority",
                    ));
                }
            }
        }

        // Execute. The coinbase reward check happens inside.
        self.ledger.apply_block_txs(&eb.block)?;

        self.chain.set_status(hash, BlockStatus::Valid);
        info!(block = %hash, height = header.height, "block validated");

        {
            let mut state = self.state.lock();
            if header.height
                > self
                    .chain
                    .find_block(&state.tip)
                    .map(|b| b.height())
                    .unwrap_or(0)
            {
                state.tip = *hash;
            }
            if header.height
                > self
                    .chain
                    .find_block(&state.highest_seen)
                    .map(|b| b.height())
                    .unwrap_or(0)
            {
                state.highest_seen = *hash;
            }
            if header.epoch > state.epoch {
                state.epoch = header.epoch;
                state.epoch_start = Instant::now();
            }
        }

        // New aggregation session over the adopted tip.
        self.lightning.start_new_block(*hash);

        // The header's certificate may commit (and finalize) an ancestor.
        if !header.hcc.votes.is_empty() {
            let target = header.hcc.block_hash;
            let cc = header.hcc.clone();
            self.commit_block(&target, cc);
        }

        // Cast our vote if we are a validator.
        if validators.has(&self.id()) {
            self.vote_for(*hash, header.height);
        }
        Ok(())
    }

    fn vote_for(&self, block: Hash, height: u64) {
        let epoch = self.state.lock().epoch;
        let mut vote = Vote::new(block, height, epoch, self.id());
        vote.sign(&self.private_key);
        debug!(%block, height, epoch, "casting vote");
        self.dispatcher.broadcast(Message::Vote(vote.clone()));
        self.handle_vote(vote);
    }

    fn handle_vote(&self, vote: Vote) {
        if !vote.validate() {
            debug!(block = %vote.block, voter = %vote.id, "dropping invalid vote");
            return;
        }
        let last_finalized = self.state.lock().last_finalized;
        let validators = self.get_validators(&last_finalized);
        if !validators.has(&vote.id) {
            debug!(voter = %vote.id, "dropping vote from non-validator");
            return;
        }

        let (block, cc) = {
            let mut state = self.state.lock();
            state.epoch_votes.add_vote(vote.clone());

            // A majority of voters ahead of us pulls the epoch forward.
            if vote.epoch > state.epoch {
                let ahead: VoteSet = {
                    let mut set = VoteSet::new();
                    for v in state.epoch_votes.unique_voter().votes() {
                        if v.epoch > state.epoch {
                            set.add_vote(v);
                        }
                    }
                    set
                };
                if has_majority(&validators, &ahead) {
                    let next = ahead.votes().iter().map(|v| v.epoch).max().unwrap_or(0);
                    info!(from = state.epoch, to = next, "epoch pulled forward by votes");
                    state.epoch = next;
                    state.epoch_start = Instant::now();
                }
            }

            // Commit check for the voted block.
            let block_votes: VoteSet = {
                let mut set = VoteSet::new();
                for v in state.epoch_votes.unique_voter_and_block().votes() {
                    if v.block == vote.block {
                        set.add_vote(v);
                    }
                }
                set.filter_by_validators(&validators)
            };
            if has_majority(&validators, &block_votes) {
                (vote.block, Some(CommitCertificate::new(vote.block, block_votes)))
            } else {
                (vote.block, None)
            }
        };

        if let Some(cc) = cc {
            self.commit_block(&block, cc);
        }
    }

    /// Mark a block committed under a certificate and run the
    /// finalization rule in both directions.
    fn commit_block(&self, hash: &Hash, cc: CommitCertificate) {
        let Some(eb) = self.chain.find_block(hash) else {
            debug!(block = %hash, "certificate for unknown block, dropped");
            return;
        };
        if !eb.status.is_valid() {
            debug!(block = %hash, "certificate for unvalidated block, dropped");
            return;
        }
        if !eb.status.is_committed() {
            self.chain.set_status(hash, BlockStatus::Committed);
            info!(block = %hash, height = eb.height(), "block committed");
        }

        {
            let mut state = self.state.lock();
            let current_height = self
                .chain
                .find_block(&state.highest_cc.block_hash)
                .map(|b| b.height())
                .unwrap_or(0);
            if eb.height() > current_height {
                state.highest_cc = cc;
            }
        }

        // Direction 1: this block's own certificate target.
        let target = eb.block.header.hcc.block_hash;
        if !target.is_empty() && target != *hash {
            if let Some(tb) = self.chain.find_block(&target) {
                if tb.status.is_committed() && self.is_ancestor(&target, hash) {
                    self.finalize_block(&target);
                }
            }
        }

        // Direction 2: an already-committed child referencing this block.
        let eb = self.chain.find_block(hash).expect("present above");
        for child in &eb.children {
            if let Some(cb) = self.chain.find_block(child) {
                if cb.status.is_committed() && cb.block.header.hcc.block_hash == *hash {
                    self.finalize_block(hash);
                    break;
                }
            }
        }
    }

    fn is_ancestor(&self, ancestor: &Hash, descendant: &Hash) -> bool {
        let mut cursor = *descendant;
        for _ in 0..=self.config.checkpoint_interval * 4 {
            if cursor == *ancestor {
                return true;
            }
            match self.chain.find_block(&cursor) {
                Some(b) if !b.parent().is_empty() => cursor = b.parent(),
                _ => return false,
            }
        }
        false
    }

    /// Directly finalize a block, indirectly finalize its ancestors,
    /// and emit it on the finalized stream exactly once.
    fn finalize_block(&self, hash: &Hash) {
        let Some(eb) = self.chain.find_block(hash) else {
            return;
        };
        if eb.status.is_finalized() {
            return;
        }
        self.chain.set_status(hash, BlockStatus::DirectlyFinalized);
        info!(block = %hash, height = eb.height(), "block directly finalized");

        let mut cursor = eb.parent();
        while let Some(parent) = self.chain.find_block(&cursor) {
            if parent.status.is_finalized() {
                break;
            }
            self.chain
                .set_status(&cursor, BlockStatus::IndirectlyFinalized);
            cursor = parent.parent();
        }

        {
            let mut state = self.state.lock();
            let lf_height = self
                .chain
                .find_block(&state.last_finalized)
                .map(|b| b.height())
                .unwrap_or(0);
            if eb.height() > lf_height {
                state.last_finalized = *hash;
            }
        }

        if self.finalized_tx.send(eb.block.clone()).is_err() {
            warn!(block = %hash, "finalized stream receiver dropped");
        }
    }

    // ========================================================================
    // EPOCH PROGRESSION & PROPOSING
    // ========================================================================

    fn on_tick(&self) {
        let timed_out = {
            let state = self.state.lock();
            state.epoch_start.elapsed() >= Duration::from_secs(self.config.epoch_timeout_secs)
        };
        if timed_out {
            let (epoch, tip) = {
                let mut state = self.state.lock();
                state.epoch += 1;
                state.epoch_start = Instant::now();
                (state.epoch, state.tip)
            };
            debug!(epoch, "epoch timed out, advancing");

            self.lightning.start_new_round();
            if let Some(agg) = self.lightning.get_vote_to_broadcast() {
                self.dispatcher.broadcast(Message::AggregatedVote(agg));
            }

            // Re-broadcast our tip vote so laggards catch up.
            if let Some(tip_block) = self.chain.find_block(&tip) {
                let validators = self.get_validators(&self.state.lock().last_finalized);
                if validators.has(&self.id()) {
                    self.vote_for(tip, tip_block.height());
                }
            }
        }

        if self.config.auto_propose {
            self.maybe_propose();
        }
    }

    /// Build and broadcast a proposal when this node is the selected
    /// proposer for the current epoch.
    fn maybe_propose(&self) {
        let (tip_hash, epoch, last_proposed) = {
            let state = self.state.lock();
            (state.tip, state.epoch, state.last_proposed_height)
        };
        let Some(tip) = self.chain.find_block(&tip_hash) else {
            return;
        };
        let next_height = tip.height() + 1;
        if next_height <= last_proposed {
            return;
        }

        let validators = self.get_validators(&tip_hash);
        if self.validator_manager.get_proposer(&validators, epoch) != Some(self.id()) {
            return;
        }

        let candidates = self.tx_provider.pending(self.config.max_txs_per_block);
        let (state_hash, txs) = match self.ledger.propose_block_txs(
            &tip_hash,
            next_height,
            &self.private_key,
            self.config.checkpoint_interval,
            &candidates,
        ) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "failed to assemble proposal");
                return;
            }
        };

        let hcc = self.state.lock().highest_cc.clone();
        let mut block = Block::new(
            crate::types::block::BlockHeader {
                chain_id: self.chain.chain_id().to_string(),
                height: next_height,
                epoch,
                parent: tip_hash,
                state_hash,
                transactions_hash: crate::types::block::compute_transactions_hash(&txs),
                timestamp: std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0),
                proposer: self.id(),
                hcc,
                lightning_votes: None,
                signature: None,
            },
            txs,
        );

        // A checkpoint proposal carries the aggregate over its own hash;
        // seed the session with our own signature if we are a committee
        // member and attach the best aggregate available.
        if is_checkpoint_height(self.config.checkpoint_interval, next_height) {
            let hash = block.hash();
            self.lightning.start_new_block(hash);
            block.header.lightning_votes = self.lightning.get_best_vote();
        }

        block.header.sign(&self.private_key);

        let included: Vec<Hash> = block
            .txs
            .iter()
            .map(|raw| crate::types::keccak256_hash(raw))
            .collect();
        self.tx_provider.mark_included(&included);

        self.state.lock().last_proposed_height = next_height;
        info!(height = next_height, epoch, "proposing block");

        let proposal = Proposal {
            block: block.clone(),
            proposer_id: self.id(),
            votes: self.get_epoch_votes(),
        };
        self.dispatcher.broadcast(Message::Proposal(proposal));
        self.handle_block(block);
    }
}
