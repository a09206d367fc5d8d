//! Lightning-committee vote aggregation.
//!
//! One aggregation session runs per block and advances in rounds.
//! `curr_vote` is what this node broadcasts, `next_vote` accumulates
//! merged signatures and is promoted at every round so the broadcast
//! always reflects the most recently merged aggregate. Incoming votes
//! arrive through a bounded channel; overflow drops the newest with a
//! debug log.

use crate::crypto::PrivateKey;
use crate::ledger::Ledger;
use crate::types::address_set::AddressSet;
use crate::types::lightning::AggregatedVote;
use crate::types::Hash;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Rounds per block session.
const MAX_ROUND: u32 = 10;

#[derive(Clone, Debug)]
pub struct LightningConfig {
    /// Capacity of the incoming vote channel.
    pub queue_size: usize,

    /// Non-lightning nodes relay the best-seen aggregate instead of
    /// merging when set.
    pub pass_through: bool,
}

impl Default for LightningConfig {
    fn default() -> Self {
        Self {
            queue_size: 512,
            pass_through: true,
        }
    }
}

#[derive(Default)]
struct Session {
    block: Hash,
    round: u32,
    curr_vote: Option<AggregatedVote>,
    next_vote: Option<AggregatedVote>,
    lightnings: AddressSet,
    lightnings_hash: Hash,
}

/// Per-block aggregator of lightning-committee votes.
pub struct LightningEngine {
    config: LightningConfig,
    key: PrivateKey,
    ledger: Arc<Ledger>,

    session: Mutex<Session>,

    incoming_tx: mpsc::Sender<AggregatedVote>,
    incoming_rx: Mutex<Option<mpsc::Receiver<AggregatedVote>>>,
}

impl LightningEngine {
    pub fn new(config: LightningConfig, key: PrivateKey, ledger: Arc<Ledger>) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::channel(config.queue_size.max(1));
        Self {
            config,
            key,
            ledger,
            session: Mutex::new(Session::default()),
            incoming_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
        }
    }

    /// Begin a new aggregation session over `block`.
    ///
    /// Panics if the lightning set cannot be read from the ledger: that
    /// is an internal invariant failure, the block was validated against
    /// this very state.
    pub fn start_new_block(&self, block: Hash) {
        let lightnings = self
            .ledger
            .get_lightnings(&block)
            .unwrap_or_else(|e| panic!("lightning set lookup failed for {block}: {e}"));

        let mut session = self.session.lock();
        session.block = block;
        session.round = 1;
        session.lightnings_hash = lightnings.hash();
        session.lightnings = lightnings;

        debug!(
            %block,
            lightnings = %session.lightnings_hash,
            "starting new lightning session"
        );

        if session.lightnings.has(&self.key.address()) {
            let mut vote = AggregatedVote::new(block, &session.lightnings);
            vote.sign(&self.key);
            session.curr_vote = Some(vote.clone());
            session.next_vote = Some(vote);
        } else {
            session.curr_vote = None;
            session.next_vote = None;
        }
    }

    /// Advance to the next round, promoting the best-known aggregate to
    /// the broadcast slot.
    pub fn start_new_round(&self) {
        let mut session = self.session.lock();
        if session.round < MAX_ROUND {
            session.round += 1;
            if session.next_vote.is_some() {
                session.curr_vote = session.next_vote.clone();
            }
        }
    }

    /// The aggregate this node currently broadcasts.
    pub fn get_vote_to_broadcast(&self) -> Option<AggregatedVote> {
        self.session.lock().curr_vote.clone()
    }

    /// The best aggregate merged so far.
    pub fn get_best_vote(&self) -> Option<AggregatedVote> {
        self.session.lock().next_vote.clone()
    }

    pub fn current_round(&self) -> u32 {
        self.session.lock().round
    }

    /// Non-blocking enqueue of an incoming aggregate.
    pub fn handle_vote(&self, vote: AggregatedVote) {
        if let Err(e) = self.incoming_tx.try_send(vote) {
            debug!(error = %e, "lightning queue full, discarding vote");
        }
    }

    /// Spawn the session loop draining the incoming channel.
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
            .expect("lightning main loop started twice");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                vote = incoming.recv() => {
                    match vote {
                        Some(vote) => self.process_vote(vote),
                        None => return,
                    }
                }
            }
        }
    }

    pub(crate) fn process_vote(&self, vote: AggregatedVote) {
        let mut session = self.session.lock();

        if !Self::validate_vote(&session, &vote) {
            return;
        }

        let Some(next) = session.next_vote.clone() else {
            session.next_vote = Some(vote);
            return;
        };

        let is_lightning = session.lightnings.has(&self.key.address());
        if !is_lightning && self.config.pass_through {
            match next.pick(&vote) {
                Ok(best) if *best == next => {
                    debug!(block = %vote.block, "skipping lightning vote: not better");
                }
                Ok(best) => session.next_vote = Some(best.clone()),
                Err(e) => debug!(error = %e, "failed to pick lightning vote"),
            }
        } else {
            match next.merge(&vote) {
                Ok(Some(merged)) => {
                    debug!(
                        block = %merged.block,
                        signers = merged.abs(),
                        round = session.round,
                        "new lightning vote"
                    );
                    session.next_vote = Some(merged);
                }
                Ok(None) => {
                    debug!(block = %vote.block, "skipping lightning vote: no new signer");
                }
                Err(e) => debug!(error = %e, "failed to merge lightning vote"),
            }
        }
    }

    fn validate_vote(session: &Session, vote: &AggregatedVote) -> bool {
        if session.block.is_empty() {
            debug!(vote_block = %vote.block, "ignoring lightning vote: local not ready");
            return false;
        }
        if vote.block != session.block {
            debug!(
                local_block = %session.block,
                vote_block = %vote.block,
                "ignoring lightning vote: block hash does not match local candidate"
            );
            return false;
        }
        if vote.lightnings != session.lightnings_hash {
            debug!(
                local = %session.lightnings_hash,
                vote = %vote.lightnings,
                "ignoring lightning vote: committee hash does not match local value"
            );
            return false;
        }
        if !vote.validate(&session.lightnings) {
            debug!(vote_block = %vote.block, "ignoring lightning vote: invalid signatures");
            return false;
        }
        true
    }
}
